use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use heic_convert::{
    app,
    core::converter::{CommandTemplate, ConverterRegistry, ConverterSpec},
    storage::TempStorage,
    AppState,
};
use poem::{
    http::StatusCode,
    test::{TestClient, TestForm, TestFormField},
    Endpoint,
};
use tempfile::TempDir;

const COPY: &str = r#"cp "$1" "$2""#;
const FAIL: &str = "echo 'no decode delegate for this image format' >&2; exit 1";

fn sh(name: &str, priority: u32, script: &str) -> ConverterSpec {
    ConverterSpec {
        name: name.to_string(),
        command: CommandTemplate::new("sh", ["-c", script, "sh", "{input}", "{output}"]),
        priority,
    }
}

fn touch(marker: &Path) -> String {
    format!("touch '{}'; {}", marker.display(), COPY)
}

fn heic_bytes() -> Vec<u8> {
    let mut buf = vec![0x00, 0x00, 0x00, 0x18];
    buf.extend_from_slice(b"ftypheic");
    buf.extend_from_slice(&[0, 0, 0, 0]);
    buf.extend_from_slice(b"mif1heic");
    buf.extend_from_slice(&[0xAB; 64]);
    buf
}

struct Harness {
    _tmp: TempDir,
    uploads: PathBuf,
    marker: PathBuf,
}

impl Harness {
    fn new() -> Harness {
        let tmp = TempDir::new().unwrap();
        Harness {
            uploads: tmp.path().join("uploads"),
            marker: tmp.path().join("converter-ran"),
            _tmp: tmp,
        }
    }

    fn client(&self, registry: ConverterRegistry) -> TestClient<impl Endpoint> {
        let state = AppState {
            storage: TempStorage::new(&self.uploads).unwrap(),
            registry,
            max_upload_bytes: 1024,
        };
        TestClient::new(app(state))
    }

    fn leftovers(&self) -> usize {
        std::fs::read_dir(&self.uploads).unwrap().count()
    }
}

fn registry(converters: Vec<ConverterSpec>) -> ConverterRegistry {
    ConverterRegistry::new(converters, Duration::from_secs(5))
}

fn image_form(bytes: Vec<u8>) -> TestForm {
    TestForm::new().field(
        TestFormField::bytes(bytes)
            .name("image")
            .filename("IMG_0001.HEIC")
            .content_type("image/heic"),
    )
}

#[tokio::test]
async fn missing_file_field_is_bad_request() {
    let h = Harness::new();
    let cli = h.client(registry(vec![sh("primary", 0, &touch(&h.marker))]));

    let resp = cli
        .post("/convert")
        .multipart(TestForm::new().field(TestFormField::text("no image here").name("note")))
        .send()
        .await;

    resp.assert_status(StatusCode::BAD_REQUEST);
    resp.assert_text("No image file provided").await;
    assert_eq!(h.leftovers(), 0);
    assert!(!h.marker.exists());
}

#[tokio::test]
async fn zero_bytes_rejected_without_running_converters() {
    let h = Harness::new();
    let cli = h.client(registry(vec![sh("primary", 0, &touch(&h.marker))]));

    let resp = cli
        .post("/convert")
        .multipart(image_form(vec![0u8; 50]))
        .send()
        .await;

    resp.assert_status(StatusCode::BAD_REQUEST);
    resp.assert_text("Uploaded file is not a valid HEIC image").await;
    assert!(!h.marker.exists());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let h = Harness::new();
    let cli = h.client(registry(vec![sh("primary", 0, COPY)]));

    let resp = cli
        .post("/convert")
        .multipart(image_form(vec![0u8; 4096]))
        .send()
        .await;

    resp.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn converts_and_streams_jpeg() {
    let h = Harness::new();
    let cli = h.client(registry(vec![sh("primary", 0, COPY)]));

    let resp = cli
        .post("/convert")
        .multipart(image_form(heic_bytes()))
        .send()
        .await;

    resp.assert_status_is_ok();
    resp.assert_content_type("image/jpeg");
    resp.assert_header(
        "content-disposition",
        "attachment; filename=\"converted.jpg\"",
    );
    resp.assert_header("x-converter", "primary");

    let body = resp.0.into_body().into_vec().await.unwrap();
    assert_eq!(body, heic_bytes());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn falls_back_to_secondary_converter() {
    let h = Harness::new();
    let cli = h.client(registry(vec![
        sh("primary", 0, FAIL),
        sh("secondary", 1, COPY),
    ]));

    let resp = cli
        .post("/convert")
        .multipart(image_form(heic_bytes()))
        .send()
        .await;

    resp.assert_status_is_ok();
    resp.assert_header("x-converter", "secondary");
    let body = resp.0.into_body().into_vec().await.unwrap();
    assert!(!body.is_empty());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn primary_success_skips_secondary() {
    let h = Harness::new();
    let cli = h.client(registry(vec![
        sh("secondary", 1, &touch(&h.marker)),
        sh("primary", 0, COPY),
    ]));

    let resp = cli
        .post("/convert")
        .multipart(image_form(heic_bytes()))
        .send()
        .await;

    resp.assert_status_is_ok();
    resp.assert_header("x-converter", "primary");
    resp.0.into_body().into_vec().await.unwrap();
    assert!(!h.marker.exists());
}

#[tokio::test]
async fn all_converters_failing_is_server_error() {
    let h = Harness::new();
    let cli = h.client(registry(vec![
        sh("imagemagick", 0, FAIL),
        sh("libheif", 1, "exit 4"),
    ]));

    let resp = cli
        .post("/convert")
        .multipart(image_form(heic_bytes()))
        .send()
        .await;

    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let text = resp.0.into_body().into_string().await.unwrap();
    assert_eq!(
        text,
        "Conversion failed: imagemagick (exit code 1); libheif (exit code 4)"
    );
    assert!(!text.contains(h.uploads.to_str().unwrap()));
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn multi_image_outputs_do_not_outlive_request() {
    let h = Harness::new();
    let multi = r#"cp "$1" "${2%.jpg}-0.jpg"; cp "$1" "${2%.jpg}-1.jpg""#;
    let cli = h.client(registry(vec![
        sh("imagemagick", 0, multi),
        sh("libheif", 1, "exit 1"),
    ]));

    let resp = cli
        .post("/convert")
        .multipart(image_form(heic_bytes()))
        .send()
        .await;

    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    resp.assert_text("Conversion failed: imagemagick (empty output); libheif (exit code 1)")
        .await;
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn stray_files_next_to_output_are_removed_after_streaming() {
    let h = Harness::new();
    let extra = r#"cp "$1" "$2"; echo depth > "${2%.jpg}-depth.png""#;
    let cli = h.client(registry(vec![sh("libheif", 0, extra)]));

    let resp = cli
        .post("/convert")
        .multipart(image_form(heic_bytes()))
        .send()
        .await;

    resp.assert_status_is_ok();
    resp.0.into_body().into_vec().await.unwrap();
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn malformed_multipart_is_not_reported_as_missing_file() {
    let h = Harness::new();
    let cli = h.client(registry(vec![sh("primary", 0, &touch(&h.marker))]));

    let resp = cli
        .post("/convert")
        .content_type("multipart/form-data; boundary=XYZ")
        .body("--XYZ\r\nContent-Disposition: form-da")
        .send()
        .await;

    resp.assert_status(StatusCode::BAD_REQUEST);
    let text = resp.0.into_body().into_string().await.unwrap();
    assert_ne!(text, "No image file provided");
    assert_eq!(h.leftovers(), 0);
    assert!(!h.marker.exists());
}

#[tokio::test]
async fn unread_response_body_still_cleans_up() {
    let h = Harness::new();
    let cli = h.client(registry(vec![sh("primary", 0, COPY)]));

    let resp = cli
        .post("/convert")
        .multipart(image_form(heic_bytes()))
        .send()
        .await;

    resp.assert_status_is_ok();
    assert_eq!(h.leftovers(), 1);

    // client hangs up without reading
    drop(resp);
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn repeated_conversions_do_not_collide() {
    let h = Harness::new();
    let cli = h.client(registry(vec![sh("primary", 0, COPY)]));

    let first = cli
        .post("/convert")
        .multipart(image_form(heic_bytes()))
        .send()
        .await;
    let second = cli
        .post("/convert")
        .multipart(image_form(heic_bytes()))
        .send()
        .await;

    first.assert_status_is_ok();
    second.assert_status_is_ok();
    // both request directories are live at once under distinct names
    assert_eq!(h.leftovers(), 2);

    let a = first.0.into_body().into_vec().await.unwrap();
    let b = second.0.into_body().into_vec().await.unwrap();
    assert_eq!(a, b);
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn health_reports_converter_version() {
    let h = Harness::new();
    let reg = registry(vec![]).with_version(CommandTemplate::new(
        "sh",
        ["-c", "echo 'Version: ImageMagick 7.1.1-43 Q16-HDRI'; echo 'Features: Cipher'"],
    ));
    let cli = h.client(reg);

    let resp = cli.get("/health").send().await;

    resp.assert_status_is_ok();
    let text = resp.0.into_body().into_string().await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(
        json["converter_version"],
        "Version: ImageMagick 7.1.1-43 Q16-HDRI"
    );
    assert_eq!(
        json["uploads_dir"],
        h.uploads.canonicalize().unwrap().display().to_string()
    );
}

#[tokio::test]
async fn health_fails_when_converter_missing() {
    let h = Harness::new();
    let reg = registry(vec![])
        .with_version(CommandTemplate::new("no-such-magick-binary", ["-version"]));
    let cli = h.client(reg);

    let resp = cli.get("/health").send().await;

    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let text = resp.0.into_body().into_string().await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["status"], "unhealthy");
    assert!(json["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn index_is_alive() {
    let h = Harness::new();
    let cli = h.client(registry(vec![]));

    let resp = cli.get("/").send().await;

    resp.assert_status_is_ok();
    resp.assert_text("HEIC to JPEG converter is running").await;
}
