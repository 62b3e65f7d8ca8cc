use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use poem::{
    handler,
    http::header,
    web::{Data, Multipart},
    Body, Response,
};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{error, info, warn};

use crate::{
    api::{gen_err_response, params::upload_params::UploadArtifact},
    core::{pipeline, sniff},
    error::ConvertError,
    storage::RequestDir,
    AppState,
};

pub const DOWNLOAD_NAME: &str = "converted.jpg";

#[handler]
pub async fn convert(multipart: Multipart, Data(state): Data<&Arc<AppState>>) -> Response {
    match handle(multipart, state).await {
        Ok(resp) => resp,
        Err(e) => {
            if e.is_client_error() {
                info!("rejected upload: {}", e);
            } else if let ConvertError::Conversion(failure) = &e {
                error!("{}, probe: {:?}", e, failure.probe);
            } else {
                error!("{:?}", e);
            }
            gen_err_response(e.status(), e.public_message())
        }
    }
}

/// RECEIVED -> SNIFFED -> CONVERTING -> STREAMING | FAILED -> CLEANED_UP.
///
/// Cleanup rides on the `RequestDir` drop: error paths drop it on return, the
/// success path hands it to the response body.
async fn handle(multipart: Multipart, state: &AppState) -> Result<Response, ConvertError> {
    let upload =
        UploadArtifact::from_multipart(multipart, &state.storage, state.max_upload_bytes).await?;

    if let sniff::SniffOutcome::Rejected(reason) = sniff::sniff(upload.path()).await? {
        return Err(ConvertError::UnsupportedFormat(reason));
    }

    let output = upload.dir.output_slot();
    let artifact = pipeline::convert(upload.path(), &output, &state.registry)
        .await
        .map_err(ConvertError::Conversion)?;

    info!(
        "{} bytes converted by {}, streaming {}",
        upload.len,
        artifact.converter,
        artifact.path.display()
    );

    let file = tokio::fs::File::open(&artifact.path).await?;
    let reader = CleanupReader {
        inner: file,
        finished: false,
        _dir: upload.dir,
    };

    Ok(Response::builder()
        .content_type("image/jpeg")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{DOWNLOAD_NAME}\""),
        )
        .header("x-converter", artifact.converter)
        .body(Body::from_async_read(reader)))
}

/// Response body reader that owns the request's directory. Whether the body
/// is read to the end or dropped because the client went away, the directory
/// goes with it.
struct CleanupReader<R> {
    inner: R,
    finished: bool,
    _dir: RequestDir,
}

impl<R: AsyncRead + Unpin> AsyncRead for CleanupReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            // zero bytes into a non-full buffer is EOF
            if had_room && buf.filled().len() == before {
                self.finished = true;
            }
        }
        poll
    }
}

impl<R> Drop for CleanupReader<R> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("response stream dropped before completion");
        }
    }
}
