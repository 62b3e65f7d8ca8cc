use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub convert_timeout: Duration,
    pub max_upload_bytes: u64,
    pub magick_bin: String,
    pub heif_convert_bin: String,
    pub jpeg_quality: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            upload_dir: PathBuf::from("uploads"),
            convert_timeout: Duration::from_secs(30),
            max_upload_bytes: 50 * 1024 * 1024,
            magick_bin: "magick".to_string(),
            heif_convert_bin: "heif-convert".to_string(),
            jpeg_quality: 90,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<AppConfig> {
        let default = AppConfig::default();

        Ok(AppConfig {
            host: env::var("HOST").unwrap_or(default.host),
            port: parse_var("PORT")?.unwrap_or(default.port),
            upload_dir: env::var_os("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),
            convert_timeout: parse_var("CONVERT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(default.convert_timeout),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES")?.unwrap_or(default.max_upload_bytes),
            magick_bin: env::var("MAGICK_BIN").unwrap_or(default.magick_bin),
            heif_convert_bin: env::var("HEIF_CONVERT_BIN").unwrap_or(default.heif_convert_bin),
            jpeg_quality: parse_var("JPEG_QUALITY")?.unwrap_or(default.jpeg_quality),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => {
            let v = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {name}: {raw:?}"))?;
            Ok(Some(v))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("cannot read {name}")),
    }
}
