use std::path::{Path, PathBuf};

use poem::web::Multipart;
use tokio::{fs::File, io::AsyncReadExt, io::AsyncWriteExt};
use tracing::{debug, info};

use crate::{
    error::ConvertError,
    storage::{RequestDir, TempStorage},
};

pub const IMAGE_FIELD: &str = "image";

pub struct UploadArtifact {
    pub dir: RequestDir,
    path: PathBuf,
    /// Client supplied, untrusted, like `content_type`.
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub len: u64,
}

impl UploadArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Streams the first `image` field into a fresh request directory. Storage
    /// is only touched once that field shows up.
    pub async fn from_multipart(
        mut multipart: Multipart,
        storage: &TempStorage,
        max_bytes: u64,
    ) -> Result<UploadArtifact, ConvertError> {
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => return Err(ConvertError::MissingFile),
                Err(e) => {
                    debug!("multipart parse error: {:?}", e);
                    return Err(ConvertError::MalformedBody(e.to_string()));
                }
            };

            if field.name() != Some(IMAGE_FIELD) {
                continue;
            }

            let original_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);

            let dir = storage.allocate_request_dir()?;
            let path = dir.input_slot();
            let mut file = File::create(&path).await?;

            let mut reader = Box::pin(field.into_async_read().take(max_bytes.saturating_add(1)));
            let len = tokio::io::copy(&mut reader, &mut file)
                .await
                .map_err(ConvertError::Upload)?;
            file.flush().await?;

            if len > max_bytes {
                return Err(ConvertError::UploadTooLarge(max_bytes));
            }

            info!(
                "received upload name={:?} content_type={:?} bytes={}",
                original_name, content_type, len
            );

            return Ok(UploadArtifact {
                dir,
                path,
                original_name,
                content_type,
                len,
            });
        }
    }
}
