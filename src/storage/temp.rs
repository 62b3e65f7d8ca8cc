use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};
use uuid::Uuid;

const INPUT_NAME: &str = "input.heic";
const OUTPUT_NAME: &str = "output.jpg";

/// Each request works inside its own uuid-named subdirectory, so concurrent
/// requests never share a path and anything a converter drops next to its
/// output goes away with the directory.
#[derive(Debug, Clone)]
pub struct TempStorage {
    dir: PathBuf,
}

impl TempStorage {
    /// Creates the directory if it is missing. Failing here means the process
    /// has nowhere to put uploads, so callers treat it as fatal.
    pub fn new(dir: impl AsRef<Path>) -> std::io::Result<TempStorage> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let dir = dir.canonicalize()?;

        Ok(TempStorage { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn allocate_request_dir(&self) -> std::io::Result<RequestDir> {
        let path = self.dir.join(Uuid::new_v4().to_string());
        std::fs::create_dir(&path)?;
        debug!("allocated request dir {}", path.display());

        Ok(RequestDir { path })
    }

    /// Best-effort removal of files or whole directories. Never fails;
    /// problems end up in the log.
    pub fn release<'a>(paths: impl IntoIterator<Item = &'a Path>) {
        for path in paths {
            let r = if path.is_dir() {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            match r {
                Ok(()) => debug!("removed {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("remove {} error: {:?}", path.display(), e),
            }
        }
    }
}

/// One request's private directory, removed with everything in it on drop.
#[derive(Debug)]
pub struct RequestDir {
    path: PathBuf,
}

impl RequestDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn input_slot(&self) -> PathBuf {
        self.path.join(INPUT_NAME)
    }

    pub fn output_slot(&self) -> PathBuf {
        self.path.join(OUTPUT_NAME)
    }
}

impl Drop for RequestDir {
    fn drop(&mut self) {
        TempStorage::release([self.path.as_path()]);
    }
}
