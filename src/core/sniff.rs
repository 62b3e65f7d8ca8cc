//! Cheap HEIC/HEIF pre-filter.
//!
//! HEIC files are ISO-BMFF containers whose first box is normally `ftyp`,
//! followed by a brand such as `heic` or `mif1`. Only a short prefix is
//! inspected; whether the file really decodes is up to the converters.

use std::{fmt, path::Path};

use tokio::{fs::File, io::AsyncReadExt};

/// Bytes read from the head of the upload. Covers the box header, the major
/// brand and the first few compatible brands.
pub const SNIFF_WINDOW: usize = 32;

const MIN_LEN: usize = 8;
const FTYP: &[u8] = b"ftyp";
const BRANDS: [&[u8]; 2] = [b"heic", b"mif1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffOutcome {
    Accepted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooShort,
    NotIsoBmff,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TooShort => write!(f, "file shorter than {MIN_LEN} bytes"),
            RejectReason::NotIsoBmff => write!(f, "no ftyp box with a HEIF brand"),
        }
    }
}

/// Classifies an already-read prefix.
///
/// Accepts when bytes 4..8 are `ftyp`, or when `ftyp` and one of the HEIF
/// brands both appear somewhere in the window.
pub fn classify(prefix: &[u8]) -> SniffOutcome {
    if prefix.len() < MIN_LEN {
        return SniffOutcome::Rejected(RejectReason::TooShort);
    }

    if &prefix[4..8] == FTYP {
        return SniffOutcome::Accepted;
    }

    if contains(prefix, FTYP) && BRANDS.iter().any(|b| contains(prefix, b)) {
        return SniffOutcome::Accepted;
    }

    SniffOutcome::Rejected(RejectReason::NotIsoBmff)
}

/// Reads up to [`SNIFF_WINDOW`] bytes of `path` and classifies them.
pub async fn sniff(path: &Path) -> std::io::Result<SniffOutcome> {
    let file = File::open(path).await?;
    let mut prefix = Vec::with_capacity(SNIFF_WINDOW);
    file.take(SNIFF_WINDOW as u64)
        .read_to_end(&mut prefix)
        .await?;

    Ok(classify(&prefix))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
