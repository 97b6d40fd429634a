// Upload checks applied before any parsing happens

use std::path::Path;

use crate::{RagError, Result};

/// Reject uploads that are not PDFs, empty, or larger than `max_bytes`
#[inline]
pub fn validate_upload(filename: &str, size: u64, max_bytes: u64) -> Result<()> {
    validate_extension(filename)?;

    if size == 0 {
        return Err(RagError::InvalidUpload(format!(
            "{} is empty",
            display_name(filename)
        )));
    }

    if size > max_bytes {
        return Err(RagError::InvalidUpload(format!(
            "{} is {:.1} MB, larger than the {:.1} MB limit",
            display_name(filename),
            megabytes(size),
            megabytes(max_bytes)
        )));
    }

    Ok(())
}

/// Reject anything without a `.pdf` extension, in any case
#[inline]
pub fn validate_extension(filename: &str) -> Result<()> {
    let is_pdf = Path::new(filename)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        Ok(())
    } else {
        Err(RagError::InvalidUpload(format!(
            "{} is not a PDF file; only .pdf uploads are supported",
            display_name(filename)
        )))
    }
}

/// File name without any directory part
#[inline]
pub fn display_name(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(filename)
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
