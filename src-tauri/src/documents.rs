//! Invoice document intake: PDF sanity checks and data-URI encoding.

use std::fs;
use std::io::Read;
use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;
pub const PDF_MIME: &str = "application/pdf";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn invalid(reason: &str) -> Self {
        Self {
            valid: false,
            error: Some(reason.to_string()),
        }
    }
}

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Check that `path` exists, is at most 50 MB and starts with a PDF header.
///
/// Rejections are reported in the returned value. Failing to stat, open or
/// read an existing path is an error.
pub fn validate_pdf(path: &Path) -> Result<FileValidation> {
    if !path.exists() {
        return Ok(FileValidation::invalid("File not found."));
    }
    if fs::metadata(path)?.len() > MAX_DOCUMENT_BYTES {
        return Ok(FileValidation::invalid("File too large (max 50MB)."));
    }

    let mut header = Vec::with_capacity(PDF_MAGIC.len());
    fs::File::open(path)?
        .take(PDF_MAGIC.len() as u64)
        .read_to_end(&mut header)?;

    Ok(if header.len() < PDF_MAGIC.len() {
        FileValidation::invalid("Not a valid PDF (could not read header).")
    } else if header != PDF_MAGIC {
        FileValidation::invalid("Not a valid PDF file.")
    } else {
        FileValidation::ok()
    })
}

/// Validate and encode a PDF as `data:application/pdf;base64,...`.
pub fn read_pdf_as_data_uri(path: &Path) -> Result<String> {
    let check = validate_pdf(path)?;
    if !check.valid {
        return Err(Error::InvalidDocument(
            check.error.unwrap_or_else(|| "Invalid document.".to_string()),
        ));
    }
    let bytes = fs::read(path)?;
    Ok(encode_data_uri(PDF_MIME, &bytes))
}

pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Borrowed view of a `data:<mime>;base64,<payload>` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUri<'a> {
    pub mime_type: &'a str,
    pub data: &'a str,
}

impl<'a> DataUri<'a> {
    pub fn parse(uri: &'a str) -> Result<Self> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| Error::InvalidDocument("data URI must start with 'data:'".to_string()))?;
        let (meta, data) = rest
            .split_once(',')
            .ok_or_else(|| Error::InvalidDocument("data URI has no payload".to_string()))?;
        let mime_type = meta
            .strip_suffix(";base64")
            .ok_or_else(|| Error::InvalidDocument("data URI is not base64-encoded".to_string()))?;
        if mime_type.is_empty() {
            return Err(Error::InvalidDocument("data URI has no MIME type".to_string()));
        }
        if data.is_empty() {
            return Err(Error::InvalidDocument("data URI payload is empty".to_string()));
        }
        Ok(Self { mime_type, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[test]
    fn missing_file_is_invalid() {
        let check = validate_pdf(Path::new("/definitely/not/here.pdf")).unwrap();
        assert!(!check.valid);
        assert_eq!(check.error.as_deref(), Some("File not found."));
    }

    #[test]
    fn short_or_foreign_header_is_invalid() {
        let short = write_temp(b"%PD");
        assert!(!validate_pdf(short.path()).unwrap().valid);

        let png = write_temp(b"\x89PNG\r\n\x1a\n0000");
        let check = validate_pdf(png.path()).unwrap();
        assert_eq!(check.error.as_deref(), Some("Not a valid PDF file."));
    }

    #[test]
    fn unreadable_path_is_an_error_not_a_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_pdf(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err:?}");
    }

    #[test]
    fn pdf_round_trips_through_data_uri() {
        let pdf = write_temp(b"%PDF-1.7\n%minimal\n");
        assert!(validate_pdf(pdf.path()).unwrap().valid);

        let uri = read_pdf_as_data_uri(pdf.path()).unwrap();
        let parsed = DataUri::parse(&uri).unwrap();
        assert_eq!(parsed.mime_type, PDF_MIME);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(parsed.data)
            .unwrap();
        assert_eq!(decoded, b"%PDF-1.7\n%minimal\n");
    }

    #[test]
    fn reading_a_non_pdf_fails() {
        let text = write_temp(b"hello world");
        let err = read_pdf_as_data_uri(text.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(ref m) if m == "Not a valid PDF file."));
    }

    #[test]
    fn malformed_data_uris_are_rejected() {
        for uri in [
            "",
            "application/pdf;base64,AAAA",
            "data:application/pdf,AAAA",
            "data:;base64,AAAA",
            "data:application/pdf;base64,",
            "data:application/pdf;base64",
        ] {
            assert!(DataUri::parse(uri).is_err(), "{uri}");
        }
    }
}
