//! Content-type validation of staged files.
//!
//! The detected type comes from the file's magic bytes, never from its name.
//! A file that fails validation is reported infected with an
//! `Unexpected.MimeType_<type>` signature.

use crate::core::{AvError, AvResult, ScanResult};

use std::path::Path;
use tokio::io::AsyncReadExt;

/// Signature prefix of a failed validation.
pub const MIME_SIGNATURE_PREFIX: &str = "Unexpected.MimeType_";

/// Type reported for content without a recognised signature.
pub const UNKNOWN_MIME: &str = "application/octet-stream";

/// Allow-list used when `static` validation names none.
pub const DEFAULT_VALID_MIMES: &[&str] = &[
    "image/gif",
    "image/png",
    "image/jpeg",
    "image/jpg",
    "application/pdf",
];

/// Bytes read from the start of a file for detection.
const SNIFF_LEN: u64 = 8192;

/// How detected content types are validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MimeValidation {
    /// No validation.
    #[default]
    Disabled,
    /// The detected type must equal the object's declared content type.
    ContentType,
    /// The detected type must be in the list.
    Static(Vec<String>),
}

impl MimeValidation {
    /// Builds a mode from its setting name and a comma-separated allow-list.
    ///
    /// Accepted names are `no-validation`, `s3-content-type` and `static`
    /// (underscores and case are ignored). An empty list under `static`
    /// falls back to [`DEFAULT_VALID_MIMES`].
    pub fn from_setting(mode: &str, valid_list: Option<&str>) -> AvResult<Self> {
        let normalized = mode.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "" | "no-validation" | "none" => Ok(Self::Disabled),
            "s3-content-type" | "content-type" => Ok(Self::ContentType),
            "static" => {
                let list: Vec<String> = valid_list
                    .unwrap_or_default()
                    .split(',')
                    .map(|m| m.trim().to_ascii_lowercase())
                    .filter(|m| !m.is_empty())
                    .collect();
                if list.is_empty() {
                    Ok(Self::Static(
                        DEFAULT_VALID_MIMES.iter().map(|m| m.to_string()).collect(),
                    ))
                } else {
                    Ok(Self::Static(list))
                }
            }
            other => Err(AvError::configuration(format!(
                "MIME_VALIDATION must be no-validation, s3-content-type or static, got '{}'",
                other
            ))),
        }
    }

    /// Returns `true` unless validation is disabled.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Judges a detected type against this mode.
    ///
    /// `declared` is the object's content type; parameters such as
    /// `; charset=utf-8` are ignored.
    pub fn check(&self, detected: &str, declared: Option<&str>) -> ScanResult {
        let valid = match self {
            Self::Disabled => true,
            Self::ContentType => declared
                .map(essence)
                .is_some_and(|declared| declared.eq_ignore_ascii_case(detected)),
            Self::Static(list) => list.iter().any(|m| m.eq_ignore_ascii_case(detected)),
        };
        if valid {
            ScanResult::clean()
        } else {
            ScanResult::infected(format!("{}{}", MIME_SIGNATURE_PREFIX, detected))
        }
    }

    /// Detects the type of the file at `path` and judges it.
    pub async fn check_file(&self, path: &Path, declared: Option<&str>) -> AvResult<ScanResult> {
        if !self.is_enabled() {
            return Ok(ScanResult::clean());
        }
        let detected = detect_mime(path).await?;
        let result = self.check(&detected, declared);
        tracing::debug!(
            path = %path.display(),
            detected = %detected,
            declared = ?declared,
            valid = result.is_clean(),
            "Content type checked"
        );
        Ok(result)
    }
}

/// Detects a file's type from its leading bytes.
///
/// Returns [`UNKNOWN_MIME`] when no signature matches.
pub async fn detect_mime(path: &Path) -> AvResult<String> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    file.take(SNIFF_LEN).read_to_end(&mut head).await?;
    Ok(infer::get(&head)
        .map(|kind| kind.mime_type())
        .unwrap_or(UNKNOWN_MIME)
        .to_string())
}

fn essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or(content_type).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R'];
    const PDF: &[u8] = b"%PDF-1.7\n1 0 obj\n";

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_from_setting() {
        assert_eq!(
            MimeValidation::from_setting("no-validation", None).unwrap(),
            MimeValidation::Disabled
        );
        assert_eq!(
            MimeValidation::from_setting("S3_CONTENT_TYPE", None).unwrap(),
            MimeValidation::ContentType
        );
        assert_eq!(
            MimeValidation::from_setting("static", Some("image/png, Application/PDF,")).unwrap(),
            MimeValidation::Static(vec!["image/png".into(), "application/pdf".into()])
        );
        match MimeValidation::from_setting("static", None).unwrap() {
            MimeValidation::Static(list) => assert_eq!(list.len(), DEFAULT_VALID_MIMES.len()),
            other => panic!("unexpected mode: {other:?}"),
        }
        assert!(MimeValidation::from_setting("libmagic", None).is_err());
    }

    #[tokio::test]
    async fn test_detect_mime() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_mime(&write(&dir, "x.bin", PNG)).await.unwrap(), "image/png");
        assert_eq!(detect_mime(&write(&dir, "y.png", PDF)).await.unwrap(), "application/pdf");
        assert_eq!(
            detect_mime(&write(&dir, "z.txt", b"plain words")).await.unwrap(),
            UNKNOWN_MIME
        );
    }

    #[tokio::test]
    async fn test_content_type_mode() {
        let dir = TempDir::new().unwrap();
        let png = write(&dir, "logo.png", PNG);
        let mode = MimeValidation::ContentType;

        assert!(mode.check_file(&png, Some("image/png")).await.unwrap().is_clean());
        let mismatch = mode.check_file(&png, Some("application/json")).await.unwrap();
        assert!(mismatch.is_infected());
        assert_eq!(mismatch.signature, "Unexpected.MimeType_image/png");
        assert!(mode.check_file(&png, None).await.unwrap().is_infected());
        assert!(mode.check("application/pdf", Some("application/pdf; qs=0.8")).is_clean());
    }

    #[tokio::test]
    async fn test_static_mode() {
        let dir = TempDir::new().unwrap();
        let mode = MimeValidation::from_setting("static", None).unwrap();

        let pdf = write(&dir, "doc.pdf", PDF);
        assert!(mode.check_file(&pdf, None).await.unwrap().is_clean());

        let renamed = write(&dir, "invoice.pdf", b"just some words");
        let result = mode.check_file(&renamed, Some("application/pdf")).await.unwrap();
        assert!(result.is_infected());
        assert_eq!(result.signature, "Unexpected.MimeType_application/octet-stream");
    }

    #[tokio::test]
    async fn test_disabled_never_reads() {
        let missing = Path::new("/nonexistent/file");
        let result = MimeValidation::Disabled.check_file(missing, None).await.unwrap();
        assert!(result.is_clean());
    }
}
