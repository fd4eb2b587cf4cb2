use thiserror::Error;

pub const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Width of `documents.file_name`, in characters.
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// Accepted extensions and the declared MIME types each one may carry.
pub const ALLOWED_FILE_TYPES: &[(&str, &[&str])] = &[
    ("pdf", &["application/pdf"]),
    (
        "docx",
        &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
    ),
    (
        "xlsx",
        &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
    ),
    ("png", &["image/png"]),
    ("jpg", &["image/jpeg", "image/jpg"]),
    ("jpeg", &["image/jpeg", "image/jpg"]),
    ("csv", &["text/csv", "application/csv"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid file type. Allowed types: {}", allowed_extensions_label())]
    InvalidFileType,
    #[error(
        "file size exceeds the maximum allowed size of 10 MB ({} bytes)",
        MAX_FILE_SIZE_BYTES
    )]
    FileTooLarge,
}

pub fn allowed_extensions_label() -> String {
    ALLOWED_FILE_TYPES
        .iter()
        .map(|(ext, _)| ext.to_uppercase())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn extract_extension(name: &str) -> Option<String> {
    let (_, extension) = name.rsplit_once('.')?;
    if extension.is_empty() {
        return None;
    }
    Some(extension.to_lowercase())
}

fn allowed_mime_types(extension: &str) -> Option<&'static [&'static str]> {
    ALLOWED_FILE_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mimes)| *mimes)
}

pub fn validate_type(name: &str, declared_mime_type: &str) -> bool {
    let Some(extension) = extract_extension(name) else {
        return false;
    };
    let Some(allowed) = allowed_mime_types(&extension) else {
        return false;
    };

    let declared = declared_mime_type.trim();
    allowed
        .iter()
        .any(|mime| mime.eq_ignore_ascii_case(declared))
}

pub fn validate_size(size: u64) -> bool {
    size <= MAX_FILE_SIZE_BYTES
}

/// Type is checked before size; the first failing rule wins.
pub fn validate(name: &str, declared_mime_type: &str, size: u64) -> Result<(), ValidationError> {
    if !validate_type(name, declared_mime_type) {
        return Err(ValidationError::InvalidFileType);
    }
    if !validate_size(size) {
        return Err(ValidationError::FileTooLarge);
    }
    Ok(())
}
