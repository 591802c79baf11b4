use crate::constants::{ALLOWED_ATTACHMENT_TYPES, MAX_ATTACHMENT_SIZE};
use crate::error::AttachmentError;

// Upload policy for message attachments: images only, bounded size.
// Runs before anything leaves the client.
pub fn check_attachment(content_type: &str, size: usize) -> Result<(), AttachmentError> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if !ALLOWED_ATTACHMENT_TYPES.contains(&mime.as_str()) {
        return Err(AttachmentError::UnsupportedType(content_type.to_string()));
    }

    if size == 0 {
        return Err(AttachmentError::Empty);
    }

    if size > MAX_ATTACHMENT_SIZE {
        return Err(AttachmentError::TooLarge {
            size,
            max: MAX_ATTACHMENT_SIZE,
        });
    }

    Ok(())
}

/// Storage object name for an upload: millisecond prefix keeps names unique
/// per uploader without a round trip.
pub fn object_name(file_name: &str, unix_millis: i64) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{unix_millis}-{sanitized}")
}
