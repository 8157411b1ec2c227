/// Sniff an image mime type from magic bytes.
pub fn detect_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

/// File extension for a known image mime type.
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}

/// Extension for an artifact, preferring the declared mime type and falling
/// back to the decoded bytes.
pub fn artifact_extension(mime_type: &str, bytes: Option<&[u8]>) -> &'static str {
    extension_for_mime(mime_type)
        .or_else(|| {
            bytes
                .and_then(detect_image_mime)
                .and_then(extension_for_mime)
        })
        .unwrap_or_else(|| {
            tracing::warn!(
                "Unrecognized image type '{}', falling back to .bin",
                mime_type
            );
            "bin"
        })
}
