//! Decoding of inline image payloads into displayable artifacts.
//!
//! Upstream encoders disagree on base64 flavour (standard vs URL-safe, padded
//! vs unpadded, occasionally percent-encoded), so the payload is normalized
//! before decoding. When decoding still fails the artifact degrades to a
//! `data:` URI built from the cleaned text instead of being lost.

use super::mime::artifact_extension;
use crate::agent::types::InlineData;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use thiserror::Error;

static CANONICAL_BASE64: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]*={0,2}$").expect("static base64 pattern"));

/// Standard alphabet, accepting both padded and unpadded input.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("inline data is empty")]
    Empty,

    #[error("inline data is not valid percent-encoded text: {0}")]
    PercentDecode(String),
}

/// Backing storage of a decoded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Decoded bytes, shared between snapshots and freed with the last handle.
    Bytes(Arc<[u8]>),
    /// Self-contained `data:` URI used when the payload could not be decoded.
    DataUri(String),
}

/// A decoded inline image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    mime_type: String,
    display_name: Option<String>,
    source: ArtifactSource,
}

impl ImageArtifact {
    pub fn from_bytes(
        mime_type: impl Into<String>,
        display_name: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            mime_type: mime_type.into(),
            display_name,
            source: ArtifactSource::Bytes(Arc::from(bytes)),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn source(&self) -> &ArtifactSource {
        &self.source
    }

    /// Decoded bytes, or `None` for the data-URI fallback.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.source {
            ArtifactSource::Bytes(bytes) => Some(&bytes[..]),
            ArtifactSource::DataUri(_) => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, ArtifactSource::DataUri(_))
    }

    /// Renderable `data:` URI for this artifact.
    pub fn data_uri(&self) -> String {
        match &self.source {
            ArtifactSource::Bytes(bytes) => {
                format!("data:{};base64,{}", self.mime_type, STANDARD.encode(bytes))
            }
            ArtifactSource::DataUri(uri) => uri.clone(),
        }
    }

    /// File name to persist this artifact under.
    pub fn file_name(&self, index: usize) -> String {
        match &self.display_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => format!(
                "image-{}.{}",
                index + 1,
                artifact_extension(&self.mime_type, self.bytes())
            ),
        }
    }
}

impl Serialize for ImageArtifact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ImageArtifact", 4)?;
        state.serialize_field("mimeType", &self.mime_type)?;
        state.serialize_field("displayName", &self.display_name)?;
        state.serialize_field("byteLength", &self.bytes().map(<[u8]>::len))?;
        state.serialize_field("fallback", &self.is_fallback())?;
        state.end()
    }
}

/// Normalize a base64 payload: strip whitespace, convert URL-safe characters
/// (re-padding to a multiple of four), then undo any percent-encoding.
pub fn normalize_base64(raw: &str) -> Result<String, ArtifactError> {
    let mut cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.contains('-') || cleaned.contains('_') {
        cleaned = cleaned.replace('-', "+").replace('_', "/");
        while cleaned.len() % 4 != 0 {
            cleaned.push('=');
        }
    }

    if cleaned.contains('%') {
        cleaned = urlencoding::decode(&cleaned)
            .map_err(|e| ArtifactError::PercentDecode(e.to_string()))?
            .into_owned();
    }

    Ok(cleaned)
}

/// Decode an inline payload into an [`ImageArtifact`].
pub fn decode_inline_image(inline: &InlineData) -> Result<ImageArtifact, ArtifactError> {
    let cleaned = normalize_base64(&inline.data)?;
    if cleaned.is_empty() {
        return Err(ArtifactError::Empty);
    }

    if !CANONICAL_BASE64.is_match(&cleaned) {
        tracing::warn!(
            "Inline data for {} is not canonical base64 ({} chars), decoding anyway",
            inline.mime_type,
            cleaned.len()
        );
    }

    let source = match LENIENT.decode(&cleaned) {
        Ok(bytes) => {
            tracing::debug!(
                "Decoded {} byte {} artifact",
                bytes.len(),
                inline.mime_type
            );
            ArtifactSource::Bytes(Arc::from(bytes))
        }
        Err(e) => {
            tracing::warn!(
                "Failed to decode inline {} data ({}), falling back to data URI",
                inline.mime_type,
                e
            );
            ArtifactSource::DataUri(format!("data:{};base64,{}", inline.mime_type, cleaned))
        }
    };

    Ok(ImageArtifact {
        mime_type: inline.mime_type.clone(),
        display_name: inline.display_name.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    fn inline(data: &str) -> InlineData {
        InlineData {
            data: data.to_string(),
            mime_type: "image/png".to_string(),
            display_name: None,
        }
    }

    #[test]
    fn test_decode_standard_base64() {
        let encoded = STANDARD.encode(PNG_HEADER);
        let artifact = decode_inline_image(&inline(&encoded)).unwrap();
        assert_eq!(artifact.bytes(), Some(&PNG_HEADER[..]));
        assert_eq!(artifact.mime_type(), "image/png");
        assert!(!artifact.is_fallback());
    }

    #[test]
    fn test_url_safe_unpadded_matches_standard() {
        // Chosen so the standard encoding contains both '+' and '/'.
        let bytes: Vec<u8> = vec![0xFB, 0xFF, 0xBF, 0xFE, 0x01];
        let standard = STANDARD.encode(&bytes);
        assert!(standard.contains('+') && standard.contains('/'));

        let url_safe = standard
            .trim_end_matches('=')
            .replace('+', "-")
            .replace('/', "_");

        let from_standard = decode_inline_image(&inline(&standard)).unwrap();
        let from_url_safe = decode_inline_image(&inline(&url_safe)).unwrap();
        assert_eq!(from_url_safe.bytes(), from_standard.bytes());
        assert_eq!(from_url_safe.bytes(), Some(&bytes[..]));
    }

    #[test]
    fn test_whitespace_is_stripped() {
        let encoded = STANDARD.encode(PNG_HEADER);
        let (a, b) = encoded.split_at(4);
        let wrapped = format!(" {}\n\t{} \r\n", a, b);
        let artifact = decode_inline_image(&inline(&wrapped)).unwrap();
        assert_eq!(artifact.bytes(), Some(&PNG_HEADER[..]));
    }

    #[test]
    fn test_percent_encoded_payload() {
        let encoded = STANDARD.encode([0xFB, 0xFF]);
        assert_eq!(encoded, "+/8=");
        let artifact = decode_inline_image(&inline("%2B%2F8%3D")).unwrap();
        assert_eq!(artifact.bytes(), Some(&[0xFB, 0xFF][..]));
    }

    #[test]
    fn test_unpadded_standard_payload_decodes() {
        let artifact = decode_inline_image(&inline("+/8")).unwrap();
        assert_eq!(artifact.bytes(), Some(&[0xFB, 0xFF][..]));
    }

    #[test]
    fn test_garbage_falls_back_to_data_uri() {
        let artifact = decode_inline_image(&inline("not*base64!")).unwrap();
        assert!(artifact.is_fallback());
        assert_eq!(artifact.bytes(), None);
        assert_eq!(artifact.data_uri(), "data:image/png;base64,not*base64!");
    }

    #[test]
    fn test_empty_payload_is_an_error() {
        assert_eq!(
            decode_inline_image(&inline("  \n ")).unwrap_err(),
            ArtifactError::Empty
        );
    }

    #[test]
    fn test_invalid_percent_sequence_is_an_error() {
        let err = decode_inline_image(&inline("%FF%FE")).unwrap_err();
        assert!(matches!(err, ArtifactError::PercentDecode(_)));
    }

    #[test]
    fn test_data_uri_round_trips_bytes() {
        let artifact = ImageArtifact::from_bytes("image/png", None, PNG_HEADER.to_vec());
        assert_eq!(
            artifact.data_uri(),
            format!("data:image/png;base64,{}", STANDARD.encode(PNG_HEADER))
        );
    }

    #[test]
    fn test_file_name_prefers_display_name() {
        let named = ImageArtifact::from_bytes(
            "image/png",
            Some("chart.png".to_string()),
            PNG_HEADER.to_vec(),
        );
        let unnamed = ImageArtifact::from_bytes("image/png", None, PNG_HEADER.to_vec());
        assert_eq!(named.file_name(0), "chart.png");
        assert_eq!(unnamed.file_name(2), "image-3.png");
    }

    #[test]
    fn test_clones_share_bytes() {
        let artifact = ImageArtifact::from_bytes("image/png", None, PNG_HEADER.to_vec());
        let copy = artifact.clone();
        match (artifact.source(), copy.source()) {
            (ArtifactSource::Bytes(a), ArtifactSource::Bytes(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected decoded bytes"),
        }
    }
}
