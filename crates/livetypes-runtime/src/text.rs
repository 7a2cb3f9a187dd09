//! Text-encoding service used by the character and string types

use crate::error::MarshalError;

/// Host text ↔ native narrow (multibyte) and wide byte sequences
///
/// Implementations never add terminators; the string descriptors do that.
pub trait TextCodec: Send + Sync {
    fn to_multibyte(&self, text: &str) -> Result<Vec<u8>, MarshalError>;
    fn from_multibyte(&self, bytes: &[u8]) -> Result<String, MarshalError>;
    fn to_wide(&self, text: &str) -> Result<Vec<u8>, MarshalError>;
    fn from_wide(&self, bytes: &[u8]) -> Result<String, MarshalError>;
}

/// Narrow text as UTF-8, wide text as little-endian UTF-16
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Codec;

impl TextCodec for Utf8Codec {
    fn to_multibyte(&self, text: &str) -> Result<Vec<u8>, MarshalError> {
        if text.contains('\0') {
            return Err(MarshalError::InvalidText(format!(
                "String contains null byte: {:?}",
                text
            )));
        }
        Ok(text.as_bytes().to_vec())
    }

    fn from_multibyte(&self, bytes: &[u8]) -> Result<String, MarshalError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| MarshalError::InvalidText(format!("Invalid UTF-8: {}", e)))
    }

    fn to_wide(&self, text: &str) -> Result<Vec<u8>, MarshalError> {
        if text.contains('\0') {
            return Err(MarshalError::InvalidText(format!(
                "String contains null character: {:?}",
                text
            )));
        }
        Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect())
    }

    fn from_wide(&self, bytes: &[u8]) -> Result<String, MarshalError> {
        if bytes.len() % 2 != 0 {
            return Err(MarshalError::InvalidText(format!(
                "Odd byte length {} for UTF-16",
                bytes.len()
            )));
        }
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|e| MarshalError::InvalidText(format!("Invalid UTF-16: {}", e)))
    }
}
