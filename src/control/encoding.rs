//! Payload encodings for control requests.
//!
//! Captured traffic is arbitrary bytes, while the control protocol is JSON.
//! `utf8` passes text through (invalid sequences become U+FFFD on the way
//! out); `base64` round-trips any bytes exactly.

use super::error::{ControlError, ControlResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::fmt;

/// Encoding of a `data` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8 text (default).
    #[default]
    Utf8,
    /// Standard base64 with padding.
    Base64,
}

impl Encoding {
    /// Parse an optional encoding name. Missing or empty means `utf8`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UnsupportedEncoding`] for any other name.
    pub fn parse(name: Option<&str>) -> ControlResult<Self> {
        match name.unwrap_or("") {
            "" | "utf8" => Ok(Encoding::Utf8),
            "base64" => Ok(Encoding::Base64),
            other => Err(ControlError::UnsupportedEncoding(other.to_string())),
        }
    }

    /// Turn request data into bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidBase64`] if base64 data does not decode.
    pub fn decode(self, data: &str) -> ControlResult<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(data.as_bytes().to_vec()),
            Encoding::Base64 => Ok(STANDARD.decode(data)?),
        }
    }

    /// Turn logged bytes into response data.
    pub fn encode(self, data: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Encoding::Base64 => STANDARD.encode(data),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "utf8"),
            Encoding::Base64 => write!(f, "base64"),
        }
    }
}
