//! Tagged text protocol carried in the `ping` property.
//!
//! Wire form is `PING:<tag>:<text>` with a single decimal digit tag. Anything
//! that does not start with that pattern is an implicit name request whose
//! whole body is the plant name.

use std::fmt;

const PREFIX: &str = "PING:";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Purpose of a message on the shared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestTag {
    /// 1: look up care instructions for a plant name.
    Name,
    /// 2: water now.
    Water,
    /// 3: diagnose symptoms.
    Diagnosis,
    /// Any other digit. Kept so the reply can echo it back.
    Unknown(u8),
}

impl RequestTag {
    pub(crate) fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Name,
            2 => Self::Water,
            3 => Self::Diagnosis,
            other => Self::Unknown(other),
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Name => 1,
            Self::Water => 2,
            Self::Diagnosis => 3,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedRequest {
    pub(crate) tag: RequestTag,
    pub(crate) content: String,
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Decode a raw property value. Never fails: an unmatched value is a name
/// request.
pub(crate) fn parse(raw: &str) -> DecodedRequest {
    let trimmed = raw.trim();

    if let Some(rest) = trimmed.strip_prefix(PREFIX) {
        let mut chars = rest.chars();
        if let (Some(digit), Some(':')) = (chars.next(), chars.next()) {
            if let Some(code) = digit.to_digit(10) {
                return DecodedRequest {
                    tag: RequestTag::from_code(code as u8),
                    content: chars.as_str().trim().to_string(),
                };
            }
        }
    }

    DecodedRequest {
        tag: RequestTag::Name,
        content: trimmed.to_string(),
    }
}

pub(crate) fn format(tag: RequestTag, text: &str) -> String {
    format!("{PREFIX}{tag}:{text}")
}

// ===========================================================================
// Tests
// ===========================================================================
