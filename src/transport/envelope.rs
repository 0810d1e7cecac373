// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Origin-prefixed message framing.
//!
//! ```text
//! <origin-server><DELIMITER><payload>
//! ```
//!
//! Decoding splits at the first delimiter. Server names are validated not to
//! contain it, so the payload itself may contain anything.

/// Separator between the publishing server's name and the payload.
pub const DELIMITER: &str = "\u{1e}|>";

/// A decoded pub/sub message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub origin: String,
    pub payload: String,
}

impl Envelope {
    pub fn new(origin: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        encode(&self.origin, &self.payload)
    }

    /// Parse a raw channel message. `None` if it carries no delimiter.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        raw.split_once(DELIMITER)
            .map(|(origin, payload)| Self::new(origin, payload))
    }

    #[must_use]
    pub fn is_from(&self, server_name: &str) -> bool {
        self.origin == server_name
    }
}

#[must_use]
pub fn encode(origin: &str, payload: &str) -> String {
    let mut framed = String::with_capacity(origin.len() + DELIMITER.len() + payload.len());
    framed.push_str(origin);
    framed.push_str(DELIMITER);
    framed.push_str(payload);
    framed
}
