//! Content-addressed identity for event mentions.
//!
//! A fingerprint is SHA-256 over the message identity and the normalized
//! event tuple, hex-encoded and truncated to 128 bits. Title case and
//! surrounding whitespace never affect it; the title text, start instant,
//! end instant, and all-day flag always do. Instants are compared in UTC so
//! the same moment written with different offsets collapses to one value.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::types::EventIntent;

/// Hex characters kept from the digest (128 bits).
pub const FINGERPRINT_HEX_LEN: usize = 32;

/// Field separator (ASCII unit separator). Variable-length fields are also
/// length-prefixed, so no field content can forge a boundary.
const SEP: char = '\u{1f}';

/// Deterministic dedup key for an event mention.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a stored value. Only used when reading rows back from the store.
    pub(crate) fn from_stored(value: String) -> Self {
        Fingerprint(value)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint an extracted event from a specific message.
pub fn generate(message_id: &str, event: &EventIntent) -> Fingerprint {
    let title = normalize_title(&event.title);
    let start = event.start.timestamp();
    let end = event.end.timestamp();
    let payload = format!(
        "event{SEP}{}:{}{SEP}{}:{}{SEP}{}{SEP}{}{SEP}{}",
        message_id.len(),
        message_id,
        title.len(),
        title,
        start,
        end,
        u8::from(event.all_day),
    );
    digest(&payload)
}

/// Fingerprint a message that produced no structured event.
///
/// Uses a distinct tag so it can never collide with an event fingerprint.
pub fn generate_for_message(message_id: &str) -> Fingerprint {
    let payload = format!("message{SEP}{}:{}", message_id.len(), message_id);
    digest(&payload)
}

/// NFKC-fold, lower-case, trim, and collapse inner whitespace.
/// Control characters are dropped.
pub fn normalize_title(title: &str) -> String {
    let folded: String = title
        .nfkc()
        .flat_map(char::to_lowercase)
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn digest(payload: &str) -> Fingerprint {
    let hash = Sha256::digest(payload.as_bytes());
    let mut hex = hex::encode(hash);
    hex.truncate(FINGERPRINT_HEX_LEN);
    Fingerprint(hex)
}
