//! Collaborator seams: where messages come from and where events go.
//!
//! The mail provider, calendar provider, and AI scorer live outside this
//! crate. They are consumed through the async traits below so any provider
//! (Gmail, IMAP, a fixture in tests) can be plugged in.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EventIntent;

/// Personal mailbox domains. Never treated as an organization's domain.
pub const PERSONAL_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "yahoo.com",
    "icloud.com",
    "me.com",
    "live.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
];

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Returns true if the same call may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Timeout(_) | SourceError::Provider(_))
    }
}

// ============================================================================
// Message
// ============================================================================

/// A fetched email: headers, decoded body text, and provider receive time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub id: String,
    /// Header names are matched case-insensitively via [`EmailMessage::header`].
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    pub internal_date: DateTime<Utc>,
}

impl EmailMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn subject(&self) -> &str {
        self.header("Subject").unwrap_or("").trim()
    }

    /// Bare sender address, lower-cased.
    pub fn sender_email(&self) -> String {
        extract_email_address(self.header("From").unwrap_or(""))
    }

    pub fn sender_name(&self) -> Option<String> {
        extract_display_name(self.header("From").unwrap_or(""))
    }

    pub fn sender_domain(&self) -> String {
        extract_domain(&self.sender_email())
    }

    /// First 200 characters of the body with whitespace collapsed.
    pub fn snippet(&self) -> String {
        let collapsed = self.body.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.chars().take(200).collect()
    }

    /// Subject and body joined, the form handed to classifiers.
    pub fn text_for_scoring(&self) -> String {
        format!("{}\n\n{}", self.subject(), self.body)
    }
}

/// Extract bare email from a "From" header like "Name <email@example.com>".
pub fn extract_email_address(from_field: &str) -> String {
    if let Some(start) = from_field.find('<') {
        if let Some(end) = from_field.find('>') {
            if end > start {
                return from_field[start + 1..end].trim().to_lowercase();
            }
        }
    }
    from_field.trim().to_lowercase()
}

/// Extract the display name from a "From" header like `"Jane Doe" <jane@school.org>`.
pub fn extract_display_name(from_field: &str) -> Option<String> {
    let trimmed = from_field.trim();
    let angle_start = trimmed.find('<')?;
    let name = trimmed[..angle_start].trim().trim_matches('"').trim();
    if name.is_empty() || name.contains('@') {
        return None;
    }
    Some(name.to_string())
}

/// Extract domain from an email address.
pub fn extract_domain(email_addr: &str) -> String {
    if let Some(at_pos) = email_addr.rfind('@') {
        email_addr[at_pos + 1..].trim().to_lowercase()
    } else {
        String::new()
    }
}

pub fn is_personal_domain(domain: &str) -> bool {
    PERSONAL_EMAIL_DOMAINS
        .iter()
        .any(|d| d.eq_ignore_ascii_case(domain))
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Read access to a mailbox.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Message ids matching a provider query, newest first, at most `limit`.
    async fn list_messages(&self, query: &str, limit: u32) -> Result<Vec<String>, SourceError>;

    async fn get_message(&self, id: &str) -> Result<EmailMessage, SourceError>;
}

/// Write access to a calendar.
#[async_trait]
pub trait CalendarSink: Send + Sync {
    /// Create the event and return the provider's event id.
    async fn create_event(&self, event: &EventIntent) -> Result<String, SourceError>;
}
