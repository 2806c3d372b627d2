//! Error surface shared by every workflow in the crate.
//!
//! One error type, one kind enum. Remote failures keep the HTTP status so
//! callers can distinguish "service said no" from "service unreachable".

use std::fmt;

pub type MigrateResult<T> = Result<T, MigrateError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateErrorKind {
    /// Credentials or required infrastructure missing or incomplete.
    Configuration,
    /// Requested resource does not exist locally or remotely.
    NotFound,
    /// Remote listing failed in a way that should not overwrite local state.
    TransientQuery,
    /// Remote API returned an error status.
    RemoteApi,
    /// Operation not allowed in the item's current status.
    Precondition,
    /// Token acquisition or missing authentication.
    Auth,
    /// Transport-level failure before any HTTP status was received.
    Network,
    /// Serialization or deserialization failure.
    Parse,
    /// Invalid caller input.
    Validation,
}

impl fmt::Display for MigrateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::NotFound => "not found",
            Self::TransientQuery => "transient query",
            Self::RemoteApi => "remote api",
            Self::Precondition => "precondition",
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Validation => "validation",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateError {
    pub kind: MigrateErrorKind,
    pub message: String,
    /// HTTP status for `RemoteApi` errors.
    pub status_code: Option<u16>,
}

impl MigrateError {
    pub fn new(kind: MigrateErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(MigrateErrorKind::Configuration, message)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(MigrateErrorKind::NotFound, what)
    }

    pub fn transient_query(message: impl Into<String>) -> Self {
        Self::new(MigrateErrorKind::TransientQuery, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(MigrateErrorKind::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(MigrateErrorKind::Network, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(MigrateErrorKind::Parse, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(MigrateErrorKind::Validation, message)
    }

    pub fn remote(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: MigrateErrorKind::RemoteApi,
            message: body.into(),
            status_code: Some(status),
        }
    }

    pub fn precondition(current: impl fmt::Display, required: &str) -> Self {
        Self::new(
            MigrateErrorKind::Precondition,
            format!(
                "operation not allowed in status '{}' (requires {})",
                current, required
            ),
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == MigrateErrorKind::NotFound || self.status_code == Some(404)
    }
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} error (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for MigrateError {}

impl From<MigrateError> for String {
    fn from(e: MigrateError) -> Self {
        e.to_string()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_keeps_status() {
        let e = MigrateError::remote(409, "conflict");
        assert_eq!(e.kind, MigrateErrorKind::RemoteApi);
        assert_eq!(e.status_code, Some(409));
        assert_eq!(e.to_string(), "remote api error (HTTP 409): conflict");
    }

    #[test]
    fn precondition_message_names_both_statuses() {
        let e = MigrateError::precondition("Enabling", "Replicating or Protected");
        assert_eq!(e.kind, MigrateErrorKind::Precondition);
        assert_eq!(
            e.message,
            "operation not allowed in status 'Enabling' (requires Replicating or Protected)"
        );
    }

    #[test]
    fn not_found_detection() {
        assert!(MigrateError::not_found("item x").is_not_found());
        assert!(MigrateError::remote(404, "gone").is_not_found());
        assert!(!MigrateError::remote(500, "boom").is_not_found());
    }

    #[test]
    fn display_without_status() {
        let e = MigrateError::configuration("no vault");
        assert_eq!(e.to_string(), "configuration error: no vault");
    }

    #[test]
    fn string_conversion() {
        let s: String = MigrateError::validation("bad input").into();
        assert_eq!(s, "validation error: bad input");
    }

    #[test]
    fn kind_display() {
        assert_eq!(MigrateErrorKind::TransientQuery.to_string(), "transient query");
    }
}
