//! Error taxonomy for the Opal driver adapter.
//!
//! Every fallible network operation surfaces one of these variants so that a
//! DataSHIELD orchestrator can decide whether a failure was its own fault
//! (bad expression, bad credentials) or the server's.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DsError {
    /// Non-2xx HTTP response on an operation that does not tolerate failure.
    /// The message carries a truncated body snippet for diagnostics.
    #[error("Opal API error {status} on {path}: {message}")]
    Http {
        status: u16,
        path: String,
        message: String,
    },

    /// Transport-level failure (connection, TLS, timeout) with no usable
    /// HTTP status attached.
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered but the response did not have the expected shape,
    /// e.g. a session record without an id.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credential verification failed at connection time.
    #[error("failed to authenticate on {url} with {mode}")]
    Authentication { url: String, mode: String },

    /// An asynchronous R command terminated with FAILED status on the server.
    #[error("command {id} failed on {server}: {message}")]
    CommandFailed {
        id: String,
        server: String,
        message: String,
    },
}

impl DsError {
    /// HTTP status code of the underlying failure, when one is available.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// A failure the caller can act on: 4xx responses, or any failure that
    /// carries no status code at all (protocol, auth, remote command).
    pub fn is_client_error(&self) -> bool {
        match self.status() {
            Some(code) => (400..500).contains(&code),
            None => true,
        }
    }

    /// A failure on the server side: 5xx responses only.
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(code) if code >= 500)
    }
}
