//! Result handles for assign and aggregate operations.
//!
//! A synchronous call resolves on the spot and its handle never touches the
//! network again. An asynchronous call hands back a handle tracking a remote
//! command id; the handle polls the command record and caches it once a
//! terminal status (COMPLETED or FAILED) is observed, so a terminal command
//! is never re-fetched.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DsError;
use crate::interface::{DsResult, Result};
use crate::opal::rest::{OpalRestClient, UriBuilder};
use crate::opal::types::CommandDto;

#[derive(Debug)]
enum ResultState {
    /// Synchronous path; the value (if any) was materialized at call time.
    Resolved(Option<Value>),
    /// Asynchronous path. `cached` only ever holds a terminal record.
    Pending {
        rid: String,
        cached: Option<CommandDto>,
    },
}

/// Handle on one Opal assign/aggregate evaluation.
#[derive(Debug)]
pub struct OpalResult {
    rest: Arc<OpalRestClient>,
    server: String,
    session_id: String,
    state: ResultState,
}

impl OpalResult {
    pub(crate) fn resolved(
        rest: Arc<OpalRestClient>,
        server: String,
        session_id: String,
        value: Option<Value>,
    ) -> Self {
        Self {
            rest,
            server,
            session_id,
            state: ResultState::Resolved(value),
        }
    }

    pub(crate) fn pending(
        rest: Arc<OpalRestClient>,
        server: String,
        session_id: String,
        rid: String,
    ) -> Self {
        Self {
            rest,
            server,
            session_id,
            state: ResultState::Pending { rid, cached: None },
        }
    }

    /// Remote command id, when this handle tracks one.
    pub fn command_id(&self) -> Option<&str> {
        match &self.state {
            ResultState::Resolved(_) => None,
            ResultState::Pending { rid, .. } => Some(rid),
        }
    }
}

fn command_uri(session_id: &str, rid: &str) -> UriBuilder {
    UriBuilder::new(["datashield", "session", session_id, "command", rid])
}

#[async_trait]
impl DsResult for OpalResult {
    async fn is_completed(&mut self) -> Result<bool> {
        let Self {
            rest,
            session_id,
            state,
            ..
        } = self;
        match state {
            ResultState::Resolved(_) => Ok(true),
            ResultState::Pending { rid, cached } => {
                if cached.is_some() {
                    return Ok(true);
                }
                let uri = command_uri(session_id, rid).query_bool("wait", false);
                let command: CommandDto = rest.get_json(&uri).await?;
                if command.is_terminal() {
                    *cached = Some(command);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn fetch(&mut self) -> Result<Option<Value>> {
        let Self {
            rest,
            server,
            session_id,
            state,
        } = self;
        match state {
            ResultState::Resolved(value) => Ok(value.clone()),
            ResultState::Pending { rid, cached } => {
                let command = match cached {
                    Some(command) => command.clone(),
                    None => {
                        // No terminal record yet: block on the server until
                        // the command terminates.
                        let uri = command_uri(session_id, rid).query_bool("wait", true);
                        let command: CommandDto = rest.get_json(&uri).await?;
                        *cached = Some(command.clone());
                        command
                    }
                };

                if command.is_failed() {
                    let message = command
                        .error
                        .clone()
                        .unwrap_or_else(|| "<no message>".to_string());
                    return Err(DsError::CommandFailed {
                        id: rid.clone(),
                        server: server.clone(),
                        message,
                    });
                }
                if !command.with_result {
                    // Side-effect-only evaluation; skip the payload request.
                    return Ok(None);
                }

                let uri = UriBuilder::new([
                    "datashield",
                    "session",
                    session_id.as_str(),
                    "command",
                    rid.as_str(),
                    "result",
                ]);
                let value: Value = rest.get_json(&uri).await?;
                Ok(Some(value))
            }
        }
    }
}
