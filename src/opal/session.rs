//! Remote R session lifecycle.

use std::sync::Arc;

use reqwest::{Method, StatusCode};

use crate::error::DsError;
use crate::interface::Result;
use crate::opal::rest::{OpalRestClient, UriBuilder};
use crate::opal::types::{SessionDto, SessionState};

/// One server-side DataSHIELD R session, owned by a single connection.
#[derive(Debug)]
pub struct OpalSession {
    rest: Arc<OpalRestClient>,
    id: String,
}

impl OpalSession {
    /// Create the remote session. When `asynchronous`, the server answers as
    /// soon as the session record exists and provisions the R server in the
    /// background; the record's state stays `pending` until then.
    pub(crate) async fn start(
        rest: Arc<OpalRestClient>,
        profile: Option<&str>,
        restore: Option<&str>,
        asynchronous: bool,
    ) -> Result<Self> {
        let mut uri = UriBuilder::new(["datashield", "sessions"]).query_bool("wait", !asynchronous);
        if let Some(profile) = profile {
            uri = uri.query("profile", profile);
        }
        if let Some(restore) = restore {
            uri = uri.query("restore", restore);
        }

        let response = rest.send_ok(Method::POST, &uri).await?;
        if response.status() != StatusCode::CREATED {
            return Err(DsError::Protocol(format!(
                "failed to start R session: HTTP {}",
                response.status().as_u16()
            )));
        }
        let record: SessionDto = response
            .json()
            .await
            .map_err(|e| DsError::Protocol(format!("failed to decode R session record: {e}")))?;
        let id = record.id.ok_or_else(|| {
            DsError::Protocol("failed to start R session: no session id returned".into())
        })?;

        tracing::debug!(session = %id, "R session started");
        Ok(Self { rest, id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fetch the current session record.
    pub async fn status(&self) -> Result<SessionDto> {
        self.rest
            .get_json(&UriBuilder::new(["datashield", "session", self.id.as_str()]))
            .await
    }

    pub async fn state(&self) -> Result<SessionState> {
        let record = self.status().await?;
        Ok(SessionState::parse(record.state.as_deref().unwrap_or("")))
    }

    pub async fn is_ready(&self) -> Result<bool> {
        Ok(self.state().await? == SessionState::Running)
    }

    pub async fn is_pending(&self) -> Result<bool> {
        Ok(self.state().await? == SessionState::Pending)
    }

    pub async fn is_failed(&self) -> Result<bool> {
        Ok(self.state().await? == SessionState::Failed)
    }

    pub async fn is_terminated(&self) -> Result<bool> {
        Ok(self.state().await? == SessionState::Terminated)
    }

    /// Session events as `;`-separated fields, oldest first.
    pub async fn events(&self) -> Result<Vec<Vec<String>>> {
        let record = self.status().await?;
        Ok(split_events(&record.events))
    }

    /// Message of the most recent session event.
    pub async fn last_message(&self) -> Result<String> {
        let record = self.status().await?;
        Ok(last_message(&record.events))
    }

    /// Close the remote session. Best-effort: the session may already be
    /// gone on the server side, which is not worth failing a teardown for.
    pub(crate) async fn close(&self) {
        let uri = UriBuilder::new(["datashield", "session", self.id.as_str()]);
        match self.rest.send(Method::DELETE, &uri).await {
            Ok(response) => {
                tracing::debug!(session = %self.id, status = %response.status(), "R session closed")
            }
            Err(e) => tracing::warn!(session = %self.id, error = %e, "failed to close R session"),
        }
    }
}

fn split_events(events: &[String]) -> Vec<Vec<String>> {
    events
        .iter()
        .map(|event| event.split(';').map(str::to_string).collect())
        .collect()
}

fn last_message(events: &[String]) -> String {
    match split_events(events).last() {
        Some(fields) => fields
            .get(2)
            .cloned()
            .unwrap_or_else(|| "No message".to_string()),
        None => "No recent events".to_string(),
    }
}
