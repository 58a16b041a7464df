//! Connection factory for Opal servers.

use async_trait::async_trait;

use crate::error::DsError;
use crate::interface::{DsConnection, DsDriver, LoginInfo, Result};
use crate::opal::connection::OpalConnection;

/// Builds authenticated [`OpalConnection`]s from login declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpalDriver;

#[async_trait]
impl DsDriver for OpalDriver {
    type Connection = OpalConnection;

    async fn new_connection(&self, login: LoginInfo) -> Result<OpalConnection> {
        let connection = OpalConnection::new(&login)?;
        if !connection.check_user().await {
            return Err(DsError::Authentication {
                url: login.url.clone(),
                mode: login.credentials.describe(),
            });
        }
        tracing::debug!(server = %login.name, url = %login.url, "Opal connection established");
        Ok(connection)
    }
}
