//! Login declarations for DataSHIELD servers.
//!
//! A [`LoginInfo`] binds a server name to its base URL and credentials; it is
//! supplied once at connection construction and never mutated afterwards.
//! [`LoginBuilder`] accumulates the per-server entries an orchestrator feeds
//! to the drivers, one entry per data server.

/// How a connection authenticates against its server.
#[derive(Clone)]
pub enum Credentials {
    /// HTTP basic authentication.
    Password { user: String, password: String },
    /// Personal access token, sent as the `X-Opal-Auth` header.
    Token(String),
}

// Secrets stay out of logs and error chains.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .finish_non_exhaustive(),
            Self::Token(_) => f.write_str("Token(..)"),
        }
    }
}

impl Credentials {
    /// Human-readable credential mode, used in authentication failure
    /// messages ("user alice" vs "token"). Never exposes a secret.
    pub fn describe(&self) -> String {
        match self {
            Self::Password { user, .. } => format!("user {user}"),
            Self::Token(_) => "token".to_string(),
        }
    }
}

/// Per-server login parameters.
#[derive(Debug, Clone)]
pub struct LoginInfo {
    /// Connection label, echoed back in errors and results.
    pub name: String,
    /// Base URL of the server, e.g. `https://opal-demo.obiba.org`.
    pub url: String,
    pub credentials: Credentials,
    /// DataSHIELD profile to bind the session to (server default when None).
    pub profile: Option<String>,
    /// Workspace to restore into the session at creation time.
    pub restore: Option<String>,
}

impl LoginInfo {
    pub fn with_password(
        name: impl Into<String>,
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            credentials: Credentials::Password {
                user: user.into(),
                password: password.into(),
            },
            profile: None,
            restore: None,
        }
    }

    pub fn with_token(
        name: impl Into<String>,
        url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            credentials: Credentials::Token(token.into()),
            profile: None,
            restore: None,
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_restore(mut self, restore: impl Into<String>) -> Self {
        self.restore = Some(restore.into());
        self
    }
}

/// Accumulates login declarations for a set of DataSHIELD servers.
#[derive(Debug, Default)]
pub struct LoginBuilder {
    entries: Vec<LoginInfo>,
}

impl LoginBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a password-authenticated server.
    pub fn add(
        mut self,
        name: impl Into<String>,
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.entries
            .push(LoginInfo::with_password(name, url, user, password));
        self
    }

    /// Add a token-authenticated server.
    pub fn add_token(
        mut self,
        name: impl Into<String>,
        url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        self.entries.push(LoginInfo::with_token(name, url, token));
        self
    }

    pub fn build(self) -> Vec<LoginInfo> {
        self.entries
    }
}
