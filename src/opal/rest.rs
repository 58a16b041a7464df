//! Thin REST layer over the Opal HTTP API.
//!
//! Opal serves its REST resources under the `/ws` root of the server URL.
//! [`UriBuilder`] assembles resource paths segment by segment with proper
//! percent-encoding; [`OpalRestClient`] owns the `reqwest` client, the
//! credentials, and the non-2xx handling every operation shares.

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::DsError;
use crate::interface::Credentials;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const RSCRIPT_CONTENT_TYPE: &str = "application/x-rscript";

/// Builds resource URIs relative to the Opal web-service root.
#[derive(Debug, Clone)]
pub struct UriBuilder {
    segments: Vec<String>,
    query: Vec<(String, String)>,
}

impl UriBuilder {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
        }
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn query_bool(self, name: &str, value: bool) -> Self {
        self.query(name, if value { "true" } else { "false" })
    }

    /// Resource path for error reporting, without query parameters.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    /// Resolve against a web-service root, percent-encoding segments and
    /// query pairs.
    pub fn build(&self, base: &Url) -> Url {
        let mut url = base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .expect("Opal base URL holds path segments");
            path.pop_if_empty();
            for segment in &self.segments {
                path.push(segment);
            }
        }
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query {
                pairs.append_pair(name, value);
            }
        }
        url
    }
}

/// Authenticated HTTP client bound to one Opal server.
#[derive(Debug)]
pub struct OpalRestClient {
    http: Client,
    base: Url,
    credentials: Credentials,
}

impl OpalRestClient {
    pub fn new(url: &str, credentials: Credentials) -> Result<Self, DsError> {
        let mut base = Url::parse(url.trim_end_matches('/'))
            .map_err(|e| DsError::Protocol(format!("invalid Opal URL {url}: {e}")))?;
        base.path_segments_mut()
            .map_err(|_| DsError::Protocol(format!("invalid Opal URL {url}: cannot hold a path")))?
            .pop_if_empty()
            .push("ws");

        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base,
            credentials,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn request(&self, method: Method, uri: &UriBuilder) -> reqwest::RequestBuilder {
        let url = uri.build(&self.base);
        tracing::debug!(method = %method, url = %url, "Opal request");
        let request = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/json");
        match &self.credentials {
            Credentials::Password { user, password } => request.basic_auth(user, Some(password)),
            Credentials::Token(token) => request.header("X-Opal-Auth", token.as_str()),
        }
    }

    /// Send and tolerate any status; callers inspect the response themselves.
    pub async fn send(&self, method: Method, uri: &UriBuilder) -> Result<Response, DsError> {
        Ok(self.request(method, uri).send().await?)
    }

    /// Send and fail on non-2xx, carrying a truncated body snippet.
    pub async fn send_ok(&self, method: Method, uri: &UriBuilder) -> Result<Response, DsError> {
        let path = uri.path();
        let response = self.request(method, uri).send().await?;
        Self::check_status(path, response).await
    }

    /// Send an R script body and fail on non-2xx.
    pub async fn send_script(
        &self,
        method: Method,
        uri: &UriBuilder,
        script: &str,
    ) -> Result<Response, DsError> {
        let path = uri.path();
        let response = self
            .request(method, uri)
            .header(CONTENT_TYPE, RSCRIPT_CONTENT_TYPE)
            .body(script.to_string())
            .send()
            .await?;
        Self::check_status(path, response).await
    }

    /// GET a resource and decode its JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, uri: &UriBuilder) -> Result<T, DsError> {
        let path = uri.path();
        let response = self.send_ok(Method::GET, uri).await?;
        response
            .json()
            .await
            .map_err(|e| DsError::Protocol(format!("failed to decode {path}: {e}")))
    }

    async fn check_status(path: String, response: Response) -> Result<Response, DsError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DsError::Http {
            status: status.as_u16(),
            path,
            message: body.chars().take(200).collect::<String>(),
        })
    }
}
