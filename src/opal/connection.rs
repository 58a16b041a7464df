//! The DataSHIELD connection adapter for one Opal server.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;

use crate::error::DsError;
use crate::interface::{
    AsyncSupport, BestEffort, DsConnection, DsMethod, DsPackage, DsResult, LoginInfo, MethodKind,
    ProfileList, Result, TableAssignOptions,
};
use crate::opal::rest::{OpalRestClient, UriBuilder};
use crate::opal::result::OpalResult;
use crate::opal::session::OpalSession;
use crate::opal::types::{
    DatasourceDto, MethodDto, ProfileDto, ProjectDto, ResourceDto, SubjectProfileDto,
};

const DEFAULT_PROFILE: &str = "default";
const WORKSPACE_CONTEXT: &str = "DataSHIELD";

/// Binds one login declaration to one Opal server.
///
/// The remote R session and the subject identity are created/fetched lazily
/// on first need and memoized. Locks guard the memoized slots only and are
/// never held across an await; a connection is meant for a single caller at
/// a time, and concurrent lazy session creation is not defended against.
#[derive(Debug)]
pub struct OpalConnection {
    name: String,
    url: String,
    rest: Arc<OpalRestClient>,
    profile: String,
    restore: Option<String>,
    session: Mutex<Option<Arc<OpalSession>>>,
    session_started: Mutex<bool>,
    subject: Mutex<Option<SubjectProfileDto>>,
}

impl OpalConnection {
    pub fn new(login: &LoginInfo) -> Result<Self> {
        let rest = OpalRestClient::new(&login.url, login.credentials.clone())?;
        Ok(Self {
            name: login.name.clone(),
            url: login.url.clone(),
            rest: Arc::new(rest),
            profile: login
                .profile
                .clone()
                .unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            restore: login.restore.clone(),
            session: Mutex::new(None),
            session_started: Mutex::new(false),
            subject: Mutex::new(None),
        })
    }

    /// Base URL this connection authenticates against.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The remote session, if one has been created.
    pub fn session(&self) -> Option<Arc<OpalSession>> {
        self.session.lock().unwrap().clone()
    }

    /// Create the remote session unless one already exists.
    async fn open_session(&self, asynchronous: bool) -> Result<Arc<OpalSession>> {
        if let Some(existing) = self.session() {
            return Ok(existing);
        }
        let session = Arc::new(
            OpalSession::start(
                self.rest.clone(),
                Some(&self.profile),
                self.restore.as_deref(),
                asynchronous,
            )
            .await?,
        );
        let started = if asynchronous {
            !session.is_pending().await?
        } else {
            true
        };
        *self.session.lock().unwrap() = Some(session.clone());
        *self.session_started.lock().unwrap() = started;
        Ok(session)
    }

    /// Session for an operation that needs one now: created synchronously on
    /// first need.
    async fn ensure_session(&self) -> Result<Arc<OpalSession>> {
        self.open_session(false).await
    }

    /// Memoized current-subject lookup.
    async fn subject(&self) -> Result<SubjectProfileDto> {
        if let Some(cached) = self.subject.lock().unwrap().clone() {
            return Ok(cached);
        }
        let profile: SubjectProfileDto = self
            .rest
            .get_json(&UriBuilder::new(["system", "subject-profile", "_current"]))
            .await?;
        *self.subject.lock().unwrap() = Some(profile.clone());
        Ok(profile)
    }

    /// Wrap an accepted submission into a result handle. Asynchronous
    /// submissions answer with the command id as their plain-text body;
    /// synchronous aggregate bodies carry the decoded result.
    async fn submission_result(
        &self,
        session_id: &str,
        response: Response,
        asynchronous: bool,
        decode_body: bool,
    ) -> Result<Box<dyn DsResult>> {
        if asynchronous {
            let rid = response.text().await?.trim().to_string();
            if rid.is_empty() {
                return Err(DsError::Protocol(
                    "no command id returned for asynchronous operation".into(),
                ));
            }
            return Ok(Box::new(OpalResult::pending(
                self.rest.clone(),
                self.name.clone(),
                session_id.to_string(),
                rid,
            )));
        }

        let value: Option<Value> = if decode_body {
            let body = response.text().await?;
            if body.trim().is_empty() {
                None
            } else {
                Some(serde_json::from_str(&body).map_err(|e| {
                    DsError::Protocol(format!("failed to decode aggregate result: {e}"))
                })?)
            }
        } else {
            None
        };
        Ok(Box::new(OpalResult::resolved(
            self.rest.clone(),
            self.name.clone(),
            session_id.to_string(),
            value,
        )))
    }
}

/// `"a","b"` variable filter the table-assignment endpoint expects.
fn variables_filter(variables: &[String]) -> String {
    let quoted: Vec<String> = variables.iter().map(|v| format!("\"{v}\"")).collect();
    format!("name.any({})", quoted.join(","))
}

/// Split a dotted `container.item` reference.
fn split_reference<'a>(name: &'a str, what: &str) -> Result<(&'a str, &'a str)> {
    name.split_once('.')
        .ok_or_else(|| DsError::Protocol(format!("invalid {what} reference: {name}")))
}

/// Deduplicate method packages by `(package, version)`, first seen wins.
fn dedup_packages(methods: &[DsMethod]) -> Vec<DsPackage> {
    let mut seen = std::collections::HashSet::new();
    let mut packages = Vec::new();
    for method in methods {
        if let Some(package) = method.package_version() {
            if seen.insert(package.clone()) {
                packages.push(package);
            }
        }
    }
    packages
}

#[async_trait]
impl DsConnection for OpalConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_user(&self) -> bool {
        self.rest
            .get_json::<SubjectProfileDto>(&UriBuilder::new([
                "system",
                "subject-profile",
                "_current",
            ]))
            .await
            .is_ok()
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let datasources: Vec<DatasourceDto> =
            self.rest.get_json(&UriBuilder::new(["datasources"])).await?;
        let mut names = Vec::new();
        for datasource in datasources {
            for table in datasource.table {
                names.push(format!("{}.{}", datasource.name, table));
            }
        }
        Ok(names)
    }

    async fn has_table(&self, name: &str) -> bool {
        let Some((datasource, table)) = name.split_once('.') else {
            return false;
        };
        let uri = UriBuilder::new(["datasource", datasource, "table", table]);
        match self.rest.send(Method::GET, &uri).await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!(table = name, error = %e, "table existence probe failed");
                false
            }
        }
    }

    async fn list_table_variables(&self, table: &str) -> Result<Vec<Value>> {
        let (datasource, table) = split_reference(table, "table")?;
        self.rest
            .get_json(&UriBuilder::new([
                "datasource",
                datasource,
                "table",
                table,
                "variables",
            ]))
            .await
    }

    async fn list_taxonomies(&self) -> Result<Vec<Value>> {
        self.rest
            .get_json(&UriBuilder::new(["system", "conf", "taxonomies"]))
            .await
    }

    async fn search_variables(&self, query: &str) -> Result<Value> {
        self.rest
            .get_json(
                &UriBuilder::new(["datasources", "variables", "_search"]).query("query", query),
            )
            .await
    }

    async fn list_resources(&self) -> Result<Vec<String>> {
        let projects: Vec<ProjectDto> =
            self.rest.get_json(&UriBuilder::new(["projects"])).await?;
        let mut names = Vec::new();
        for project in projects {
            let resources: Vec<ResourceDto> = self
                .rest
                .get_json(&UriBuilder::new([
                    "project",
                    project.name.as_str(),
                    "resources",
                ]))
                .await?;
            for resource in resources {
                names.push(format!("{}.{}", project.name, resource.name));
            }
        }
        Ok(names)
    }

    async fn has_resource(&self, name: &str) -> bool {
        let Some((project, resource)) = name.split_once('.') else {
            return false;
        };
        let uri = UriBuilder::new(["project", project, "resource", resource]);
        match self.rest.send(Method::GET, &uri).await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!(resource = name, error = %e, "resource existence probe failed");
                false
            }
        }
    }

    fn has_session(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    async fn start_session(&self, asynchronous: bool) -> Result<String> {
        let session = self.open_session(asynchronous).await?;
        Ok(session.id().to_string())
    }

    async fn is_session_started(&self) -> Result<bool> {
        let Some(session) = self.session() else {
            return Ok(false);
        };
        if *self.session_started.lock().unwrap() {
            return Ok(true);
        }
        let started = !session.is_pending().await?;
        *self.session_started.lock().unwrap() = started;
        Ok(started)
    }

    async fn session_id(&self) -> Result<String> {
        Ok(self.ensure_session().await?.id().to_string())
    }

    async fn assign_table(
        &self,
        symbol: &str,
        table: &str,
        options: TableAssignOptions,
        asynchronous: bool,
    ) -> Result<Box<dyn DsResult>> {
        let session = self.ensure_session().await?;
        let mut uri = UriBuilder::new([
            "datashield",
            "session",
            session.id(),
            "symbol",
            symbol,
            "table",
            table,
        ])
        .query_bool("missings", options.missings)
        .query_bool("async", asynchronous);
        if let Some(ref variables) = options.variables {
            uri = uri.query("variables", variables_filter(variables));
        }
        if let Some(ref identifiers) = options.identifiers {
            uri = uri.query("identifiers", identifiers.as_str());
        }
        if let Some(ref id_name) = options.id_name {
            uri = uri.query("id", id_name.as_str());
        }

        let response = self.rest.send_ok(Method::PUT, &uri).await?;
        self.submission_result(session.id(), response, asynchronous, false)
            .await
    }

    async fn assign_resource(
        &self,
        symbol: &str,
        resource: &str,
        asynchronous: bool,
    ) -> Result<Box<dyn DsResult>> {
        let session = self.ensure_session().await?;
        let uri = UriBuilder::new([
            "datashield",
            "session",
            session.id(),
            "symbol",
            symbol,
            "resource",
            resource,
        ])
        .query_bool("async", asynchronous);

        let response = self.rest.send_ok(Method::PUT, &uri).await?;
        self.submission_result(session.id(), response, asynchronous, false)
            .await
    }

    async fn assign_expr(
        &self,
        symbol: &str,
        expr: &str,
        asynchronous: bool,
    ) -> Result<Box<dyn DsResult>> {
        let session = self.ensure_session().await?;
        let uri = UriBuilder::new(["datashield", "session", session.id(), "symbol", symbol])
            .query_bool("async", asynchronous);

        let response = self.rest.send_script(Method::PUT, &uri, expr).await?;
        self.submission_result(session.id(), response, asynchronous, false)
            .await
    }

    async fn aggregate(&self, expr: &str, asynchronous: bool) -> Result<Box<dyn DsResult>> {
        let session = self.ensure_session().await?;
        let uri = UriBuilder::new(["datashield", "session", session.id(), "aggregate"])
            .query_bool("async", asynchronous);

        let response = self.rest.send_script(Method::POST, &uri, expr).await?;
        self.submission_result(session.id(), response, asynchronous, true)
            .await
    }

    async fn list_symbols(&self) -> Result<Vec<String>> {
        let session = self.ensure_session().await?;
        let uri = UriBuilder::new(["datashield", "session", session.id(), "symbols"]);
        let value: Value = self.rest.get_json(&uri).await?;
        // A single symbol may come back as a bare string.
        match value {
            Value::Null => Ok(Vec::new()),
            Value::String(symbol) => Ok(vec![symbol]),
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()),
            other => Err(DsError::Protocol(format!(
                "unexpected symbol listing shape: {other}"
            ))),
        }
    }

    async fn rm_symbol(&self, name: &str) -> Result<()> {
        let session = self.ensure_session().await?;
        let uri = UriBuilder::new(["datashield", "session", session.id(), "symbol", name]);
        self.rest.send(Method::DELETE, &uri).await?;
        Ok(())
    }

    async fn list_profiles(&self) -> Result<ProfileList> {
        let profiles: Vec<ProfileDto> = self
            .rest
            .get_json(&UriBuilder::new(["datashield", "profiles"]))
            .await?;
        Ok(ProfileList {
            available: profiles
                .into_iter()
                .filter(|p| p.enabled)
                .map(|p| p.name)
                .collect(),
            current: self.profile.clone(),
        })
    }

    async fn list_methods(&self, kind: MethodKind) -> Result<Vec<DsMethod>> {
        let uri = UriBuilder::new(["datashield", "env", kind.as_str(), "methods"])
            .query("profile", self.profile.as_str());
        let methods: Vec<MethodDto> = self.rest.get_json(&uri).await?;
        Ok(methods.into_iter().map(DsMethod::from).collect())
    }

    async fn list_packages(&self) -> Result<Vec<DsPackage>> {
        let mut methods = self.list_methods(MethodKind::Aggregate).await?;
        methods.extend(self.list_methods(MethodKind::Assign).await?);
        Ok(dedup_packages(&methods))
    }

    async fn list_workspaces(&self) -> Result<Vec<Value>> {
        let subject = self.subject().await?;
        let uri = UriBuilder::new(["service", "r", "workspaces"])
            .query("context", WORKSPACE_CONTEXT)
            .query("user", subject.principal.as_str());
        self.rest.get_json(&uri).await
    }

    async fn save_workspace(&self, name: &str) -> Result<()> {
        let session = self.ensure_session().await?;
        let uri = UriBuilder::new(["datashield", "session", session.id(), "workspaces"])
            .query("save", name);
        self.rest.send_ok(Method::POST, &uri).await?;
        Ok(())
    }

    async fn restore_workspace(&self, name: &str) -> Result<()> {
        let session = self.ensure_session().await?;
        let uri = UriBuilder::new(["datashield", "session", session.id(), "workspace", name]);
        self.rest.send_ok(Method::PUT, &uri).await?;
        Ok(())
    }

    async fn rm_workspace(&self, name: &str) -> Result<()> {
        let subject = self.subject().await?;
        let uri = UriBuilder::new(["service", "r", "workspaces"])
            .query("context", WORKSPACE_CONTEXT)
            .query("user", subject.principal.as_str())
            .query("name", name);
        self.rest.send_ok(Method::DELETE, &uri).await?;
        Ok(())
    }

    fn async_support(&self) -> AsyncSupport {
        AsyncSupport {
            aggregate: true,
            assign_table: true,
            assign_resource: true,
            assign_expr: true,
        }
    }

    async fn keep_alive(&self) -> BestEffort {
        match self.list_symbols().await {
            Ok(_) => BestEffort::Succeeded,
            Err(e) => {
                tracing::warn!(server = %self.name, error = %e, "keep-alive probe failed");
                BestEffort::Ignored(e)
            }
        }
    }

    async fn disconnect(&self) {
        let session = self.session.lock().unwrap().take();
        if let Some(session) = session {
            session.close().await;
        }
        *self.session_started.lock().unwrap() = false;
        // The HTTP client itself is released when the last handle drops.
    }
}
