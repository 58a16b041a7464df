//! In-process mock Opal server.
//!
//! Hosts just enough of the Opal REST surface (under the `/ws` root) for the
//! adapter flow tests, and records the request counts the polling-protocol
//! assertions need.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

pub const MOCK_USER: &str = "dsuser";
pub const MOCK_PASSWORD: &str = "P@ssw0rd";
pub const MOCK_TOKEN: &str = "test-token";

pub struct MockCommand {
    /// Non-terminal statuses still to serve before the terminal one.
    pub pending_polls: usize,
    pub terminal_status: &'static str,
    pub with_result: bool,
    pub error: Option<String>,
    pub result: Value,
}

#[derive(Default)]
pub struct MockOpal {
    auth_header: String,
    symbols: Mutex<BTreeSet<String>>,
    commands: Mutex<HashMap<String, MockCommand>>,
    next_command: Mutex<u64>,
    workspaces: Mutex<Vec<String>>,
    /// Status-probe count per command id.
    pub command_polls: Mutex<HashMap<String, usize>>,
    /// Result-payload request count per command id.
    pub result_requests: Mutex<HashMap<String, usize>>,
    pub sessions_created: Mutex<usize>,
    pub session_deletes: Mutex<usize>,
}

impl MockOpal {
    fn new() -> Self {
        let credentials = STANDARD.encode(format!("{MOCK_USER}:{MOCK_PASSWORD}"));
        Self {
            auth_header: format!("Basic {credentials}"),
            ..Self::default()
        }
    }

    pub fn polls(&self, rid: &str) -> usize {
        self.command_polls
            .lock()
            .unwrap()
            .get(rid)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_polls(&self) -> usize {
        self.command_polls.lock().unwrap().values().sum()
    }

    pub fn result_fetches(&self, rid: &str) -> usize {
        self.result_requests
            .lock()
            .unwrap()
            .get(rid)
            .copied()
            .unwrap_or(0)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let basic_ok = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == self.auth_header)
            .unwrap_or(false);
        let token_ok = headers
            .get("X-Opal-Auth")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == MOCK_TOKEN)
            .unwrap_or(false);
        basic_ok || token_ok
    }

    fn register_command(
        &self,
        pending_polls: usize,
        terminal_status: &'static str,
        with_result: bool,
        error: Option<String>,
        result: Value,
    ) -> String {
        let mut next = self.next_command.lock().unwrap();
        *next += 1;
        let rid = next.to_string();
        self.commands.lock().unwrap().insert(
            rid.clone(),
            MockCommand {
                pending_polls,
                terminal_status,
                with_result,
                error,
                result,
            },
        );
        rid
    }
}

fn mean_payload() -> Value {
    json!({
        "EstimatedMean": 6.1241,
        "Nmissing": 341,
        "Nvalid": 1822,
        "Ntotal": 2163,
        "ValidityMessage": "VALID ANALYSIS"
    })
}

fn disallowed_message(expr: &str) -> String {
    let func = expr.split('(').next().unwrap_or(expr);
    format!("Aggregate function {func} is not allowed")
}

fn is_async(query: &HashMap<String, String>) -> bool {
    query.get("async").map(|v| v == "true").unwrap_or(false)
}

async fn current_subject(State(state): State<Arc<MockOpal>>, headers: HeaderMap) -> Response {
    if state.authorized(&headers) {
        Json(json!({"principal": MOCK_USER, "realm": "opal-realm"})).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            "authentication required".to_string(),
        )
            .into_response()
    }
}

async fn list_datasources() -> Json<Value> {
    Json(json!([{"name": "CNSIM", "table": ["CNSIM1", "CNSIM2"]}]))
}

async fn get_table(Path((ds, table)): Path<(String, String)>) -> Response {
    if ds == "CNSIM" && (table == "CNSIM1" || table == "CNSIM2") {
        Json(json!({"name": table, "datasourceName": ds})).into_response()
    } else {
        (StatusCode::NOT_FOUND, "no such table".to_string()).into_response()
    }
}

async fn list_variables(Path((_ds, _table)): Path<(String, String)>) -> Json<Value> {
    Json(json!([
        {"name": "LAB_GLUC", "valueType": "decimal"},
        {"name": "LAB_TSC", "valueType": "decimal"},
        {"name": "GENDER", "valueType": "integer"}
    ]))
}

async fn list_taxonomies() -> Json<Value> {
    Json(json!([{"name": "Mlstr_area", "title": [{"locale": "en", "value": "Areas"}]}]))
}

async fn search_variables(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({
        "totalHits": 1,
        "query": query.get("query").cloned().unwrap_or_default(),
        "hits": [{"identifier": "CNSIM1:LAB_GLUC"}]
    }))
}

async fn list_projects() -> Json<Value> {
    Json(json!([{"name": "RSRC"}]))
}

async fn list_project_resources(Path(project): Path<String>) -> Response {
    if project == "RSRC" {
        Json(json!([{"name": "CNSIM1"}])).into_response()
    } else {
        (StatusCode::NOT_FOUND, "no such project".to_string()).into_response()
    }
}

async fn get_resource(Path((project, resource)): Path<(String, String)>) -> Response {
    if project == "RSRC" && resource == "CNSIM1" {
        Json(json!({"name": resource})).into_response()
    } else {
        (StatusCode::NOT_FOUND, "no such resource".to_string()).into_response()
    }
}

async fn create_session(State(state): State<Arc<MockOpal>>) -> Response {
    *state.sessions_created.lock().unwrap() += 1;
    (
        StatusCode::CREATED,
        Json(json!({"id": "sess-1", "state": "running"})),
    )
        .into_response()
}

async fn get_session(Path(id): Path<String>) -> Json<Value> {
    Json(json!({
        "id": id,
        "state": "running",
        "events": ["t0;INFO;R session created"]
    }))
}

async fn delete_session(State(state): State<Arc<MockOpal>>, Path(_id): Path<String>) -> StatusCode {
    *state.session_deletes.lock().unwrap() += 1;
    StatusCode::OK
}

async fn assign_expr(
    State(state): State<Arc<MockOpal>>,
    Path((_sid, symbol)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    _script: String,
) -> Response {
    state.symbols.lock().unwrap().insert(symbol);
    if is_async(&query) {
        let rid = state.register_command(1, "COMPLETED", false, None, Value::Null);
        rid.into_response()
    } else {
        StatusCode::OK.into_response()
    }
}

async fn assign_table(
    State(state): State<Arc<MockOpal>>,
    Path((_sid, symbol, table)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !table.starts_with("CNSIM.") {
        return (StatusCode::NOT_FOUND, format!("no such table {table}")).into_response();
    }
    state.symbols.lock().unwrap().insert(symbol);
    if is_async(&query) {
        let rid = state.register_command(1, "COMPLETED", false, None, Value::Null);
        rid.into_response()
    } else {
        StatusCode::OK.into_response()
    }
}

async fn assign_resource(
    State(state): State<Arc<MockOpal>>,
    Path((_sid, symbol, resource)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !resource.starts_with("RSRC.") {
        return (StatusCode::NOT_FOUND, format!("no such resource {resource}")).into_response();
    }
    state.symbols.lock().unwrap().insert(symbol);
    if is_async(&query) {
        let rid = state.register_command(1, "COMPLETED", false, None, Value::Null);
        rid.into_response()
    } else {
        StatusCode::OK.into_response()
    }
}

async fn rm_symbol(
    State(state): State<Arc<MockOpal>>,
    Path((_sid, symbol)): Path<(String, String)>,
) -> StatusCode {
    state.symbols.lock().unwrap().remove(&symbol);
    StatusCode::OK
}

async fn list_symbols(State(state): State<Arc<MockOpal>>) -> Json<Value> {
    let symbols: Vec<String> = state.symbols.lock().unwrap().iter().cloned().collect();
    Json(json!(symbols))
}

async fn aggregate(
    State(state): State<Arc<MockOpal>>,
    Path(_sid): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    script: String,
) -> Response {
    let asynchronous = is_async(&query);
    if script.starts_with("boomDS") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal R server error".to_string(),
        )
            .into_response();
    }
    if script.starts_with("meanDS") {
        if asynchronous {
            let rid = state.register_command(1, "COMPLETED", true, None, mean_payload());
            return rid.into_response();
        }
        return Json(mean_payload()).into_response();
    }
    // Anything else is not an allowed aggregate function.
    if asynchronous {
        let rid = state.register_command(
            0,
            "FAILED",
            false,
            Some(disallowed_message(&script)),
            Value::Null,
        );
        return rid.into_response();
    }
    (StatusCode::BAD_REQUEST, disallowed_message(&script)).into_response()
}

async fn get_command(
    State(state): State<Arc<MockOpal>>,
    Path((_sid, rid)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let wait = query.get("wait").map(|v| v == "true").unwrap_or(false);
    *state
        .command_polls
        .lock()
        .unwrap()
        .entry(rid.clone())
        .or_insert(0) += 1;

    let mut commands = state.commands.lock().unwrap();
    let Some(command) = commands.get_mut(&rid) else {
        return (StatusCode::NOT_FOUND, "no such command".to_string()).into_response();
    };
    let status = if wait || command.pending_polls == 0 {
        command.pending_polls = 0;
        command.terminal_status
    } else {
        command.pending_polls -= 1;
        "IN_PROGRESS"
    };
    let mut body = json!({"id": rid, "status": status, "withResult": command.with_result});
    if let Some(error) = &command.error {
        body["error"] = json!(error);
    }
    Json(body).into_response()
}

async fn get_command_result(
    State(state): State<Arc<MockOpal>>,
    Path((_sid, rid)): Path<(String, String)>,
) -> Response {
    *state
        .result_requests
        .lock()
        .unwrap()
        .entry(rid.clone())
        .or_insert(0) += 1;
    let commands = state.commands.lock().unwrap();
    let Some(command) = commands.get(&rid) else {
        return (StatusCode::NOT_FOUND, "no such command".to_string()).into_response();
    };
    Json(command.result.clone()).into_response()
}

async fn list_profiles() -> Json<Value> {
    Json(json!([
        {"name": "default", "enabled": true},
        {"name": "exposome", "enabled": false},
        {"name": "survival", "enabled": true}
    ]))
}

async fn list_methods(Path(kind): Path<String>) -> Json<Value> {
    let methods = if kind == "aggregate" {
        json!([
            {
                "name": "meanDS",
                "DataShield.RFunctionDataShieldMethodDto.method": {
                    "func": "dsBase::meanDS",
                    "rPackage": "dsBase",
                    "version": "6.3.0"
                }
            },
            {"name": "abs"}
        ])
    } else {
        json!([
            {
                "name": "vectorDS",
                "DataShield.RFunctionDataShieldMethodDto.method": {
                    "func": "dsBase::vectorDS",
                    "rPackage": "dsBase",
                    "version": "6.3.0"
                }
            },
            {
                "name": "as.resource.object",
                "DataShield.RFunctionDataShieldMethodDto.method": {
                    "func": "resourcer::as.resource.object",
                    "rPackage": "resourcer",
                    "version": "1.1.1"
                }
            },
            {"name": "c"}
        ])
    };
    Json(methods)
}

async fn list_workspaces(
    State(state): State<Arc<MockOpal>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if query.get("context").map(String::as_str) != Some("DataSHIELD") {
        return (StatusCode::BAD_REQUEST, "missing context".to_string()).into_response();
    }
    let workspaces: Vec<Value> = state
        .workspaces
        .lock()
        .unwrap()
        .iter()
        .map(|name| json!({"name": name, "user": MOCK_USER, "context": "DataSHIELD"}))
        .collect();
    Json(json!(workspaces)).into_response()
}

async fn rm_workspace(
    State(state): State<Arc<MockOpal>>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    if let Some(name) = query.get("name") {
        state.workspaces.lock().unwrap().retain(|w| w != name);
    }
    StatusCode::OK
}

async fn save_workspace(
    State(state): State<Arc<MockOpal>>,
    Path(_sid): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    if let Some(name) = query.get("save") {
        state.workspaces.lock().unwrap().push(name.clone());
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

async fn restore_workspace(
    State(state): State<Arc<MockOpal>>,
    Path((_sid, name)): Path<(String, String)>,
) -> StatusCode {
    if state.workspaces.lock().unwrap().iter().any(|w| w == &name) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

fn router(state: Arc<MockOpal>) -> Router {
    Router::new()
        .route("/ws/system/subject-profile/_current", get(current_subject))
        .route("/ws/system/conf/taxonomies", get(list_taxonomies))
        .route("/ws/datasources", get(list_datasources))
        .route("/ws/datasources/variables/_search", get(search_variables))
        .route("/ws/datasource/:ds/table/:table", get(get_table))
        .route(
            "/ws/datasource/:ds/table/:table/variables",
            get(list_variables),
        )
        .route("/ws/projects", get(list_projects))
        .route("/ws/project/:project/resources", get(list_project_resources))
        .route("/ws/project/:project/resource/:resource", get(get_resource))
        .route("/ws/datashield/sessions", post(create_session))
        .route(
            "/ws/datashield/session/:id",
            get(get_session).delete(delete_session),
        )
        .route(
            "/ws/datashield/session/:id/symbol/:symbol",
            put(assign_expr).delete(rm_symbol),
        )
        .route(
            "/ws/datashield/session/:id/symbol/:symbol/table/:table",
            put(assign_table),
        )
        .route(
            "/ws/datashield/session/:id/symbol/:symbol/resource/:resource",
            put(assign_resource),
        )
        .route("/ws/datashield/session/:id/symbols", get(list_symbols))
        .route("/ws/datashield/session/:id/aggregate", post(aggregate))
        .route(
            "/ws/datashield/session/:id/command/:rid",
            get(get_command),
        )
        .route(
            "/ws/datashield/session/:id/command/:rid/result",
            get(get_command_result),
        )
        .route("/ws/datashield/session/:id/workspaces", post(save_workspace))
        .route(
            "/ws/datashield/session/:id/workspace/:name",
            put(restore_workspace),
        )
        .route("/ws/datashield/profiles", get(list_profiles))
        .route("/ws/datashield/env/:kind/methods", get(list_methods))
        .route(
            "/ws/service/r/workspaces",
            get(list_workspaces).delete(rm_workspace),
        )
        .with_state(state)
}

/// Start the mock server on an ephemeral port; returns its state handle and
/// base URL.
pub async fn spawn() -> (Arc<MockOpal>, String) {
    let state = Arc::new(MockOpal::new());
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock Opal listener");
    let addr = listener.local_addr().expect("mock Opal address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve mock Opal");
    });
    (state, format!("http://{addr}"))
}
