//! DataSHIELD driver interface — the capability contract a server adapter
//! implements, and the normalized types it answers with.
//!
//! A DataSHIELD orchestrator holds one [`DsConnection`] per data server and
//! drives them all through this trait set: assign data into remote symbols,
//! evaluate non-disclosive aggregate expressions, and manage sessions and
//! workspaces. Drivers translate these calls into whatever wire protocol
//! their server speaks; the Opal driver lives in [`crate::opal`].

pub mod login;

pub use login::{Credentials, LoginBuilder, LoginInfo};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DsError;

pub type Result<T> = std::result::Result<T, DsError>;

/// Which server-side method environment to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Aggregate,
    Assign,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate",
            Self::Assign => "assign",
        }
    }
}

impl std::fmt::Display for MethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a server-side method is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    /// A plain R function reference.
    Func,
    /// An inline R script.
    Script,
}

impl MethodClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Func => "func",
            Self::Script => "script",
        }
    }
}

/// What the server disclosed about a method beyond its name.
///
/// Servers may advertise a method as a bare name with no structured
/// descriptor attached; modeling that case as its own variant keeps the
/// "class/value/package may be absent" contract explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodDescriptor {
    /// No structured descriptor — only the name is known.
    NamedOnly,
    /// Full R function/script descriptor.
    Function {
        class: MethodClass,
        value: String,
        package: Option<String>,
        version: Option<String>,
    },
}

/// A DataSHIELD method as advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsMethod {
    pub name: String,
    pub descriptor: MethodDescriptor,
}

impl DsMethod {
    /// The `(package, version)` pair backing this method, when the server
    /// disclosed both.
    pub fn package_version(&self) -> Option<DsPackage> {
        match &self.descriptor {
            MethodDescriptor::Function {
                package: Some(package),
                version: Some(version),
                ..
            } => Some(DsPackage {
                package: package.clone(),
                version: version.clone(),
            }),
            _ => None,
        }
    }
}

/// An R package underlying one or more server-side methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DsPackage {
    pub package: String,
    pub version: String,
}

/// Enabled analysis profiles plus the one this connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileList {
    pub available: Vec<String>,
    pub current: String,
}

/// Which operations this driver can run asynchronously on the server.
#[derive(Debug, Clone, Copy)]
pub struct AsyncSupport {
    pub aggregate: bool,
    pub assign_table: bool,
    pub assign_resource: bool,
    pub assign_expr: bool,
}

/// Outcome of an operation that absorbs failures by design (`keep_alive`).
/// The failure is kept visible for review and tests instead of being
/// silently dropped.
#[derive(Debug)]
#[must_use]
pub enum BestEffort {
    Succeeded,
    Ignored(DsError),
}

impl BestEffort {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Options for assigning a server-side table to a symbol.
#[derive(Debug, Clone, Default)]
pub struct TableAssignOptions {
    /// Restrict the assignment to these variables (all when None).
    pub variables: Option<Vec<String>>,
    /// Include rows with missing values.
    pub missings: bool,
    /// Identifier mapping to apply.
    pub identifiers: Option<String>,
    /// Column name to hold the entity identifiers.
    pub id_name: Option<String>,
}

impl TableAssignOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(mut self, variables: Vec<String>) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn include_missings(mut self) -> Self {
        self.missings = true;
        self
    }

    pub fn with_identifiers(mut self, identifiers: impl Into<String>) -> Self {
        self.identifiers = Some(identifiers.into());
        self
    }

    pub fn with_id_name(mut self, id_name: impl Into<String>) -> Self {
        self.id_name = Some(id_name.into());
        self
    }
}

/// Handle on a (possibly still-running) remote computation.
///
/// Synchronous calls hand back an already-resolved handle; asynchronous
/// calls hand back a handle tracking a remote command id. Callers needing a
/// bounded wait poll [`is_completed`](DsResult::is_completed) in a loop with
/// their own deadline — no blocking call here enforces a timeout.
#[async_trait]
pub trait DsResult: Send + std::fmt::Debug {
    /// True once the remote computation reached a terminal state. Never
    /// blocks on the server; a pending handle issues a non-blocking probe.
    async fn is_completed(&mut self) -> Result<bool>;

    /// Retrieve the result value, blocking on the server until the command
    /// terminates if needed. None when the computation produced no value
    /// (side-effect-only evaluation). A FAILED command surfaces
    /// [`DsError::CommandFailed`] with the remote message.
    async fn fetch(&mut self) -> Result<Option<Value>>;
}

/// The DataSHIELD capability set against one data server.
///
/// A connection is used by a single caller at a time; lazy session creation
/// is not protected against concurrent callers.
#[async_trait]
pub trait DsConnection: Send + Sync {
    /// Connection label from the login declaration.
    fn name(&self) -> &str;

    /// Whether the configured credentials authenticate; any failure answers
    /// false.
    async fn check_user(&self) -> bool;

    // ── Content listing ─────────────────────────────────────────

    /// All `datasource.table` names across the server.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Existence probe on a `datasource.table` name; absorbs failures.
    async fn has_table(&self, name: &str) -> bool;

    /// Variable metadata for one `datasource.table`.
    async fn list_table_variables(&self, table: &str) -> Result<Vec<Value>>;

    /// Variable taxonomies configured on the server.
    async fn list_taxonomies(&self) -> Result<Vec<Value>>;

    /// Full-text variable search across datasources.
    async fn search_variables(&self, query: &str) -> Result<Value>;

    /// All `project.resource` names across the server.
    async fn list_resources(&self) -> Result<Vec<String>>;

    /// Existence probe on a `project.resource` name; absorbs failures.
    async fn has_resource(&self, name: &str) -> bool;

    // ── Remote session ──────────────────────────────────────────

    /// Whether a remote session has been created by this connection.
    fn has_session(&self) -> bool;

    /// Create the remote analysis session if none exists, returning its id.
    /// When `asynchronous`, the server may still be provisioning it.
    async fn start_session(&self, asynchronous: bool) -> Result<String>;

    /// Whether the remote session left the pending state.
    async fn is_session_started(&self) -> Result<bool>;

    /// Id of the remote session, creating one synchronously if needed.
    async fn session_id(&self) -> Result<String>;

    // ── Assign / aggregate ──────────────────────────────────────

    /// Bind `symbol` to a server-side table.
    async fn assign_table(
        &self,
        symbol: &str,
        table: &str,
        options: TableAssignOptions,
        asynchronous: bool,
    ) -> Result<Box<dyn DsResult>>;

    /// Bind `symbol` to a declared resource.
    async fn assign_resource(
        &self,
        symbol: &str,
        resource: &str,
        asynchronous: bool,
    ) -> Result<Box<dyn DsResult>>;

    /// Bind `symbol` to the result of evaluating an R expression.
    async fn assign_expr(
        &self,
        symbol: &str,
        expr: &str,
        asynchronous: bool,
    ) -> Result<Box<dyn DsResult>>;

    /// Evaluate a non-disclosive aggregate expression in the session.
    async fn aggregate(&self, expr: &str, asynchronous: bool) -> Result<Box<dyn DsResult>>;

    // ── Symbols ─────────────────────────────────────────────────

    async fn list_symbols(&self) -> Result<Vec<String>>;

    async fn rm_symbol(&self, name: &str) -> Result<()>;

    // ── DataSHIELD configuration ────────────────────────────────

    async fn list_profiles(&self) -> Result<ProfileList>;

    async fn list_methods(&self, kind: MethodKind) -> Result<Vec<DsMethod>>;

    /// Packages underlying aggregate and assign methods, deduplicated by
    /// `(package, version)`.
    async fn list_packages(&self) -> Result<Vec<DsPackage>>;

    // ── Workspaces ──────────────────────────────────────────────

    /// Workspaces persisted under the authenticated subject's principal.
    async fn list_workspaces(&self) -> Result<Vec<Value>>;

    async fn save_workspace(&self, name: &str) -> Result<()>;

    async fn restore_workspace(&self, name: &str) -> Result<()>;

    async fn rm_workspace(&self, name: &str) -> Result<()>;

    // ── Utilities ───────────────────────────────────────────────

    /// Which operations can run asynchronously on this server.
    fn async_support(&self) -> AsyncSupport;

    /// Best-effort probe to keep the remote session from expiring.
    async fn keep_alive(&self) -> BestEffort;

    /// Idempotent teardown: close the remote session if one exists, then the
    /// underlying transport. Never fails, even when the remote session is
    /// already gone. The connection is not reusable afterwards.
    async fn disconnect(&self);
}

/// Constructs authenticated connections from login declarations.
#[async_trait]
pub trait DsDriver {
    type Connection: DsConnection;

    /// Build a connection and verify its credentials, failing before the
    /// connection is handed out when authentication does not hold.
    async fn new_connection(&self, login: LoginInfo) -> Result<Self::Connection>;
}
