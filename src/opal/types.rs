//! Wire types for the subset of the Opal REST API the adapter consumes.
//!
//! Field coverage is deliberately light: only what the adapter reads is
//! mapped, unknown fields are ignored, and payloads the adapter merely
//! forwards stay `serde_json::Value`.

use serde::Deserialize;

use crate::interface::{DsMethod, MethodClass, MethodDescriptor};

/// Datasource record from `GET /datasources`.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasourceDto {
    pub name: String,
    #[serde(default)]
    pub table: Vec<String>,
}

/// Project record from `GET /projects`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDto {
    pub name: String,
}

/// Resource reference from `GET /project/{p}/resources`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDto {
    pub name: String,
}

/// Subject profile from `GET /system/subject-profile/_current`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubjectProfileDto {
    pub principal: String,
    #[serde(default)]
    pub realm: Option<String>,
}

/// R session record from the `/datashield/session*` endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDto {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// Lifecycle state of a remote R session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Running,
    Failed,
    Terminated,
    /// A state this adapter does not know about; kept verbatim.
    Unknown(String),
}

impl SessionState {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "failed" => Self::Failed,
            "terminated" => Self::Terminated,
            _ => Self::Unknown(raw.to_string()),
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::Failed => f.write_str("failed"),
            Self::Terminated => f.write_str("terminated"),
            Self::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

/// DataSHIELD profile record from `GET /datashield/profiles`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileDto {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Raw method record from `GET /datashield/env/{kind}/methods`.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodDto {
    pub name: String,
    /// Structured descriptor, present only for R function/script methods.
    #[serde(rename = "DataShield.RFunctionDataShieldMethodDto.method", default)]
    pub method: Option<RFunctionMethodDto>,
}

/// The descriptor extension attached to R function/script methods.
#[derive(Debug, Clone, Deserialize)]
pub struct RFunctionMethodDto {
    #[serde(default)]
    pub func: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(rename = "rPackage", default)]
    pub r_package: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl From<MethodDto> for DsMethod {
    fn from(dto: MethodDto) -> Self {
        let descriptor = match dto.method {
            None => MethodDescriptor::NamedOnly,
            Some(method) => {
                let (class, value) = match method.func {
                    Some(func) => (MethodClass::Func, func),
                    None => (MethodClass::Script, method.script.unwrap_or_default()),
                };
                MethodDescriptor::Function {
                    class,
                    value,
                    package: method.r_package,
                    version: method.version,
                }
            }
        };
        DsMethod {
            name: dto.name,
            descriptor,
        }
    }
}

/// Command record from `GET /datashield/session/{id}/command/{rid}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandDto {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "withResult", default)]
    pub with_result: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl CommandDto {
    /// Whether the command reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_deref(), Some("COMPLETED") | Some("FAILED"))
    }

    pub fn is_failed(&self) -> bool {
        self.status.as_deref() == Some("FAILED")
    }
}
