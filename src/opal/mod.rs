//! Opal driver for the DataSHIELD interface.
//!
//! This module provides:
//! - REST client and URI building against the Opal `/ws` API root
//! - Wire types for the consumed Opal resources
//! - Remote R session lifecycle
//! - The connection adapter implementing the DataSHIELD capability set
//! - Result handles tracking remote command execution

pub mod connection;
pub mod driver;
pub mod rest;
pub mod result;
pub mod session;
pub mod types;

pub use connection::OpalConnection;
pub use driver::OpalDriver;
pub use rest::{OpalRestClient, UriBuilder};
pub use result::OpalResult;
pub use session::OpalSession;
pub use types::*;
