//! DataSHIELD driver adapter for Opal servers.
//!
//! DataSHIELD runs privacy-preserving statistics across independently hosted
//! data servers: a coordinating client assigns data into symbols inside a
//! remote R session and evaluates non-disclosive aggregate expressions
//! against them. This crate translates that capability set into the REST
//! calls and command-polling protocol an Opal server implements.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use datashield_opal::interface::{
//!     DsConnection, DsDriver, DsResult, LoginInfo, TableAssignOptions,
//! };
//! use datashield_opal::opal::OpalDriver;
//!
//! # async fn demo() -> Result<(), datashield_opal::DsError> {
//! let login = LoginInfo::with_password(
//!     "server1",
//!     "https://opal-demo.obiba.org",
//!     "dsuser",
//!     "password",
//! );
//! let conn = OpalDriver.new_connection(login).await?;
//!
//! conn.assign_table("x", "CNSIM.CNSIM1", TableAssignOptions::new(), false)
//!     .await?;
//! let mut result = conn.aggregate("meanDS(x$LAB_GLUC)", false).await?;
//! let mean = result.fetch().await?;
//! println!("{mean:?}");
//!
//! conn.disconnect().await;
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// DataSHIELD capability contract and login declarations
pub mod interface;

// The Opal driver implementation
pub mod opal;

pub use error::DsError;
pub use interface::{
    AsyncSupport, BestEffort, Credentials, DsConnection, DsDriver, DsMethod, DsPackage, DsResult,
    LoginBuilder, LoginInfo, MethodClass, MethodDescriptor, MethodKind, ProfileList,
    TableAssignOptions,
};
pub use opal::{OpalConnection, OpalDriver, OpalResult, OpalSession};
