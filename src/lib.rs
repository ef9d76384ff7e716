//! Role synchronization between a local user store and an LDAP directory.
//!
//! The crate keeps directory role (group) entries in step with a local
//! application's users and roles:
//!
//! - [`RoleEntry`] mirrors one role entry with lazy dirty-tracking, staged
//!   renames, and membership edits; [`RoleRegistry`] caches entries so each
//!   role is loaded at most once per pass.
//! - [`ReconciliationScanner`] walks the local user population and reports
//!   (or, in export mode, repairs) users with no directory counterpart.
//! - [`DirectoryOps`] is the transport seam; [`LdapDirectory`] implements
//!   it over `ldap3`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rolesync::{LdapDirectory, LdapSettings, RoleRegistry, RoleSyncConfig};
//!
//! # async fn run() -> Result<(), rolesync::DirectoryError> {
//! let settings = LdapSettings::new("ldap.example.com", "cn=admin,dc=example,dc=com")
//!     .with_password("secret");
//! let directory = Arc::new(LdapDirectory::new(settings));
//! let config = Arc::new(RoleSyncConfig::new("ou=groups,dc=example,dc=com"));
//!
//! let mut registry = RoleRegistry::new(directory, config);
//! let role = registry.get("editors", false).await?;
//! println!("{} members", role.members().len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod directory;
pub mod dn;
pub mod entity;
pub mod error;
pub mod filter;
pub mod identity;
pub mod registry;
pub mod scanner;
pub mod users;

pub use config::{AppConfig, LdapSettings, MemberFormat, RoleSyncConfig, SearchScope};
pub use directory::{AttrMap, DirectoryEntry, DirectoryOps, LdapDirectory};
pub use entity::{RoleEntry, SaveOutcome};
pub use error::{DirectoryError, DirectoryResult, SyncError, SyncResult};
pub use identity::{
    DirectoryIdentity, ExportProvisioner, IdentityLookup, LdapExportProvisioner,
    LdapIdentityLookup,
};
pub use registry::RoleRegistry;
pub use scanner::{CheckHandler, ExportHandler, ReconciliationScanner, ScanHandler, ScanSummary};
pub use users::{JsonUserStore, LocalUser, UserStore};
