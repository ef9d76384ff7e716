//! Configuration types for the role synchronization engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Search scope for directory lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    /// The base entry only.
    Base,
    /// Immediate children of the base entry.
    OneLevel,
    /// The base entry and its whole subtree.
    Subtree,
}

/// How a user is represented inside a role's member attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberFormat {
    /// Store the user's distinguished name.
    Dn,
    /// Store the value of a configured source attribute.
    Attribute,
}

/// Connection settings for the LDAP transport.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapSettings {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on a plain connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Bind DN for authentication.
    pub bind_dn: String,

    /// Bind password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

impl std::fmt::Debug for LdapSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_connection_timeout() -> u64 {
    30
}

impl LdapSettings {
    /// Create settings with the required fields.
    pub fn new(host: impl Into<String>, bind_dn: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            bind_dn: bind_dn.into(),
            bind_password: None,
            connection_timeout_secs: default_connection_timeout(),
        }
    }

    /// Set the bind password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS).
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    /// Get the LDAP URL.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Validate the settings.
    pub fn validate(&self) -> SyncResult<()> {
        if self.host.is_empty() {
            return Err(SyncError::config("host is required"));
        }
        if self.bind_dn.is_empty() {
            return Err(SyncError::config("bind_dn is required"));
        }
        if self.use_ssl && self.use_starttls {
            return Err(SyncError::config("cannot use both SSL and STARTTLS"));
        }
        Ok(())
    }
}

/// Mapping between the host application's role/user model and the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSyncConfig {
    /// Base DN under which role entries live.
    pub base_dn: String,

    /// Search scope for role and user lookups.
    #[serde(default = "default_scope")]
    pub scope: SearchScope,

    /// Naming attribute for role entries.
    #[serde(default = "default_name_attribute")]
    pub name_attribute: String,

    /// Membership attribute on role entries.
    #[serde(default = "default_member_attribute")]
    pub member_attribute: String,

    /// How member values are derived from users.
    #[serde(default = "default_member_format")]
    pub member_format: MemberFormat,

    /// Source attribute for member values when `member_format` is
    /// `attribute`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_source_attribute: Option<String>,

    /// Member value appended to every saved role when the member attribute
    /// would otherwise fail the directory's schema (e.g. groupOfNames
    /// requires at least one member).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_member: Option<String>,

    /// Object classes stamped onto newly created role entries, and required
    /// of existing ones by the role search filter.
    #[serde(default = "default_object_classes")]
    pub object_classes: Vec<String>,

    /// Raw extra filter fragment ANDed into the role search filter. Trusted
    /// configuration; not escaped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_filter: Option<String>,

    /// Directory attribute whose value becomes a user's external
    /// authentication name; the DN is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_attribute: Option<String>,

    /// Base DN under which user entries live. Falls back to `base_dn`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_base_dn: Option<String>,

    /// Naming attribute for user entries.
    #[serde(default = "default_user_name_attribute")]
    pub user_name_attribute: String,

    /// Object classes for user entries.
    #[serde(default = "default_user_object_classes")]
    pub user_object_classes: Vec<String>,

    /// Raw extra filter fragment ANDed into the user search filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_extra_filter: Option<String>,

    /// Attribute receiving the local numeric uid when exporting users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_uid_attribute: Option<String>,
}

fn default_scope() -> SearchScope {
    SearchScope::Subtree
}

fn default_name_attribute() -> String {
    "cn".to_string()
}

fn default_member_attribute() -> String {
    "member".to_string()
}

fn default_member_format() -> MemberFormat {
    MemberFormat::Dn
}

fn default_object_classes() -> Vec<String> {
    vec!["top".to_string(), "groupOfNames".to_string()]
}

fn default_user_name_attribute() -> String {
    "uid".to_string()
}

fn default_user_object_classes() -> Vec<String> {
    vec![
        "top".to_string(),
        "person".to_string(),
        "organizationalPerson".to_string(),
        "inetOrgPerson".to_string(),
    ]
}

impl RoleSyncConfig {
    /// Create a config with the required base DN and library defaults for
    /// everything else.
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope: default_scope(),
            name_attribute: default_name_attribute(),
            member_attribute: default_member_attribute(),
            member_format: default_member_format(),
            member_source_attribute: None,
            default_member: None,
            object_classes: default_object_classes(),
            extra_filter: None,
            unique_attribute: None,
            user_base_dn: None,
            user_name_attribute: default_user_name_attribute(),
            user_object_classes: default_user_object_classes(),
            user_extra_filter: None,
            user_uid_attribute: None,
        }
    }

    /// Base DN for user lookups.
    #[must_use]
    pub fn user_base(&self) -> &str {
        self.user_base_dn.as_deref().unwrap_or(&self.base_dn)
    }

    /// Validate the mapping.
    pub fn validate(&self) -> SyncResult<()> {
        if self.base_dn.is_empty() {
            return Err(SyncError::config("base_dn is required"));
        }
        if self.name_attribute.is_empty() {
            return Err(SyncError::config("name_attribute is required"));
        }
        if self.member_attribute.is_empty() {
            return Err(SyncError::config("member_attribute is required"));
        }
        if self.object_classes.is_empty() {
            return Err(SyncError::config("at least one object class is required"));
        }
        if self.member_format == MemberFormat::Attribute && self.member_source_attribute.is_none() {
            return Err(SyncError::config(
                "member_format 'attribute' requires member_source_attribute",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration file layout for the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// LDAP transport settings.
    pub ldap: LdapSettings,

    /// Role/user mapping.
    pub sync: RoleSyncConfig,

    /// Path to the local user inventory file.
    pub user_inventory: String,
}

impl AppConfig {
    /// Load and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| SyncError::config(format!("failed to parse configuration: {e}")))?;
        Ok(config)
    }

    /// Validate all sections.
    pub fn validate(&self) -> SyncResult<()> {
        self.ldap.validate()?;
        self.sync.validate()?;
        if self.user_inventory.is_empty() {
            return Err(SyncError::config("user_inventory is required"));
        }
        Ok(())
    }
}
