//! User-side directory identity lookup and export provisioning.
//!
//! The reconciliation scan resolves each local user to a directory identity
//! through [`IdentityLookup`]: a single-flight cache with explicit per-key
//! eviction so a full-population scan stays memory-bounded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::RoleSyncConfig;
use crate::directory::{AttrMap, DirectoryOps};
use crate::dn::escape_dn_value;
use crate::error::{DirectoryResult, SyncError, SyncResult};
use crate::filter::{class_filter, name_filter};
use crate::users::LocalUser;

/// A local user's counterpart in the directory.
#[derive(Debug, Clone)]
pub struct DirectoryIdentity {
    /// Distinguished name: the located entry's DN, or the DN a new entry
    /// would be created at when `exists` is false.
    pub dn: String,
    /// Whether a matching directory entry was found.
    pub exists: bool,
    /// Requested attributes from the located entry.
    pub attributes: AttrMap,
}

impl DirectoryIdentity {
    /// First value of an attribute, if present.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of an attribute (empty when unset).
    #[must_use]
    pub fn attribute(&self, name: &str) -> &[String] {
        self.attributes.get(name).map_or(&[], Vec::as_slice)
    }
}

/// Resolves usernames to directory identities.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Look up (or construct) the directory identity for a username. At
    /// most one directory search is performed per name until eviction.
    async fn resolve(&self, username: &str) -> DirectoryResult<DirectoryIdentity>;

    /// Drop the cached identity for a username.
    async fn evict(&self, username: &str);

    /// Number of identities currently cached. Reported by the scan's
    /// progress line as its memory signal.
    async fn cached(&self) -> usize;
}

/// LDAP-backed identity lookup with a single-flight cache.
pub struct LdapIdentityLookup {
    directory: Arc<dyn DirectoryOps>,
    config: Arc<RoleSyncConfig>,
    cache: Mutex<HashMap<String, DirectoryIdentity>>,
}

impl LdapIdentityLookup {
    /// Create a lookup over the given transport and mapping.
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryOps>, config: Arc<RoleSyncConfig>) -> Self {
        Self {
            directory,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl IdentityLookup for LdapIdentityLookup {
    #[instrument(skip(self))]
    async fn resolve(&self, username: &str) -> DirectoryResult<DirectoryIdentity> {
        if let Some(hit) = self.cache.lock().await.get(username) {
            return Ok(hit.clone());
        }

        let config = &self.config;
        let class_clause = class_filter(
            &config.user_object_classes,
            config.user_extra_filter.as_deref(),
        );
        let filter = name_filter(&config.user_name_attribute, username, &class_clause);

        let mut attributes: Vec<&str> = vec![&config.user_name_attribute];
        if let Some(unique) = &config.unique_attribute {
            attributes.push(unique);
        }
        // Membership edits read this attribute off the identity.
        if let Some(member_source) = &config.member_source_attribute {
            attributes.push(member_source);
        }

        let hits = self
            .directory
            .search(
                config.user_base(),
                config.scope,
                &filter,
                &attributes,
                1,
            )
            .await?;

        let identity = match hits.into_iter().next() {
            Some(entry) => {
                debug!(username = %username, dn = %entry.dn, "Directory identity found");
                DirectoryIdentity {
                    dn: entry.dn,
                    exists: true,
                    attributes: entry.attributes,
                }
            }
            None => {
                let dn = format!(
                    "{}={},{}",
                    config.user_name_attribute,
                    escape_dn_value(username),
                    config.user_base()
                );
                debug!(username = %username, dn = %dn, "No directory identity; staged");
                DirectoryIdentity {
                    dn,
                    exists: false,
                    attributes: AttrMap::new(),
                }
            }
        };

        self.cache
            .lock()
            .await
            .insert(username.to_string(), identity.clone());
        Ok(identity)
    }

    async fn evict(&self, username: &str) {
        self.cache.lock().await.remove(username);
    }

    async fn cached(&self) -> usize {
        self.cache.lock().await.len()
    }
}

/// Provisions missing users into an external target during an export scan.
#[async_trait]
pub trait ExportProvisioner: Send + Sync {
    /// Create the user's counterpart in the target system.
    async fn provision(&self, user: &LocalUser) -> SyncResult<()>;
}

/// Provisions users as directory entries under the configured user base.
pub struct LdapExportProvisioner {
    directory: Arc<dyn DirectoryOps>,
    config: Arc<RoleSyncConfig>,
}

impl LdapExportProvisioner {
    /// Create a provisioner over the given transport and mapping.
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryOps>, config: Arc<RoleSyncConfig>) -> Self {
        Self { directory, config }
    }
}

#[async_trait]
impl ExportProvisioner for LdapExportProvisioner {
    #[instrument(skip(self, user), fields(user = %user.name))]
    async fn provision(&self, user: &LocalUser) -> SyncResult<()> {
        let config = &self.config;
        let dn = format!(
            "{}={},{}",
            config.user_name_attribute,
            escape_dn_value(&user.name),
            config.user_base()
        );

        let mut attributes = AttrMap::new();
        attributes.insert("objectclass".to_string(), config.user_object_classes.clone());
        attributes.insert(
            config.user_name_attribute.clone(),
            vec![user.name.clone()],
        );
        // Person-derived object classes require cn and sn.
        attributes
            .entry("cn".to_string())
            .or_insert_with(|| vec![user.name.clone()]);
        attributes
            .entry("sn".to_string())
            .or_insert_with(|| vec![user.name.clone()]);
        if let (Some(uid_attribute), Some(uid)) = (&config.user_uid_attribute, &user.uid) {
            attributes.insert(uid_attribute.clone(), vec![uid.clone()]);
        }

        match self.directory.add(&dn, &attributes).await {
            Ok(()) => Ok(()),
            // Raced with another writer; converge by modifying in place.
            Err(e) if e.is_already_exists() => self
                .directory
                .modify(&dn, &attributes)
                .await
                .map_err(|e| SyncError::Provisioning {
                    user: user.name.clone(),
                    message: e.to_string(),
                }),
            Err(e) => Err(SyncError::Provisioning {
                user: user.name.clone(),
                message: e.to_string(),
            }),
        }
    }
}
