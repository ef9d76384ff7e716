//! Directory transport.
//!
//! [`DirectoryOps`] is the seam between the synchronization engine and the
//! wire protocol: search, add, modify (replace semantics), delete, and
//! rename. [`LdapDirectory`] implements it over `ldap3` with a lazily
//! established, cached connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry, SearchOptions};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::{LdapSettings, SearchScope};
use crate::dn::split_rdn;
use crate::error::{DirectoryError, DirectoryResult, RC_SIZE_LIMIT_EXCEEDED};

/// Attribute name to ordered value list. Directory attributes are always
/// multi-valued.
pub type AttrMap = HashMap<String, Vec<String>>;

/// One entry returned from a directory search.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Requested attributes and their values.
    pub attributes: AttrMap,
}

/// Operations the synchronization engine needs from the directory.
#[async_trait]
pub trait DirectoryOps: Send + Sync {
    /// Search under `base` with the given filter, requesting only the named
    /// attributes. A `size_limit` of 0 means unlimited.
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
        size_limit: i32,
    ) -> DirectoryResult<Vec<DirectoryEntry>>;

    /// Create an entry.
    async fn add(&self, dn: &str, attributes: &AttrMap) -> DirectoryResult<()>;

    /// Replace the given attributes on an existing entry.
    async fn modify(&self, dn: &str, attributes: &AttrMap) -> DirectoryResult<()>;

    /// Delete an entry.
    async fn delete(&self, dn: &str) -> DirectoryResult<()>;

    /// Move/rename an entry from `old_dn` to `new_dn`.
    async fn rename(&self, old_dn: &str, new_dn: &str) -> DirectoryResult<()>;
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// `ldap3`-backed directory transport.
pub struct LdapDirectory {
    settings: LdapSettings,
    /// Cached connection, lazily initialized.
    connection: Arc<RwLock<Option<Ldap>>>,
}

impl LdapDirectory {
    /// Create a transport for the given settings. No connection is made
    /// until the first operation.
    #[must_use]
    pub fn new(settings: LdapSettings) -> Self {
        Self {
            settings,
            connection: Arc::new(RwLock::new(None)),
        }
    }

    /// Get the cached connection, establishing one if necessary.
    async fn get_connection(&self) -> DirectoryResult<Ldap> {
        {
            let guard = self.connection.read().await;
            if let Some(ref conn) = *guard {
                return Ok(conn.clone());
            }
        }

        let conn = self.create_connection().await?;

        {
            let mut guard = self.connection.write().await;
            *guard = Some(conn.clone());
        }

        Ok(conn)
    }

    /// Connect, spawn the connection driver, and bind.
    async fn create_connection(&self) -> DirectoryResult<Ldap> {
        let url = self.settings.url();

        debug!(url = %url, "Connecting to directory server");

        let conn_settings = LdapConnSettings::new()
            .set_conn_timeout(std::time::Duration::from_secs(
                self.settings.connection_timeout_secs,
            ))
            .set_starttls(self.settings.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, &url)
            .await
            .map_err(|e| {
                DirectoryError::connection_failed_with_source(
                    format!("failed to connect to directory server at {url}"),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "Directory connection driver error");
            }
        });

        let bind_dn = &self.settings.bind_dn;
        let bind_password = self.settings.bind_password.as_deref().unwrap_or("");

        debug!(bind_dn = %bind_dn, "Performing bind");

        let result = ldap.simple_bind(bind_dn, bind_password).await.map_err(|e| {
            DirectoryError::connection_failed_with_source(format!("bind failed for {bind_dn}"), e)
        })?;

        if result.rc != 0 {
            return Err(DirectoryError::from_result_code(
                result.rc,
                result.text,
                bind_dn,
            ));
        }

        info!(host = %self.settings.host, "Directory connection established");

        Ok(ldap)
    }

    /// Convert an attribute map to the `(name, values)` form `ldap3` adds
    /// entries with.
    fn to_add_attrs(attributes: &AttrMap) -> Vec<(String, HashSet<String>)> {
        attributes
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| (name.clone(), values.iter().cloned().collect()))
            .collect()
    }
}

#[async_trait]
impl DirectoryOps for LdapDirectory {
    #[instrument(skip(self, attributes))]
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
        size_limit: i32,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let mut ldap = self.get_connection().await?;

        if size_limit > 0 {
            ldap.with_search_options(SearchOptions::new().sizelimit(size_limit));
        }

        let result = ldap
            .search(base, scope.into(), filter, attributes.to_vec())
            .await
            .map_err(|e| DirectoryError::operation_failed_with_source("search failed", e))?;

        let ldap3::SearchResult(raw_entries, ldap_result) = result;

        // A size-limited search reports sizeLimitExceeded alongside the
        // partial result set; that is the expected outcome here.
        if ldap_result.rc != 0 && ldap_result.rc != RC_SIZE_LIMIT_EXCEEDED {
            return Err(DirectoryError::from_result_code(
                ldap_result.rc,
                ldap_result.text,
                base,
            ));
        }

        let entries = raw_entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attributes: entry.attrs,
            })
            .collect();

        Ok(entries)
    }

    #[instrument(skip(self, attributes))]
    async fn add(&self, dn: &str, attributes: &AttrMap) -> DirectoryResult<()> {
        let mut ldap = self.get_connection().await?;

        debug!(dn = %dn, "Adding directory entry");

        let result = ldap
            .add(dn, Self::to_add_attrs(attributes))
            .await
            .map_err(|e| {
                DirectoryError::operation_failed_with_source(format!("add failed for {dn}"), e)
            })?;

        if result.rc != 0 {
            return Err(DirectoryError::from_result_code(result.rc, result.text, dn));
        }

        info!(dn = %dn, "Directory entry created");
        Ok(())
    }

    #[instrument(skip(self, attributes))]
    async fn modify(&self, dn: &str, attributes: &AttrMap) -> DirectoryResult<()> {
        let mut ldap = self.get_connection().await?;

        debug!(dn = %dn, "Modifying directory entry");

        let mods: Vec<Mod<String>> = attributes
            .iter()
            .map(|(name, values)| Mod::Replace(name.clone(), values.iter().cloned().collect()))
            .collect();

        if mods.is_empty() {
            return Ok(());
        }

        let result = ldap.modify(dn, mods).await.map_err(|e| {
            DirectoryError::operation_failed_with_source(format!("modify failed for {dn}"), e)
        })?;

        if result.rc != 0 {
            return Err(DirectoryError::from_result_code(result.rc, result.text, dn));
        }

        info!(dn = %dn, "Directory entry updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, dn: &str) -> DirectoryResult<()> {
        let mut ldap = self.get_connection().await?;

        debug!(dn = %dn, "Deleting directory entry");

        let result = ldap.delete(dn).await.map_err(|e| {
            DirectoryError::operation_failed_with_source(format!("delete failed for {dn}"), e)
        })?;

        if result.rc != 0 {
            return Err(DirectoryError::from_result_code(result.rc, result.text, dn));
        }

        info!(dn = %dn, "Directory entry deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rename(&self, old_dn: &str, new_dn: &str) -> DirectoryResult<()> {
        let mut ldap = self.get_connection().await?;

        debug!(old_dn = %old_dn, new_dn = %new_dn, "Renaming directory entry");

        let (new_rdn, new_parent) = split_rdn(new_dn);

        let result = ldap
            .modifydn(old_dn, new_rdn, true, new_parent)
            .await
            .map_err(|e| {
                DirectoryError::operation_failed_with_source(
                    format!("rename failed for {old_dn}"),
                    e,
                )
            })?;

        if result.rc != 0 {
            return Err(DirectoryError::from_result_code(
                result.rc,
                result.text,
                old_dn,
            ));
        }

        info!(old_dn = %old_dn, new_dn = %new_dn, "Directory entry renamed");
        Ok(())
    }
}

impl std::fmt::Debug for LdapDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectory")
            .field("settings", &self.settings)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_conversion() {
        assert!(matches!(Scope::from(SearchScope::Base), Scope::Base));
        assert!(matches!(Scope::from(SearchScope::OneLevel), Scope::OneLevel));
        assert!(matches!(Scope::from(SearchScope::Subtree), Scope::Subtree));
    }

    #[test]
    fn add_attrs_skips_empty_value_lists() {
        let mut attrs = AttrMap::new();
        attrs.insert("cn".to_string(), vec!["editors".to_string()]);
        attrs.insert("description".to_string(), Vec::new());

        let converted = LdapDirectory::to_add_attrs(&attrs);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].0, "cn");
    }
}
