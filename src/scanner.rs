//! Reconciliation scan over the local user population.
//!
//! The scanner walks every local user, resolves each to a directory
//! identity, and dispatches found/missing callbacks to a [`ScanHandler`].
//! `check` mode only counts; `export` mode provisions missing users and
//! repairs absent authentication-name mappings.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::RoleSyncConfig;
use crate::error::SyncResult;
use crate::identity::{DirectoryIdentity, ExportProvisioner, IdentityLookup};
use crate::users::{LocalUser, UserStore};

/// Reserved local accounts (anonymous and superuser) never reconciled.
const RESERVED_USER_IDS: [i64; 2] = [0, 1];

/// How often progress is reported, in users.
const PROGRESS_INTERVAL: u64 = 1024;

/// Counters accumulated over one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Users examined (reserved ids excluded).
    pub scanned: u64,
    /// Users with a matching directory entry.
    pub found: u64,
    /// Users with no directory entry.
    pub missing: u64,
    /// Users whose reconciliation failed; the scan continued past them.
    pub failed: u64,
}

/// Per-user callbacks invoked during a scan.
///
/// Both callbacks default to no-ops, so a handler only implements the
/// branch it cares about.
#[async_trait]
pub trait ScanHandler: Send + Sync {
    /// The user has a directory entry. `mapped_auth_name` is the user's
    /// existing authentication-name mapping, already fetched by the scan;
    /// `None` means no mapping is recorded.
    async fn on_found(
        &self,
        user: &LocalUser,
        identity: &DirectoryIdentity,
        mapped_auth_name: Option<&str>,
    ) -> SyncResult<()> {
        let _ = (user, identity, mapped_auth_name);
        Ok(())
    }

    /// The user has no directory entry.
    async fn on_missing(&self, user: &LocalUser) -> SyncResult<()> {
        let _ = user;
        Ok(())
    }
}

/// Read-only reconciliation: counts only, never writes.
#[derive(Debug, Default)]
pub struct CheckHandler;

#[async_trait]
impl ScanHandler for CheckHandler {}

/// Export reconciliation: provisions missing users and repairs absent
/// authentication-name mappings for found ones.
pub struct ExportHandler {
    store: Arc<dyn UserStore>,
    provisioner: Arc<dyn ExportProvisioner>,
    config: Arc<RoleSyncConfig>,
}

impl ExportHandler {
    /// Create an export handler writing through the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn UserStore>,
        provisioner: Arc<dyn ExportProvisioner>,
        config: Arc<RoleSyncConfig>,
    ) -> Self {
        Self {
            store,
            provisioner,
            config,
        }
    }
}

#[async_trait]
impl ScanHandler for ExportHandler {
    async fn on_found(
        &self,
        user: &LocalUser,
        identity: &DirectoryIdentity,
        mapped_auth_name: Option<&str>,
    ) -> SyncResult<()> {
        if mapped_auth_name.is_some() {
            return Ok(());
        }

        // Prefer the configured unique attribute; fall back to the DN.
        let auth_name = self
            .config
            .unique_attribute
            .as_deref()
            .and_then(|attr| identity.first(attr))
            .unwrap_or(&identity.dn);

        info!(user = %user.name, auth_name = %auth_name, "Repairing authentication-name mapping");
        self.store.set_auth_name(user.id, auth_name).await
    }

    async fn on_missing(&self, user: &LocalUser) -> SyncResult<()> {
        info!(user = %user.name, "Provisioning missing user");
        self.provisioner.provision(user).await
    }
}

/// Walks the user population and reconciles each user against the
/// directory.
pub struct ReconciliationScanner {
    store: Arc<dyn UserStore>,
    lookup: Arc<dyn IdentityLookup>,
}

impl ReconciliationScanner {
    /// Create a scanner over the given user store and identity lookup.
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, lookup: Arc<dyn IdentityLookup>) -> Self {
        Self { store, lookup }
    }

    /// Run one full scan, dispatching to `handler` per user.
    ///
    /// Per-user failures are logged and counted; the scan continues. Only
    /// a failure to enumerate the user population aborts the run.
    #[instrument(skip(self, handler))]
    pub async fn scan(&self, handler: &dyn ScanHandler) -> SyncResult<ScanSummary> {
        let users = self.store.users().await?;
        let total = users
            .iter()
            .filter(|u| !RESERVED_USER_IDS.contains(&u.id))
            .count() as u64;

        info!(total = total, "Starting reconciliation scan");

        let mut summary = ScanSummary::default();
        for user in &users {
            if RESERVED_USER_IDS.contains(&user.id) {
                debug!(user = %user.name, id = user.id, "Skipping reserved account");
                continue;
            }

            summary.scanned += 1;
            match self.reconcile(user, handler).await {
                Ok(true) => summary.found += 1,
                Ok(false) => summary.missing += 1,
                Err(e) => {
                    warn!(user = %user.name, error = %e, "Reconciliation failed; continuing");
                    summary.failed += 1;
                }
            }

            if summary.scanned % PROGRESS_INTERVAL == 0 && total > 0 {
                info!(
                    scanned = summary.scanned,
                    percent = summary.scanned * 100 / total,
                    cached_identities = self.lookup.cached().await,
                    "Scan progress"
                );
            }
        }

        if summary.missing > 0 {
            warn!(
                missing = summary.missing,
                "Some users have no directory entry"
            );
        }
        info!(
            scanned = summary.scanned,
            found = summary.found,
            missing = summary.missing,
            failed = summary.failed,
            "Reconciliation scan complete"
        );

        Ok(summary)
    }

    /// Reconcile one user; `Ok(true)` when a directory entry was found.
    async fn reconcile(&self, user: &LocalUser, handler: &dyn ScanHandler) -> SyncResult<bool> {
        // A previously mapped authentication name takes precedence over
        // the login name when searching the directory.
        let mapped_auth_name = self.store.auth_name(user.id).await?;
        let username = mapped_auth_name
            .clone()
            .unwrap_or_else(|| user.name.clone());

        let result = async {
            let identity = self.lookup.resolve(&username).await?;
            if identity.exists {
                handler
                    .on_found(user, &identity, mapped_auth_name.as_deref())
                    .await?;
                Ok(true)
            } else {
                handler.on_missing(user).await?;
                Ok(false)
            }
        }
        .await;

        // Bound the cache: each user is resolved once per scan.
        self.lookup.evict(&username).await;
        result
    }
}
