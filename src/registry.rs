//! Single-flight role cache.
//!
//! [`RoleRegistry`] hands out mutable role entries while guaranteeing at
//! most one directory lookup per role name. Callers hold the registry for
//! the duration of a synchronization pass and reset it (wholly or per role)
//! when they need a fresh view.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::RoleSyncConfig;
use crate::directory::DirectoryOps;
use crate::entity::RoleEntry;
use crate::error::DirectoryResult;

/// Cache of loaded role entries, keyed by role name.
pub struct RoleRegistry {
    directory: Arc<dyn DirectoryOps>,
    config: Arc<RoleSyncConfig>,
    roles: HashMap<String, RoleEntry>,
}

impl RoleRegistry {
    /// Create an empty registry over the given transport and mapping.
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryOps>, config: Arc<RoleSyncConfig>) -> Self {
        Self {
            directory,
            config,
            roles: HashMap::new(),
        }
    }

    /// Get the entry for a role, loading it on first access.
    ///
    /// Repeated calls return the same cached entity, so staged changes
    /// accumulate across call sites until [`RoleEntry::save`] runs. Passing
    /// `force_reload` discards any cached entity first.
    #[instrument(skip(self))]
    pub async fn get(&mut self, name: &str, force_reload: bool) -> DirectoryResult<&mut RoleEntry> {
        if force_reload {
            self.roles.remove(name);
        }
        match self.roles.entry(name.to_string()) {
            Entry::Occupied(cached) => Ok(cached.into_mut()),
            Entry::Vacant(slot) => {
                debug!(role = %name, "Loading role into registry");
                let entry =
                    RoleEntry::load(self.directory.clone(), self.config.clone(), name).await?;
                Ok(slot.insert(entry))
            }
        }
    }

    /// Drop one cached role, or every cached role when `name` is `None`.
    /// The next access reloads from the directory.
    pub fn reset(&mut self, name: Option<&str>) {
        match name {
            Some(name) => {
                self.roles.remove(name);
            }
            None => self.roles.clear(),
        }
    }

    /// Number of cached roles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether the registry holds no cached roles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl std::fmt::Debug for RoleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleRegistry")
            .field("roles", &self.roles.keys().collect::<Vec<_>>())
            .finish()
    }
}
