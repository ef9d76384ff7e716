//! Local user-store collaborator.
//!
//! The host application owns the user population and the mapping from user
//! ids to external authentication names; the scanner only needs the
//! [`UserStore`] contract. [`JsonUserStore`] is the file-backed
//! implementation the CLI runs against.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// A user record from the local store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUser {
    /// Local numeric identity. Ids 0 and 1 are reserved for the anonymous
    /// and superuser accounts.
    pub id: i64,
    /// Login name, matched against the directory's user naming attribute.
    pub name: String,
    /// Optional numeric uid exported into the directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Access to the local user population and its authentication-name map.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// All local user records.
    async fn users(&self) -> SyncResult<Vec<LocalUser>>;

    /// External authentication name mapped to a user, if any.
    async fn auth_name(&self, user_id: i64) -> SyncResult<Option<String>>;

    /// Record (repair) the authentication name for a user.
    async fn set_auth_name(&self, user_id: i64, auth_name: &str) -> SyncResult<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Inventory {
    #[serde(default)]
    users: Vec<LocalUser>,
    /// User id (stringified) to authentication name.
    #[serde(default)]
    auth_names: HashMap<String, String>,
}

/// JSON-file-backed user store.
pub struct JsonUserStore {
    path: PathBuf,
    inventory: Mutex<Inventory>,
}

impl JsonUserStore {
    /// Load the inventory file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path)?;
        let inventory: Inventory = serde_json::from_str(&raw).map_err(|e| {
            SyncError::user_store(format!("failed to parse {}: {e}", path.display()))
        })?;
        Ok(Self {
            path,
            inventory: Mutex::new(inventory),
        })
    }

    fn inventory(&self) -> SyncResult<std::sync::MutexGuard<'_, Inventory>> {
        self.inventory
            .lock()
            .map_err(|_| SyncError::user_store("inventory lock poisoned"))
    }

    fn persist(&self, inventory: &Inventory) -> SyncResult<()> {
        let raw = serde_json::to_string_pretty(inventory)
            .map_err(|e| SyncError::user_store(format!("failed to serialize inventory: {e}")))?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for JsonUserStore {
    async fn users(&self) -> SyncResult<Vec<LocalUser>> {
        Ok(self.inventory()?.users.clone())
    }

    async fn auth_name(&self, user_id: i64) -> SyncResult<Option<String>> {
        Ok(self
            .inventory()?
            .auth_names
            .get(&user_id.to_string())
            .cloned())
    }

    async fn set_auth_name(&self, user_id: i64, auth_name: &str) -> SyncResult<()> {
        let snapshot = {
            let mut inventory = self.inventory()?;
            inventory
                .auth_names
                .insert(user_id.to_string(), auth_name.to_string());
            inventory.clone()
        };
        self.persist(&snapshot)
    }
}
