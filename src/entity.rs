//! Directory-backed role entries with lazy dirty-tracking.
//!
//! A [`RoleEntry`] mirrors one role (group) entry in the directory. Attribute
//! writes go through setters that diff against the stored state, so `save` is
//! a no-op for clean entries; DN reassignment stages a rename that is applied
//! before any attribute write.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::{MemberFormat, RoleSyncConfig};
use crate::directory::{AttrMap, DirectoryOps};
use crate::dn::{escape_dn_value, validate_dn};
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::{class_filter, name_filter};
use crate::identity::DirectoryIdentity;

/// Outcome of [`RoleEntry::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The entry is persisted; the entity is clean.
    Saved,
    /// The directory refused the create because a required attribute (the
    /// member attribute) is still absent. The entity stays dirty; retry
    /// once a member exists.
    NotYetCreatable,
}

/// In-memory representation of one directory role.
pub struct RoleEntry {
    directory: Arc<dyn DirectoryOps>,
    config: Arc<RoleSyncConfig>,
    name: String,
    dn: String,
    exists: bool,
    dirty: bool,
    /// Previous DN while a rename is staged.
    pending_rename: Option<String>,
    attributes: AttrMap,
}

impl RoleEntry {
    /// Look up a role by name, or stage a new entry when none exists.
    ///
    /// A located entry starts clean; a brand-new role is dirty by
    /// construction since it has never been persisted.
    #[instrument(skip(directory, config))]
    pub async fn load(
        directory: Arc<dyn DirectoryOps>,
        config: Arc<RoleSyncConfig>,
        name: &str,
    ) -> DirectoryResult<Self> {
        let class_clause = class_filter(&config.object_classes, config.extra_filter.as_deref());
        let filter = name_filter(&config.name_attribute, name, &class_clause);
        let requested = [config.name_attribute.as_str(), config.member_attribute.as_str()];

        let hits = directory
            .search(&config.base_dn, config.scope, &filter, &requested, 1)
            .await?;

        let entry = if hits.len() == 1 {
            let mut hit = hits.into_iter().next().ok_or_else(|| {
                DirectoryError::operation_failed("search reported a hit but returned none")
            })?;

            let mut attributes = AttrMap::new();
            for attr in requested {
                if let Some(values) = hit.attributes.remove(attr) {
                    attributes.insert(attr.to_string(), values);
                }
            }

            debug!(role = %name, dn = %hit.dn, "Role entry loaded");
            Self {
                directory,
                config,
                name: name.to_string(),
                dn: hit.dn,
                exists: true,
                dirty: false,
                pending_rename: None,
                attributes,
            }
        } else {
            let dn = format!(
                "{}={},{}",
                config.name_attribute,
                escape_dn_value(name),
                config.base_dn
            );
            let mut attributes = AttrMap::new();
            attributes.insert(config.name_attribute.clone(), vec![name.to_string()]);

            debug!(role = %name, dn = %dn, "Role entry staged for creation");
            Self {
                directory,
                config,
                name: name.to_string(),
                dn,
                exists: false,
                dirty: true,
                pending_rename: None,
                attributes,
            }
        };

        Ok(entry)
    }

    /// Role name this entry was loaded for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current distinguished name.
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Whether a corresponding directory entry exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Whether in-memory state diverges from the directory.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The previous DN while a rename is staged.
    #[must_use]
    pub fn pending_rename(&self) -> Option<&str> {
        self.pending_rename.as_deref()
    }

    /// Values of an attribute (empty when unset).
    #[must_use]
    pub fn attribute(&self, name: &str) -> &[String] {
        self.attributes.get(name).map_or(&[], Vec::as_slice)
    }

    /// Current member values.
    #[must_use]
    pub fn members(&self) -> &[String] {
        self.attribute(&self.config.member_attribute)
    }

    /// Replace an attribute's value list, marking the entity dirty only when
    /// the new list differs as a set from the stored one.
    ///
    /// `dn` and `exists` are protected; use [`RoleEntry::set_dn`] for
    /// renames.
    pub fn set_attribute(&mut self, name: &str, values: Vec<String>) {
        if name == "dn" || name == "exists" {
            debug!(role = %self.name, attribute = %name, "Ignoring write to protected field");
            return;
        }

        let current: HashSet<&str> = self.attribute(name).iter().map(String::as_str).collect();
        let incoming: HashSet<&str> = values.iter().map(String::as_str).collect();
        if current == incoming {
            return;
        }

        self.attributes.insert(name.to_string(), values);
        self.dirty = true;
    }

    /// Stage a rename to a new distinguished name.
    ///
    /// An invalid DN is ignored (best effort, logged). Reassigning the
    /// current DN is a no-op, so staging is idempotent; assigning the staged
    /// rename's source back cancels the rename.
    pub fn set_dn(&mut self, value: &str) {
        if let Err(e) = validate_dn(value) {
            debug!(role = %self.name, error = %e, "Ignoring invalid DN assignment");
            return;
        }
        if value == self.dn {
            return;
        }

        if self.pending_rename.as_deref() == Some(value) {
            // Reverting to the directory-side DN; no rename needed anymore.
            self.pending_rename = None;
        } else if self.pending_rename.is_none() {
            self.pending_rename = Some(self.dn.clone());
        }
        self.dn = value.to_string();
        self.dirty = true;
    }

    /// Persist pending changes.
    ///
    /// Clean entries return [`SaveOutcome::Saved`] without any directory
    /// call. A staged rename is applied first; then the entry is modified
    /// (when it exists) or added. A create rejected for a missing required
    /// attribute yields [`SaveOutcome::NotYetCreatable`] with the entity
    /// left dirty so the caller can retry once a member exists.
    #[instrument(skip(self), fields(role = %self.name, dn = %self.dn))]
    pub async fn save(&mut self) -> DirectoryResult<SaveOutcome> {
        if !self.dirty {
            return Ok(SaveOutcome::Saved);
        }

        if let Some(old_dn) = self.pending_rename.clone() {
            debug!(old_dn = %old_dn, "Applying staged rename");
            self.directory.rename(&old_dn, &self.dn).await?;
            self.pending_rename = None;
        }

        if let Some(default_member) = self.config.default_member.clone() {
            let members = self
                .attributes
                .entry(self.config.member_attribute.clone())
                .or_default();
            if !members.contains(&default_member) {
                members.push(default_member);
            }
        }

        if self.exists {
            self.directory.modify(&self.dn, &self.attributes).await?;
        } else {
            self.attributes
                .insert("objectclass".to_string(), self.config.object_classes.clone());

            match self.directory.add(&self.dn, &self.attributes).await {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {
                    // Raced with another writer or a stale exists flag.
                    debug!(dn = %self.dn, "Entry already exists; converging via modify");
                    self.directory.modify(&self.dn, &self.attributes).await?;
                }
                Err(e) if e.is_constraint_violation() => {
                    debug!(dn = %self.dn, error = %e, "Role not yet creatable");
                    return Ok(SaveOutcome::NotYetCreatable);
                }
                Err(e) => return Err(e),
            }
            self.exists = true;
        }

        self.dirty = false;
        self.pending_rename = None;
        Ok(SaveOutcome::Saved)
    }

    /// Delete the directory entry.
    ///
    /// When a rename was staged but never saved, the directory still holds
    /// the entry under the old DN, so the delete targets it there.
    #[instrument(skip(self), fields(role = %self.name))]
    pub async fn delete(&mut self) -> DirectoryResult<()> {
        let target = self.pending_rename.as_deref().unwrap_or(&self.dn).to_string();
        self.directory.delete(&target).await?;

        self.exists = false;
        self.dirty = false;
        self.pending_rename = None;
        Ok(())
    }

    /// Append the member value for a user if not already present. Idempotent.
    pub fn add_member(&mut self, identity: &DirectoryIdentity) -> DirectoryResult<()> {
        let value = self.member_value(identity)?;
        let members = self
            .attributes
            .entry(self.config.member_attribute.clone())
            .or_default();
        if !members.contains(&value) {
            members.push(value);
            self.dirty = true;
        }
        Ok(())
    }

    /// Remove the member value for a user if present.
    pub fn remove_member(&mut self, identity: &DirectoryIdentity) -> DirectoryResult<()> {
        let value = self.member_value(identity)?;
        if let Some(members) = self.attributes.get_mut(&self.config.member_attribute) {
            let before = members.len();
            members.retain(|m| *m != value);
            if members.len() != before {
                self.dirty = true;
            }
        }
        Ok(())
    }

    /// Derive the member value for an identity per the configured format.
    fn member_value(&self, identity: &DirectoryIdentity) -> DirectoryResult<String> {
        match self.config.member_format {
            MemberFormat::Dn => Ok(identity.dn.clone()),
            MemberFormat::Attribute => {
                let attribute = self.config.member_source_attribute.as_deref().ok_or_else(
                    || DirectoryError::InvalidConfiguration {
                        message: "member_format 'attribute' requires member_source_attribute"
                            .to_string(),
                    },
                )?;
                identity
                    .first(attribute)
                    .map(ToString::to_string)
                    .ok_or_else(|| {
                        warn!(dn = %identity.dn, attribute = %attribute, "Member source attribute absent");
                        DirectoryError::MissingAttribute {
                            attribute: attribute.to_string(),
                            dn: identity.dn.clone(),
                        }
                    })
            }
        }
    }
}

impl std::fmt::Debug for RoleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleEntry")
            .field("name", &self.name)
            .field("dn", &self.dn)
            .field("exists", &self.exists)
            .field("dirty", &self.dirty)
            .field("pending_rename", &self.pending_rename)
            .field("attributes", &self.attributes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::testing::{FailAdd, MockDirectory};

    const BASE: &str = "dc=example,dc=com";

    fn config() -> Arc<RoleSyncConfig> {
        Arc::new(RoleSyncConfig::new(BASE))
    }

    fn role_attrs(name: &str, members: &[&str]) -> AttrMap {
        let mut attrs = AttrMap::new();
        attrs.insert("cn".to_string(), vec![name.to_string()]);
        attrs.insert(
            "objectclass".to_string(),
            vec!["top".to_string(), "groupOfNames".to_string()],
        );
        if !members.is_empty() {
            attrs.insert(
                "member".to_string(),
                members.iter().map(|m| (*m).to_string()).collect(),
            );
        }
        attrs
    }

    fn identity(dn: &str) -> DirectoryIdentity {
        DirectoryIdentity {
            dn: dn.to_string(),
            exists: true,
            attributes: AttrMap::new(),
        }
    }

    async fn load(directory: &Arc<MockDirectory>, name: &str) -> RoleEntry {
        let dir: Arc<dyn DirectoryOps> = directory.clone();
        RoleEntry::load(dir, config(), name).await.expect("load role")
    }

    #[tokio::test]
    async fn new_role_is_staged_dirty() {
        let directory = Arc::new(MockDirectory::new());
        let role = load(&directory, "editors").await;

        assert!(!role.exists());
        assert!(role.is_dirty());
        assert_eq!(role.dn(), "cn=editors,dc=example,dc=com");
        assert_eq!(role.attribute("cn"), ["editors"]);
    }

    #[tokio::test]
    async fn loaded_role_is_clean() {
        let directory = Arc::new(MockDirectory::new().with_entry(
            "cn=editors,dc=example,dc=com",
            role_attrs("editors", &["uid=alice,dc=example,dc=com"]),
        ));
        let role = load(&directory, "editors").await;

        assert!(role.exists());
        assert!(!role.is_dirty());
        assert_eq!(role.members(), ["uid=alice,dc=example,dc=com"]);
    }

    #[tokio::test]
    async fn save_on_clean_role_is_a_noop() {
        let directory = Arc::new(MockDirectory::new().with_entry(
            "cn=editors,dc=example,dc=com",
            role_attrs("editors", &["uid=alice,dc=example,dc=com"]),
        ));
        let mut role = load(&directory, "editors").await;

        let outcome = role.save().await.expect("save");
        assert_eq!(outcome, SaveOutcome::Saved);
        assert!(directory.write_calls().is_empty());
    }

    #[tokio::test]
    async fn save_of_new_role_issues_add_not_modify() {
        let directory = Arc::new(MockDirectory::new());
        let mut role = load(&directory, "editors").await;
        role.add_member(&identity("uid=alice,dc=example,dc=com"))
            .expect("add member");

        let outcome = role.save().await.expect("save");
        assert_eq!(outcome, SaveOutcome::Saved);
        assert_eq!(
            directory.write_calls(),
            ["add cn=editors,dc=example,dc=com"]
        );
        assert!(role.exists());
        assert!(!role.is_dirty());

        let stored = directory
            .entry("cn=editors,dc=example,dc=com")
            .expect("stored entry");
        assert_eq!(
            stored.get("objectclass"),
            Some(&vec!["top".to_string(), "groupOfNames".to_string()])
        );
    }

    #[tokio::test]
    async fn equal_value_set_does_not_mark_dirty() {
        let directory = Arc::new(MockDirectory::new().with_entry(
            "cn=editors,dc=example,dc=com",
            role_attrs("editors", &["uid=a,dc=x", "uid=b,dc=x"]),
        ));
        let mut role = load(&directory, "editors").await;

        // Same values in a different order: no divergence.
        role.set_attribute(
            "member",
            vec!["uid=b,dc=x".to_string(), "uid=a,dc=x".to_string()],
        );
        assert!(!role.is_dirty());

        role.set_attribute("member", vec!["uid=c,dc=x".to_string()]);
        assert!(role.is_dirty());
    }

    #[tokio::test]
    async fn protected_fields_are_ignored_by_set_attribute() {
        let directory = Arc::new(MockDirectory::new().with_entry(
            "cn=editors,dc=example,dc=com",
            role_attrs("editors", &[]),
        ));
        let mut role = load(&directory, "editors").await;

        role.set_attribute("dn", vec!["cn=other,dc=example,dc=com".to_string()]);
        role.set_attribute("exists", vec!["false".to_string()]);
        assert_eq!(role.dn(), "cn=editors,dc=example,dc=com");
        assert!(role.exists());
        assert!(!role.is_dirty());
    }

    #[tokio::test]
    async fn invalid_dn_assignment_is_silently_ignored() {
        let directory = Arc::new(MockDirectory::new().with_entry(
            "cn=editors,dc=example,dc=com",
            role_attrs("editors", &[]),
        ));
        let mut role = load(&directory, "editors").await;

        role.set_dn("not a dn");
        assert_eq!(role.dn(), "cn=editors,dc=example,dc=com");
        assert!(!role.is_dirty());
        assert!(role.pending_rename().is_none());
    }

    #[tokio::test]
    async fn rename_staging_is_idempotent() {
        let directory = Arc::new(MockDirectory::new().with_entry(
            "cn=editors,dc=example,dc=com",
            role_attrs("editors", &[]),
        ));
        let mut role = load(&directory, "editors").await;

        role.set_dn("cn=writers,dc=example,dc=com");
        assert_eq!(
            role.pending_rename(),
            Some("cn=editors,dc=example,dc=com")
        );
        assert!(role.is_dirty());

        // Second identical assignment must not restage.
        role.set_dn("cn=writers,dc=example,dc=com");
        assert_eq!(
            role.pending_rename(),
            Some("cn=editors,dc=example,dc=com")
        );
        assert_eq!(role.dn(), "cn=writers,dc=example,dc=com");
    }

    #[tokio::test]
    async fn reassigning_original_dn_cancels_rename() {
        let directory = Arc::new(MockDirectory::new().with_entry(
            "cn=editors,dc=example,dc=com",
            role_attrs("editors", &[]),
        ));
        let mut role = load(&directory, "editors").await;

        role.set_dn("cn=writers,dc=example,dc=com");
        role.set_dn("cn=editors,dc=example,dc=com");
        assert!(role.pending_rename().is_none());
        assert_eq!(role.dn(), "cn=editors,dc=example,dc=com");
    }

    #[tokio::test]
    async fn save_applies_rename_before_modify() {
        let directory = Arc::new(MockDirectory::new().with_entry(
            "cn=editors,dc=example,dc=com",
            role_attrs("editors", &["uid=a,dc=x"]),
        ));
        let mut role = load(&directory, "editors").await;

        role.set_dn("cn=writers,dc=example,dc=com");
        let outcome = role.save().await.expect("save");

        assert_eq!(outcome, SaveOutcome::Saved);
        assert_eq!(
            directory.write_calls(),
            [
                "rename cn=editors,dc=example,dc=com -> cn=writers,dc=example,dc=com",
                "modify cn=writers,dc=example,dc=com",
            ]
        );
        assert!(role.pending_rename().is_none());
        assert!(!role.is_dirty());
    }

    #[tokio::test]
    async fn constraint_violation_leaves_entity_retryable() {
        let directory = Arc::new(MockDirectory::new());
        let mut role = load(&directory, "editors").await;

        directory.fail_next_add(FailAdd::ConstraintViolation);
        let outcome = role.save().await.expect("save");

        assert_eq!(outcome, SaveOutcome::NotYetCreatable);
        assert!(role.is_dirty());
        assert!(!role.exists());

        // A member arrives later; the retry succeeds.
        role.add_member(&identity("uid=alice,dc=example,dc=com"))
            .expect("add member");
        let outcome = role.save().await.expect("retry save");
        assert_eq!(outcome, SaveOutcome::Saved);
        assert!(role.exists());
    }

    #[tokio::test]
    async fn already_exists_falls_back_to_modify() {
        let directory = Arc::new(MockDirectory::new());
        let mut role = load(&directory, "editors").await;
        assert!(!role.exists());

        // A concurrent writer creates the entry between load and save.
        directory
            .add("cn=editors,dc=example,dc=com", &role_attrs("editors", &[]))
            .await
            .expect("racing add");

        role.add_member(&identity("uid=alice,dc=example,dc=com"))
            .expect("add member");
        let outcome = role.save().await.expect("save");

        assert_eq!(outcome, SaveOutcome::Saved);
        assert!(role.exists());
        assert!(!role.is_dirty());
        assert_eq!(
            directory.write_calls(),
            [
                "add cn=editors,dc=example,dc=com",
                "add cn=editors,dc=example,dc=com",
                "modify cn=editors,dc=example,dc=com",
            ]
        );
        let stored = directory
            .entry("cn=editors,dc=example,dc=com")
            .expect("stored entry");
        assert_eq!(
            stored.get("member"),
            Some(&vec!["uid=alice,dc=example,dc=com".to_string()])
        );
    }

    #[tokio::test]
    async fn other_directory_errors_propagate() {
        let directory = Arc::new(MockDirectory::new());
        let mut role = load(&directory, "editors").await;

        directory.fail_next_add(FailAdd::Protocol);
        let err = role.save().await.expect_err("save must fail");
        assert!(matches!(err, DirectoryError::Protocol { code: 53, .. }));
        assert!(role.is_dirty());
    }

    #[tokio::test]
    async fn default_member_is_appended_once() {
        let directory = Arc::new(MockDirectory::new());
        let mut cfg = RoleSyncConfig::new(BASE);
        cfg.default_member = Some("cn=placeholder,dc=example,dc=com".to_string());
        let dir: Arc<dyn DirectoryOps> = directory.clone();
        let mut role = RoleEntry::load(dir, Arc::new(cfg), "editors")
            .await
            .expect("load role");

        role.save().await.expect("save");
        assert_eq!(role.members(), ["cn=placeholder,dc=example,dc=com"]);

        // Saving again after a change must not duplicate the default.
        role.set_attribute("description", vec!["editorial staff".to_string()]);
        role.save().await.expect("second save");
        assert_eq!(role.members(), ["cn=placeholder,dc=example,dc=com"]);
    }

    #[tokio::test]
    async fn add_member_is_idempotent() {
        let directory = Arc::new(MockDirectory::new());
        let mut role = load(&directory, "editors").await;

        let alice = identity("uid=alice,dc=example,dc=com");
        role.add_member(&alice).expect("add member");
        role.add_member(&alice).expect("add member again");
        assert_eq!(role.members(), ["uid=alice,dc=example,dc=com"]);
    }

    #[tokio::test]
    async fn remove_member_deletes_the_value() {
        let directory = Arc::new(MockDirectory::new().with_entry(
            "cn=editors,dc=example,dc=com",
            role_attrs("editors", &["uid=alice,dc=x", "uid=bob,dc=x"]),
        ));
        let mut role = load(&directory, "editors").await;

        role.remove_member(&identity("uid=alice,dc=x"))
            .expect("remove member");
        assert_eq!(role.members(), ["uid=bob,dc=x"]);
        assert!(role.is_dirty());

        // Removing a non-member changes nothing.
        role.save().await.expect("save");
        role.remove_member(&identity("uid=carol,dc=x"))
            .expect("remove absent member");
        assert!(!role.is_dirty());
    }

    #[tokio::test]
    async fn member_value_follows_attribute_format() {
        let directory = Arc::new(MockDirectory::new());
        let mut cfg = RoleSyncConfig::new(BASE);
        cfg.member_format = MemberFormat::Attribute;
        cfg.member_source_attribute = Some("uid".to_string());
        let dir: Arc<dyn DirectoryOps> = directory.clone();
        let mut role = RoleEntry::load(dir, Arc::new(cfg), "editors")
            .await
            .expect("load role");

        let mut attrs = AttrMap::new();
        attrs.insert("uid".to_string(), vec!["alice".to_string()]);
        let alice = DirectoryIdentity {
            dn: "uid=alice,dc=example,dc=com".to_string(),
            exists: true,
            attributes: attrs,
        };
        role.add_member(&alice).expect("add member");
        assert_eq!(role.members(), ["alice"]);

        // Identity without the source attribute is an error.
        let ghost = identity("uid=ghost,dc=example,dc=com");
        let err = role.add_member(&ghost).expect_err("must fail");
        assert!(matches!(err, DirectoryError::MissingAttribute { .. }));
    }

    #[tokio::test]
    async fn delete_targets_staged_rename_source() {
        let directory = Arc::new(MockDirectory::new().with_entry(
            "cn=editors,dc=example,dc=com",
            role_attrs("editors", &[]),
        ));
        let mut role = load(&directory, "editors").await;

        // Rename staged but never saved: the directory still holds the old DN.
        role.set_dn("cn=writers,dc=example,dc=com");
        role.delete().await.expect("delete");

        assert_eq!(
            directory.write_calls(),
            ["delete cn=editors,dc=example,dc=com"]
        );
        assert!(!role.exists());
        assert!(!role.is_dirty());
        assert!(role.pending_rename().is_none());
    }

    #[tokio::test]
    async fn delete_failure_propagates() {
        let directory = Arc::new(MockDirectory::new());
        let mut role = load(&directory, "editors").await;

        // Nothing to delete in the mock: NotFound propagates.
        let err = role.delete().await.expect_err("delete must fail");
        assert!(matches!(err, DirectoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn name_with_metacharacters_is_escaped_in_filter() {
        let directory = Arc::new(MockDirectory::new());
        let role = load(&directory, "ops (legacy)").await;

        let calls = directory.calls();
        assert!(calls[0].contains("(cn=ops \\28legacy\\29)"));
        // The synthesized DN escapes RFC 4514 specials, not filter ones.
        assert_eq!(role.dn(), "cn=ops (legacy),dc=example,dc=com");
    }
}
