//! Shared contribution namespaces.
//!
//! Units fan data into a namespace with [`ContributionTable::add`]; a single
//! consumer unit merges everything with [`ContributionTable::resolve`] and
//! persists the result with [`ContributionTable::write`].  Each namespace is
//! a strongly-typed table over a [`Namespace`] marker type that fixes its
//! item type, identity key, merge policy, and store keys.
//!
//! # Store layout
//!
//! | Namespace | Raw list | Resolved |
//! |---|---|---|
//! | paths | `contrib.paths` | `resolved.paths` |
//! | aliases | `contrib.aliases` | `resolved.aliases` |
//! | packages | `contrib.packages` | `resolved.packages` |
//! | shell-init | `contrib.shell.init` | `resolved.shell.init` |

mod namespaces;

pub use namespaces::{
    AliasEntry, Aliases, PackageEntry, PackageManager, Packages, PathEntry, Paths, ShellInit,
    ShellInitSnippet,
};

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ContributionError;
use crate::platform::Platform;
use crate::state::{StateStore, StateStoreExt};

/// A producer-registered fragment in a namespace list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution<T> {
    /// Identity key; unique within the namespace.
    pub id: String,
    /// The contributed item.
    pub data: T,
    /// Platforms the fragment applies to; `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<Platform>>,
}

impl<T> Contribution<T> {
    /// Whether the fragment applies on `platform`.
    #[must_use]
    pub fn applies_to(&self, platform: Platform) -> bool {
        self.platforms
            .as_ref()
            .is_none_or(|platforms| platforms.contains(&platform))
    }
}

/// Item type, identity, merge policy, and store keys of one namespace.
pub trait Namespace: Send + Sync + 'static {
    /// Item contributed by producers.
    type Item: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync;
    /// Merged, consumer-visible collection.
    type Resolved: Serialize + DeserializeOwned + fmt::Debug + PartialEq;

    /// Human-readable namespace name.
    const NAME: &'static str;
    /// Store key of the raw contribution list.
    const CONTRIB_KEY: &'static str;
    /// Store key of the resolved collection.
    const RESOLVED_KEY: &'static str;

    /// Identity key used to reject duplicate contributions.
    fn identity(item: &Self::Item) -> String;

    /// Deterministically merge `contributions`, given in registration order.
    fn resolve(contributions: &[Contribution<Self::Item>]) -> Self::Resolved;
}

/// Contribution list for one namespace, persisted in a [`StateStore`].
///
/// Lists written by older releases stored bare items without the
/// [`Contribution`] wrapper.  The first read in a process upgrades such a
/// list in place; later reads use the current shape directly.
pub struct ContributionTable<N: Namespace> {
    store: Arc<dyn StateStore>,
    platform: Platform,
    migrated: AtomicBool,
    namespace: PhantomData<N>,
}

impl<N: Namespace> fmt::Debug for ContributionTable<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContributionTable")
            .field("namespace", &N::NAME)
            .field("store", &"<dyn StateStore>")
            .field("platform", &self.platform)
            .field("migrated", &self.migrated)
            .finish()
    }
}

impl<N: Namespace> ContributionTable<N> {
    /// Create a table over `store` filtering by `platform`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, platform: Platform) -> Self {
        Self {
            store,
            platform,
            migrated: AtomicBool::new(false),
            namespace: PhantomData,
        }
    }

    /// Register `item`.
    ///
    /// Returns `false` without touching the store when `platforms` excludes
    /// the current platform or an item with the same identity is already
    /// present, so repeated registration is idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored list is malformed or cannot be written.
    pub fn add(
        &self,
        item: N::Item,
        platforms: Option<Vec<Platform>>,
    ) -> Result<bool, ContributionError> {
        if let Some(ref allowed) = platforms
            && !allowed.contains(&self.platform)
        {
            return Ok(false);
        }

        let id = N::identity(&item);
        let mut list = self.load()?;
        if list.iter().any(|c| c.id == id) {
            return Ok(false);
        }
        list.push(Contribution {
            id,
            data: item,
            platforms,
        });
        self.store.set(N::CONTRIB_KEY, &list)?;
        Ok(true)
    }

    /// Whether an item with the same identity as `item` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored list is malformed.
    pub fn contains(&self, item: &N::Item) -> Result<bool, ContributionError> {
        let id = N::identity(item);
        Ok(self.load()?.iter().any(|c| c.id == id))
    }

    /// All contributions in registration order, unfiltered.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored list is malformed.
    pub fn list(&self) -> Result<Vec<Contribution<N::Item>>, ContributionError> {
        self.load()
    }

    /// Merge the contributions that apply to the current platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored list is malformed.
    pub fn resolve(&self) -> Result<N::Resolved, ContributionError> {
        let applicable: Vec<_> = self
            .load()?
            .into_iter()
            .filter(|c| c.applies_to(self.platform))
            .collect();
        Ok(N::resolve(&applicable))
    }

    /// Persist a resolved collection, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn write(&self, resolved: &N::Resolved) -> Result<(), ContributionError> {
        self.store.set(N::RESOLVED_KEY, resolved)?;
        Ok(())
    }

    /// Read the last written resolved collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not match the resolved type.
    pub fn read(&self) -> Result<Option<N::Resolved>, ContributionError> {
        Ok(self.store.get(N::RESOLVED_KEY)?)
    }

    fn load(&self) -> Result<Vec<Contribution<N::Item>>, ContributionError> {
        let Some(raw) = self.store.get_value(N::CONTRIB_KEY) else {
            return Ok(Vec::new());
        };

        if self.migrated.load(Ordering::Acquire) {
            return serde_json::from_value(raw).map_err(|e| malformed::<N>(&e.to_string()));
        }

        let (list, upgraded) = upgrade::<N>(raw)?;
        if upgraded {
            self.store.set(N::CONTRIB_KEY, &list)?;
        }
        self.migrated.store(true, Ordering::Release);
        Ok(list)
    }
}

/// Convert a stored list to the wrapped shape, reporting whether any entry
/// had to be upgraded.
fn upgrade<N: Namespace>(
    raw: Value,
) -> Result<(Vec<Contribution<N::Item>>, bool), ContributionError> {
    let Value::Array(entries) = raw else {
        return Err(malformed::<N>("expected an array"));
    };

    let mut upgraded = false;
    let mut list = Vec::with_capacity(entries.len());
    for entry in entries {
        let wrapped = entry
            .as_object()
            .is_some_and(|o| o.contains_key("id") && o.contains_key("data"));
        if wrapped {
            let contribution: Contribution<N::Item> =
                serde_json::from_value(entry).map_err(|e| malformed::<N>(&e.to_string()))?;
            list.push(contribution);
        } else {
            let item: N::Item =
                serde_json::from_value(entry).map_err(|e| malformed::<N>(&e.to_string()))?;
            list.push(Contribution {
                id: N::identity(&item),
                data: item,
                platforms: None,
            });
            upgraded = true;
        }
    }
    Ok((list, upgraded))
}

fn malformed<N: Namespace>(reason: &str) -> ContributionError {
    ContributionError::Malformed {
        key: N::CONTRIB_KEY.to_string(),
        reason: reason.to_string(),
    }
}

/// The four contribution tables, shared by every context in a process.
#[derive(Debug)]
pub struct Contributions {
    paths: ContributionTable<Paths>,
    aliases: ContributionTable<Aliases>,
    packages: ContributionTable<Packages>,
    shell_init: ContributionTable<ShellInit>,
}

impl Contributions {
    /// Create tables over `store` filtering by `platform`.
    #[must_use]
    pub fn new(store: &Arc<dyn StateStore>, platform: Platform) -> Self {
        Self {
            paths: ContributionTable::new(Arc::clone(store), platform),
            aliases: ContributionTable::new(Arc::clone(store), platform),
            packages: ContributionTable::new(Arc::clone(store), platform),
            shell_init: ContributionTable::new(Arc::clone(store), platform),
        }
    }

    /// PATH entries.
    #[must_use]
    pub const fn paths(&self) -> &ContributionTable<Paths> {
        &self.paths
    }

    /// Shell aliases.
    #[must_use]
    pub const fn aliases(&self) -> &ContributionTable<Aliases> {
        &self.aliases
    }

    /// Package requests grouped by manager.
    #[must_use]
    pub const fn packages(&self) -> &ContributionTable<Packages> {
        &self.packages
    }

    /// Shell-init snippets.
    #[must_use]
    pub const fn shell_init(&self) -> &ContributionTable<ShellInit> {
        &self.shell_init
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;
    use std::collections::BTreeMap;

    fn store() -> Arc<dyn StateStore> {
        Arc::new(MemoryStore::new())
    }

    fn path(p: &str, prepend: bool) -> PathEntry {
        PathEntry {
            path: p.to_string(),
            prepend,
        }
    }

    fn alias(name: &str, command: &str) -> AliasEntry {
        AliasEntry {
            name: name.to_string(),
            command: command.to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Resolution policies
    // -----------------------------------------------------------------------

    #[test]
    fn paths_resolve_prepend_then_append() {
        let table = ContributionTable::<Paths>::new(store(), Platform::Ubuntu);
        table.add(path("/usr/local/bin", false), None).unwrap();
        table.add(path("/usr/bin", true), None).unwrap();
        table.add(path("/bin", false), None).unwrap();
        table.add(path("/opt/bin", true), None).unwrap();

        assert_eq!(
            table.resolve().unwrap(),
            vec!["/usr/bin", "/opt/bin", "/usr/local/bin", "/bin"]
        );
    }

    #[test]
    fn aliases_resolve_last_write_wins() {
        let table = ContributionTable::<Aliases>::new(store(), Platform::Macos);
        assert!(table.add(alias("ls", "ls --color"), None).unwrap());
        assert!(table.add(alias("grep", "grep --color"), None).unwrap());
        assert!(table.add(alias("ls", "eza"), None).unwrap());

        let expected: BTreeMap<String, String> = [
            ("grep".to_string(), "grep --color".to_string()),
            ("ls".to_string(), "eza".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(table.resolve().unwrap(), expected);
    }

    #[test]
    fn packages_reject_duplicate_identity() {
        let table = ContributionTable::<Packages>::new(store(), Platform::Macos);
        let eza = PackageEntry {
            name: "eza".to_string(),
            manager: PackageManager::Homebrew,
        };
        assert!(table.add(eza.clone(), None).unwrap());
        assert!(!table.add(eza, None).unwrap());
        assert_eq!(table.list().unwrap().len(), 1);
    }

    #[test]
    fn packages_resolve_grouped_by_manager() {
        let table = ContributionTable::<Packages>::new(store(), Platform::Ubuntu);
        for (name, manager) in [
            ("ripgrep", PackageManager::Apt),
            ("eza", PackageManager::Cargo),
            ("fd-find", PackageManager::Apt),
        ] {
            table
                .add(
                    PackageEntry {
                        name: name.to_string(),
                        manager,
                    },
                    None,
                )
                .unwrap();
        }
        let resolved = table.resolve().unwrap();
        assert_eq!(resolved[&PackageManager::Apt], vec!["ripgrep", "fd-find"]);
        assert_eq!(resolved[&PackageManager::Cargo], vec!["eza"]);
    }

    #[test]
    fn shell_init_resolves_in_registration_order() {
        let table = ContributionTable::<ShellInit>::new(store(), Platform::Ubuntu);
        for name in ["brew", "asdf", "starship"] {
            table
                .add(
                    ShellInitSnippet {
                        name: name.to_string(),
                        content: format!("init {name}"),
                    },
                    None,
                )
                .unwrap();
        }
        let names: Vec<String> = table
            .resolve()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["brew", "asdf", "starship"]);
    }

    // -----------------------------------------------------------------------
    // add / list
    // -----------------------------------------------------------------------

    #[test]
    fn add_skips_other_platforms() {
        let table = ContributionTable::<Paths>::new(store(), Platform::Ubuntu);
        let added = table
            .add(path("/opt/homebrew/bin", true), Some(vec![Platform::Macos]))
            .unwrap();
        assert!(!added);
        assert!(table.list().unwrap().is_empty());
    }

    #[test]
    fn add_keeps_platform_list_for_matching_platform() {
        let table = ContributionTable::<Paths>::new(store(), Platform::Macos);
        table
            .add(path("/opt/homebrew/bin", true), Some(vec![Platform::Macos]))
            .unwrap();
        let list = table.list().unwrap();
        assert_eq!(list[0].platforms, Some(vec![Platform::Macos]));
        assert_eq!(list[0].id, "/opt/homebrew/bin");
    }

    #[test]
    fn resolve_ignores_entries_for_other_platforms() {
        let shared = store();
        let mac = ContributionTable::<Paths>::new(Arc::clone(&shared), Platform::Macos);
        mac.add(path("/opt/homebrew/bin", true), Some(vec![Platform::Macos]))
            .unwrap();
        mac.add(path("/usr/bin", false), None).unwrap();

        let linux = ContributionTable::<Paths>::new(shared, Platform::Ubuntu);
        assert_eq!(linux.list().unwrap().len(), 2);
        assert_eq!(linux.resolve().unwrap(), vec!["/usr/bin"]);
    }

    #[test]
    fn contains_uses_identity() {
        let table = ContributionTable::<Aliases>::new(store(), Platform::Ubuntu);
        table.add(alias("ll", "ls -la"), None).unwrap();
        assert!(table.contains(&alias("ll", "ls -la")).unwrap());
        assert!(!table.contains(&alias("ll", "eza -la")).unwrap());
    }

    // -----------------------------------------------------------------------
    // write / read
    // -----------------------------------------------------------------------

    #[test]
    fn write_then_read_uses_resolved_key() {
        let shared = store();
        let table = ContributionTable::<Paths>::new(Arc::clone(&shared), Platform::Ubuntu);
        table.add(path("/bin", false), None).unwrap();
        let resolved = table.resolve().unwrap();
        table.write(&resolved).unwrap();

        assert!(shared.has("resolved.paths"));
        assert!(shared.has("contrib.paths"));
        assert_eq!(table.read().unwrap(), Some(vec!["/bin".to_string()]));
    }

    #[test]
    fn read_before_write_is_none() {
        let table = ContributionTable::<Aliases>::new(store(), Platform::Ubuntu);
        assert!(table.read().unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Legacy upgrade
    // -----------------------------------------------------------------------

    #[test]
    fn legacy_list_is_upgraded_in_place() {
        let shared = store();
        shared.set_value(
            "contrib.paths",
            serde_json::json!([
                { "path": "/usr/local/bin" },
                { "path": "/usr/bin", "prepend": true }
            ]),
        );

        let table = ContributionTable::<Paths>::new(Arc::clone(&shared), Platform::Ubuntu);
        assert_eq!(table.resolve().unwrap(), vec!["/usr/bin", "/usr/local/bin"]);

        let stored = shared.get_value("contrib.paths").unwrap();
        assert_eq!(stored[0]["id"], "/usr/local/bin");
        assert_eq!(stored[1]["data"]["prepend"], true);
    }

    #[test]
    fn mixed_legacy_and_wrapped_entries_upgrade() {
        let shared = store();
        shared.set_value(
            "contrib.aliases",
            serde_json::json!([
                { "id": "ll=ls -la", "data": { "name": "ll", "command": "ls -la" } },
                { "name": "g", "command": "git" }
            ]),
        );
        let table = ContributionTable::<Aliases>::new(shared, Platform::Ubuntu);
        let list = table.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].id, "g=git");
    }

    #[test]
    fn unrecognised_entries_are_malformed() {
        let shared = store();
        shared.set_value("contrib.paths", serde_json::json!([42]));
        let table = ContributionTable::<Paths>::new(shared, Platform::Ubuntu);
        let err = table.list().unwrap_err();
        assert!(
            matches!(err, ContributionError::Malformed { ref key, .. } if key == "contrib.paths"),
            "got {err:?}"
        );
    }

    #[test]
    fn non_array_list_is_malformed() {
        let shared = store();
        shared.set_value("contrib.paths", serde_json::json!({ "path": "/bin" }));
        let table = ContributionTable::<Paths>::new(shared, Platform::Ubuntu);
        assert!(table.resolve().is_err());
    }

    #[test]
    fn upgrade_runs_once_per_table() {
        let shared = store();
        shared.set_value("contrib.paths", serde_json::json!([{ "path": "/bin" }]));
        let table = ContributionTable::<Paths>::new(Arc::clone(&shared), Platform::Ubuntu);
        table.list().unwrap();

        // Legacy data appearing after the first read is no longer upgraded.
        shared.set_value("contrib.paths", serde_json::json!([{ "path": "/sbin" }]));
        assert!(table.list().is_err());
    }

    #[test]
    fn contributions_share_one_store() {
        let shared = store();
        let contributions = Contributions::new(&shared, Platform::Ubuntu);
        contributions.paths().add(path("/bin", false), None).unwrap();
        contributions
            .aliases()
            .add(alias("ll", "ls -la"), None)
            .unwrap();
        assert!(shared.has("contrib.paths"));
        assert!(shared.has("contrib.aliases"));
        assert!(!shared.has("contrib.packages"));
    }
}
