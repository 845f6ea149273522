//! # Identity Store
//!
//! One canonical [`NodeProxy`] per `(kind, id, branch)`.
//!
//! The store is the only shared mutable structure of a client. Entries are
//! `Arc`s: refetching a node swaps the proxy's snapshot in place, so every
//! holder of the `Arc` observes the newer data. Revisions come from a single
//! monotonic counter, so a later response always wins over an earlier one.

use crate::node::{NodeProxy, PeerResolver, Snapshot};
use crate::schema::NodeSchema;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Store key. Ordered by branch first so branch-wide operations are ranges.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey {
    pub branch: String,
    pub kind: String,
    pub id: String,
}

impl StoreKey {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            kind: kind.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Store {
    entries: RwLock<BTreeMap<StoreKey, Arc<NodeProxy>>>,
    revision: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next snapshot revision. Strictly increasing, starts at 1.
    pub fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Canonical proxy for the snapshot's key.
    ///
    /// An existing entry keeps its identity and takes the snapshot if it is
    /// newer; otherwise a new proxy is inserted. Snapshots without an id are
    /// never cached and get a fresh, unshared proxy.
    pub fn get_or_create(
        &self,
        schema: &Arc<NodeSchema>,
        branch: &str,
        snapshot: Snapshot,
    ) -> Arc<NodeProxy> {
        let Some(id) = snapshot.id.clone() else {
            return Arc::new(NodeProxy::from_snapshot(Arc::clone(schema), branch, snapshot));
        };
        let key = StoreKey::new(&schema.kind, id, branch);

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&key) {
            existing.apply_snapshot(snapshot);
            return Arc::clone(existing);
        }
        let proxy = Arc::new(NodeProxy::from_snapshot(Arc::clone(schema), branch, snapshot));
        entries.insert(key, Arc::clone(&proxy));
        proxy
    }

    /// Register a proxy that just received its id (e.g. after a create).
    /// An entry already present under the key wins.
    pub fn insert(&self, proxy: Arc<NodeProxy>) -> Arc<NodeProxy> {
        let Some(id) = proxy.id() else {
            return proxy;
        };
        let key = StoreKey::new(proxy.kind(), id, proxy.branch());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key).or_insert(proxy))
    }

    pub fn get(&self, kind: &str, id: &str, branch: &str) -> Option<Arc<NodeProxy>> {
        self.read().get(&StoreKey::new(kind, id, branch)).cloned()
    }

    /// Lookup by id alone, whatever the kind.
    pub fn get_by_id(&self, id: &str, branch: &str) -> Option<Arc<NodeProxy>> {
        self.read()
            .iter()
            .find(|(key, _)| key.branch == branch && key.id == id)
            .map(|(_, proxy)| Arc::clone(proxy))
    }

    /// Cached nodes of `kind` whose stored HFID equals `hfid`. Unsaved
    /// local edits never make a node match.
    pub fn find_by_hfid(&self, kind: &str, branch: &str, hfid: &[String]) -> Vec<Arc<NodeProxy>> {
        self.nodes_of_kind(kind, branch)
            .into_iter()
            .filter(|proxy| proxy.stored_hfid(self).is_some_and(|candidate| candidate == hfid))
            .collect()
    }

    pub fn nodes_of_kind(&self, kind: &str, branch: &str) -> Vec<Arc<NodeProxy>> {
        self.read()
            .iter()
            .filter(|(key, _)| key.branch == branch && key.kind == kind)
            .map(|(_, proxy)| Arc::clone(proxy))
            .collect()
    }

    pub fn invalidate(&self, kind: &str, id: &str, branch: &str) -> Option<Arc<NodeProxy>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&StoreKey::new(kind, id, branch))
    }

    /// Drop every entry of `branch`, e.g. after it was deleted or rebased.
    pub fn clear(&self, branch: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| key.branch != branch);
        let removed = before - entries.len();
        tracing::debug!(branch = %branch, removed, "Store branch cleared");
        removed
    }

    pub fn clear_all(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<StoreKey, Arc<NodeProxy>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Peers come from the cache; HFID paths from any cached node of the kind.
impl PeerResolver for Store {
    fn node_by_id(&self, id: &str, branch: &str) -> Option<Arc<NodeProxy>> {
        self.get_by_id(id, branch)
    }

    fn hfid_paths(&self, kind: &str, branch: &str) -> Option<Vec<String>> {
        self.nodes_of_kind(kind, branch)
            .first()
            .map(|node| node.schema().human_friendly_id.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;
    use serde_json::json;

    fn tag_schema() -> Arc<NodeSchema> {
        SchemaRegistry::from_json(
            &json!({"nodes": [{
                "kind": "BuiltinTag",
                "human_friendly_id": ["name__value"],
                "attributes": [{"name": "name"}]
            }]})
            .to_string(),
        )
        .unwrap()
        .get("BuiltinTag")
        .unwrap()
    }

    fn snapshot(store: &Store, schema: &NodeSchema, id: &str, name: &str) -> Snapshot {
        Snapshot::from_graphql(
            schema,
            &json!({"id": id, "name": {"value": name}}),
            store.next_revision(),
        )
        .unwrap()
    }

    #[test]
    fn same_key_returns_same_arc() {
        let store = Store::new();
        let schema = tag_schema();
        let first = store.get_or_create(&schema, "main", snapshot(&store, &schema, "t1", "red"));
        let second = store.get_or_create(&schema, "main", snapshot(&store, &schema, "t1", "blue"));
        assert!(Arc::ptr_eq(&first, &second));
        // The later snapshot is visible through the first handle
        assert_eq!(first.attribute("name").unwrap().unwrap().value, json!("blue"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn branches_are_isolated() {
        let store = Store::new();
        let schema = tag_schema();
        let main = store.get_or_create(&schema, "main", snapshot(&store, &schema, "t1", "red"));
        let feature =
            store.get_or_create(&schema, "feature", snapshot(&store, &schema, "t1", "red"));
        assert!(!Arc::ptr_eq(&main, &feature));

        assert_eq!(store.clear("feature"), 1);
        assert!(store.get("BuiltinTag", "t1", "feature").is_none());
        assert!(store.get("BuiltinTag", "t1", "main").is_some());
    }

    #[test]
    fn lookups() {
        let store = Store::new();
        let schema = tag_schema();
        store.get_or_create(&schema, "main", snapshot(&store, &schema, "t1", "red"));
        store.get_or_create(&schema, "main", snapshot(&store, &schema, "t2", "blue"));

        assert!(store.get_by_id("t2", "main").is_some());
        assert_eq!(store.nodes_of_kind("BuiltinTag", "main").len(), 2);
        let found = store.find_by_hfid("BuiltinTag", "main", &["blue".to_string()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id().as_deref(), Some("t2"));

        assert!(store.invalidate("BuiltinTag", "t1", "main").is_some());
        assert_eq!(store.len(), 1);
        store.clear_all();
        assert!(store.is_empty());
    }

    #[test]
    fn unsaved_edits_do_not_match_hfid() {
        let store = Store::new();
        let schema = tag_schema();
        let tag = store.get_or_create(&schema, "main", snapshot(&store, &schema, "t1", "red"));
        tag.set_attribute("name", "green").unwrap();

        assert!(store.find_by_hfid("BuiltinTag", "main", &["green".to_string()]).is_empty());
        assert_eq!(store.find_by_hfid("BuiltinTag", "main", &["red".to_string()]).len(), 1);
    }

    #[test]
    fn hfid_through_cached_peer() {
        let registry = SchemaRegistry::from_json(
            &json!({"nodes": [
                {"kind": "InfraSite", "human_friendly_id": ["name__value"],
                 "attributes": [{"name": "name"}]},
                {"kind": "InfraDevice", "human_friendly_id": ["site__name__value", "name__value"],
                 "attributes": [{"name": "name"}],
                 "relationships": [{"name": "site", "peer": "InfraSite", "cardinality": "one"}]}
            ]})
            .to_string(),
        )
        .unwrap();
        let site = registry.get("InfraSite").unwrap();
        let device = registry.get("InfraDevice").unwrap();
        let store = Store::new();
        store.get_or_create(&site, "main", snapshot(&store, &site, "s1", "paris"));
        let raw = json!({
            "id": "d1",
            "name": {"value": "edge01"},
            "site": {"node": {"id": "s1", "__typename": "InfraSite"}}
        });
        let revision = store.next_revision();
        store.get_or_create(
            &device,
            "main",
            Snapshot::from_graphql(&device, &raw, revision).unwrap(),
        );

        let hfid = vec!["paris".to_string(), "edge01".to_string()];
        let found = store.find_by_hfid("InfraDevice", "main", &hfid);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id().as_deref(), Some("d1"));
    }

    #[test]
    fn revisions_increase() {
        let store = Store::new();
        let a = store.next_revision();
        let b = store.next_revision();
        assert!(b > a);
        assert_eq!(a, 1);
    }
}
