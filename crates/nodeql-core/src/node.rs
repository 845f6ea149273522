//! # Node Proxy
//!
//! One generic runtime object per remote node: a shared schema, an immutable
//! data [`Snapshot`] swapped wholesale on refresh, and a set of pending local
//! changes.
//!
//! Relationship state is explicit: `Unloaded` until a query selects it,
//! `Loaded` / `PartiallyLoaded` / `FullyLoaded` afterwards. Loading more is
//! always an explicit client call.

use crate::error::{ClientError, ValidationError};
use crate::mutation::{MutationBuilder, NodeData, PeerInput, RelationshipInput, validate_attribute};
use crate::primitives::{META_FIELDS, PATH_SEPARATOR};
use crate::schema::{FieldRef, KindSchema, NodeSchema, RelationshipSchema, value_token};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

// =============================================================================
// FIELD VALUES
// =============================================================================

/// Attribute value plus its metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scalar {
    pub value: Value,
    pub is_default: bool,
    pub is_protected: bool,
    pub source: Option<String>,
    pub owner: Option<String>,
}

/// Lightweight reference to a related node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRef {
    pub id: String,
    pub kind: String,
    pub display_label: Option<String>,
    pub hfid: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RelatedOne {
    Unloaded,
    /// `None` when the server returned a null peer.
    Loaded(Option<PeerRef>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RelatedMany {
    Unloaded,
    /// First page only; `total` is the server-side count.
    PartiallyLoaded { peers: Vec<PeerRef>, total: usize },
    FullyLoaded(Vec<PeerRef>),
}

impl RelatedMany {
    fn from_page(peers: Vec<PeerRef>, total: usize) -> Self {
        if peers.len() >= total {
            Self::FullyLoaded(peers)
        } else {
            Self::PartiallyLoaded { peers, total }
        }
    }

    /// Peers known locally, whatever the state.
    pub fn peers(&self) -> &[PeerRef] {
        match self {
            Self::Unloaded => &[],
            Self::PartiallyLoaded { peers, .. } | Self::FullyLoaded(peers) => peers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FieldValue {
    Scalar(Scalar),
    One(RelatedOne),
    Many(RelatedMany),
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Immutable server state of one node at one store revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: Option<String>,
    pub kind: String,
    pub display_label: Option<String>,
    pub hfid: Option<Vec<String>>,
    pub fields: BTreeMap<String, FieldValue>,
    pub revision: u64,
}

impl Snapshot {
    /// Empty snapshot of a node that does not exist remotely yet.
    pub fn unsaved(kind: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            display_label: None,
            hfid: None,
            fields: BTreeMap::new(),
            revision: 0,
        }
    }

    /// Decode a `node { ... }` object returned by the server.
    ///
    /// Fields the schema does not know are skipped for forward
    /// compatibility.
    pub fn from_graphql(
        schema: &NodeSchema,
        node: &Value,
        revision: u64,
    ) -> Result<Self, ClientError> {
        let object = node
            .as_object()
            .ok_or_else(|| ClientError::invalid(format!("{} node is not an object", schema.kind)))?;
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::invalid(format!("{} node without id", schema.kind)))?;

        let mut fields = BTreeMap::new();
        for (key, raw) in object {
            if META_FIELDS.contains(&key.as_str()) {
                continue;
            }
            let value = match schema.field(key) {
                Some(FieldRef::Attribute(_)) => FieldValue::Scalar(parse_scalar(raw)),
                Some(FieldRef::Relationship(rel)) if rel.is_many() => {
                    FieldValue::Many(parse_many(raw, &rel.peer)?)
                }
                Some(FieldRef::Relationship(rel)) => {
                    FieldValue::One(RelatedOne::Loaded(parse_peer(raw.get("node"), &rel.peer)))
                }
                None => {
                    tracing::debug!(kind = %schema.kind, field = %key, "Skipping unknown response field");
                    continue;
                }
            };
            fields.insert(key.clone(), value);
        }

        Ok(Self {
            id: Some(id.to_string()),
            kind: object
                .get("__typename")
                .and_then(Value::as_str)
                .unwrap_or(&schema.kind)
                .to_string(),
            display_label: object
                .get("display_label")
                .and_then(Value::as_str)
                .map(str::to_string),
            hfid: parse_hfid(object.get("hfid")),
            fields,
            revision,
        })
    }

    pub fn scalar(&self, name: &str) -> Option<&Scalar> {
        match self.fields.get(name) {
            Some(FieldValue::Scalar(scalar)) => Some(scalar),
            _ => None,
        }
    }

    /// Attribute values as a flat `name -> value` object.
    pub fn attribute_values(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter_map(|(name, value)| match value {
                FieldValue::Scalar(scalar) => Some((name.clone(), scalar.value.clone())),
                _ => None,
            })
            .collect()
    }
}

fn nested_id(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(|v| v.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_scalar(raw: &Value) -> Scalar {
    Scalar {
        value: raw.get("value").cloned().unwrap_or(Value::Null),
        is_default: raw.get("is_default").and_then(Value::as_bool).unwrap_or(false),
        is_protected: raw.get("is_protected").and_then(Value::as_bool).unwrap_or(false),
        source: nested_id(raw, "source"),
        owner: nested_id(raw, "owner"),
    }
}

fn parse_hfid(raw: Option<&Value>) -> Option<Vec<String>> {
    let items = raw?.as_array()?;
    Some(items.iter().map(value_token).collect())
}

/// Peer reference from a `node` object; `None` for null or id-less peers.
pub(crate) fn parse_peer(raw: Option<&Value>, default_kind: &str) -> Option<PeerRef> {
    let object = raw?.as_object()?;
    let id = object.get("id")?.as_str()?;
    Some(PeerRef {
        id: id.to_string(),
        kind: object
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or(default_kind)
            .to_string(),
        display_label: object
            .get("display_label")
            .and_then(Value::as_str)
            .map(str::to_string),
        hfid: parse_hfid(object.get("hfid")),
    })
}

/// Peers of a `{ count, edges: [{ node }] }` connection, plus the count.
pub(crate) fn parse_connection(
    raw: &Value,
    default_kind: &str,
) -> Result<(Vec<PeerRef>, usize), ClientError> {
    let edges = raw
        .get("edges")
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::invalid("relationship without edges"))?;
    let peers: Vec<PeerRef> = edges
        .iter()
        .filter_map(|edge| parse_peer(edge.get("node"), default_kind))
        .collect();
    let total = raw
        .get("count")
        .and_then(Value::as_u64)
        .map_or(peers.len(), |c| c as usize);
    Ok((peers, total))
}

fn parse_many(raw: &Value, default_kind: &str) -> Result<RelatedMany, ClientError> {
    let (peers, total) = parse_connection(raw, default_kind)?;
    Ok(RelatedMany::from_page(peers, total))
}

// =============================================================================
// PENDING CHANGES
// =============================================================================

/// A local change not yet written to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingChange {
    Attribute(Value),
    Relationship(RelationshipInput),
}

// =============================================================================
// PEER RESOLUTION
// =============================================================================

/// Lookups behind relationship components of an HFID, e.g.
/// `site__name__value`.
pub trait PeerResolver {
    /// Cached node with this id on `branch`.
    fn node_by_id(&self, id: &str, branch: &str) -> Option<Arc<NodeProxy>>;

    /// HFID paths declared by `kind` on `branch`.
    fn hfid_paths(&self, kind: &str, branch: &str) -> Option<Vec<String>>;
}

struct NoPeers;

impl PeerResolver for NoPeers {
    fn node_by_id(&self, _id: &str, _branch: &str) -> Option<Arc<NodeProxy>> {
        None
    }

    fn hfid_paths(&self, _kind: &str, _branch: &str) -> Option<Vec<String>> {
        None
    }
}

/// Which values an HFID is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HfidSource {
    /// Pending changes over the snapshot.
    Local,
    /// The snapshot alone.
    Stored,
}

// =============================================================================
// NODE PROXY
// =============================================================================

/// Runtime node bound to a concrete schema and a branch.
#[derive(Debug)]
pub struct NodeProxy {
    schema: Arc<NodeSchema>,
    branch: String,
    snapshot: RwLock<Arc<Snapshot>>,
    pending: Mutex<BTreeMap<String, PendingChange>>,
}

impl NodeProxy {
    /// Proxy over server state.
    pub fn from_snapshot(schema: Arc<NodeSchema>, branch: impl Into<String>, snapshot: Snapshot) -> Self {
        Self {
            schema,
            branch: branch.into(),
            snapshot: RwLock::new(Arc::new(snapshot)),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Proxy for a node to be created. Every provided field becomes a
    /// pending change.
    pub fn new_pending(
        schema: Arc<NodeSchema>,
        branch: impl Into<String>,
        data: NodeData,
    ) -> Result<Self, ValidationError> {
        MutationBuilder::new(&schema).validate(&data)?;
        let mut pending = BTreeMap::new();
        for (name, value) in data.attributes {
            pending.insert(name, PendingChange::Attribute(value));
        }
        for (name, input) in data.relationships {
            pending.insert(name, PendingChange::Relationship(input));
        }
        let kind = schema.kind.clone();
        Ok(Self {
            schema,
            branch: branch.into(),
            snapshot: RwLock::new(Arc::new(Snapshot::unsaved(kind))),
            pending: Mutex::new(pending),
        })
    }

    pub fn schema(&self) -> &Arc<NodeSchema> {
        &self.schema
    }

    pub fn kind(&self) -> &str {
        &self.schema.kind
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn id(&self) -> Option<String> {
        self.snapshot().id.clone()
    }

    pub fn display_label(&self) -> Option<String> {
        self.snapshot().display_label.clone()
    }

    pub fn revision(&self) -> u64 {
        self.snapshot().revision
    }

    /// This node as a relationship peer. `None` until it has an id.
    pub fn peer_ref(&self) -> Option<PeerRef> {
        let snapshot = self.snapshot();
        Some(PeerRef {
            id: snapshot.id.clone()?,
            kind: snapshot.kind.clone(),
            display_label: snapshot.display_label.clone(),
            hfid: snapshot.hfid.clone(),
        })
    }

    // =========================================================================
    // ATTRIBUTES
    // =========================================================================

    /// Attribute value, pending change first. `None` when not loaded.
    pub fn attribute(&self, name: &str) -> Result<Option<Scalar>, ValidationError> {
        if self.schema.attribute(name).is_none() {
            return Err(self.unknown(name));
        }
        if let Some(PendingChange::Attribute(value)) = self.lock_pending().get(name) {
            return Ok(Some(Scalar {
                value: value.clone(),
                ..Scalar::default()
            }));
        }
        Ok(self.snapshot().scalar(name).cloned())
    }

    pub fn set_attribute(&self, name: &str, value: impl Into<Value>) -> Result<(), ValidationError> {
        let attr = self.schema.attribute(name).ok_or_else(|| self.unknown(name))?;
        if attr.read_only {
            return Err(ValidationError::ReadOnly {
                kind: self.schema.kind.clone(),
                field: name.to_string(),
            });
        }
        let value = value.into();
        validate_attribute(&self.schema.kind, attr, &value)?;
        self.lock_pending()
            .insert(name.to_string(), PendingChange::Attribute(value));
        Ok(())
    }

    // =========================================================================
    // RELATIONSHIPS
    // =========================================================================

    /// Server-side state of a cardinality-one relationship. Pending changes
    /// are reported by [`pending_changes`](Self::pending_changes).
    pub fn relationship_one(&self, name: &str) -> Result<RelatedOne, ValidationError> {
        match self.schema.relationship(name) {
            Some(rel) if !rel.is_many() => {}
            Some(_) => return Err(self.cardinality(name, "many")),
            None => return Err(self.unknown(name)),
        }
        Ok(match self.snapshot().fields.get(name) {
            Some(FieldValue::One(state)) => state.clone(),
            _ => RelatedOne::Unloaded,
        })
    }

    /// Server-side state of a cardinality-many relationship.
    pub fn relationship_many(&self, name: &str) -> Result<RelatedMany, ValidationError> {
        match self.schema.relationship(name) {
            Some(rel) if rel.is_many() => {}
            Some(_) => return Err(self.cardinality(name, "one")),
            None => return Err(self.unknown(name)),
        }
        Ok(match self.snapshot().fields.get(name) {
            Some(FieldValue::Many(state)) => state.clone(),
            _ => RelatedMany::Unloaded,
        })
    }

    pub fn set_relationship_one(
        &self,
        name: &str,
        peer: Option<PeerInput>,
    ) -> Result<(), ValidationError> {
        self.set_relationship(name, RelationshipInput::One(peer))
    }

    pub fn set_relationship_many(
        &self,
        name: &str,
        peers: Vec<PeerInput>,
    ) -> Result<(), ValidationError> {
        self.set_relationship(name, RelationshipInput::Many(peers))
    }

    fn set_relationship(&self, name: &str, input: RelationshipInput) -> Result<(), ValidationError> {
        let data = NodeData {
            relationships: BTreeMap::from([(name.to_string(), input.clone())]),
            ..NodeData::default()
        };
        MutationBuilder::new(&self.schema).validate(&data)?;
        self.lock_pending()
            .insert(name.to_string(), PendingChange::Relationship(input));
        Ok(())
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    /// Server-provided HFID, else the one computed from local attributes.
    pub fn hfid(&self) -> Option<Vec<String>> {
        self.snapshot()
            .hfid
            .clone()
            .or_else(|| self.compute_hfid().ok())
    }

    /// HFID from local values, pending changes included, without peer
    /// lookups: relationship components fail unless `compute_hfid_with`
    /// is given a resolver.
    pub fn compute_hfid(&self) -> Result<Vec<String>, ValidationError> {
        self.compute_hfid_with(&NoPeers)
    }

    /// HFID from local values, pending changes included. A component such
    /// as `site__name__value` is read from the peer the relationship points
    /// at, located through `peers`.
    pub fn compute_hfid_with(&self, peers: &dyn PeerResolver) -> Result<Vec<String>, ValidationError> {
        self.hfid_from(HfidSource::Local, peers)
    }

    /// HFID as the server knows the node: the one it returned, else the one
    /// computed from the snapshot. Pending changes never count.
    pub fn stored_hfid(&self, peers: &dyn PeerResolver) -> Option<Vec<String>> {
        if let Some(hfid) = &self.snapshot().hfid {
            return Some(hfid.clone());
        }
        self.hfid_from(HfidSource::Stored, peers).ok()
    }

    fn hfid_from(
        &self,
        source: HfidSource,
        peers: &dyn PeerResolver,
    ) -> Result<Vec<String>, ValidationError> {
        let hfid_error = |reason: String| ValidationError::Hfid {
            kind: self.schema.kind.clone(),
            reason,
        };
        if self.schema.human_friendly_id.is_empty() {
            return Err(hfid_error("kind defines no human friendly id".into()));
        }
        self.schema
            .human_friendly_id
            .iter()
            .map(|path| self.path_token(path, source, peers).map_err(hfid_error))
            .collect()
    }

    /// Token of one HFID path: `attribute__value`, or a cardinality-one
    /// relationship followed by a path on its peer.
    fn path_token(
        &self,
        path: &str,
        source: HfidSource,
        peers: &dyn PeerResolver,
    ) -> Result<String, String> {
        let (head, rest) = path
            .split_once(PATH_SEPARATOR)
            .ok_or_else(|| format!("{path} is not a field path"))?;
        match self.schema.field(head) {
            Some(FieldRef::Attribute(_)) if rest == "value" => {
                let value = match source {
                    HfidSource::Local => self
                        .attribute(head)
                        .map_err(|e| e.to_string())?
                        .map(|scalar| scalar.value),
                    HfidSource::Stored => self.snapshot().scalar(head).map(|s| s.value.clone()),
                };
                value
                    .filter(|value| !value.is_null())
                    .map(|value| value_token(&value))
                    .ok_or_else(|| format!("{head} has no value"))
            }
            Some(FieldRef::Relationship(rel)) if !rel.is_many() => {
                self.peer_token(rel, rest, source, peers)
            }
            _ => Err(format!(
                "{path} is neither an attribute value nor a cardinality-one relationship path"
            )),
        }
    }

    /// Value of `rest` on the peer of `rel`. A cached peer is read directly;
    /// otherwise the token is taken from the peer's own HFID.
    fn peer_token(
        &self,
        rel: &RelationshipSchema,
        rest: &str,
        source: HfidSource,
        peers: &dyn PeerResolver,
    ) -> Result<String, String> {
        let pending = match source {
            HfidSource::Local => match self.lock_pending().get(&rel.name) {
                Some(PendingChange::Relationship(RelationshipInput::One(peer))) => Some(peer.clone()),
                _ => None,
            },
            HfidSource::Stored => None,
        };
        let (id, kind, hfid) = match pending {
            Some(Some(PeerInput::Id(id))) => (Some(id), rel.peer.clone(), None),
            Some(Some(PeerInput::Hfid { kind, hfid })) => (None, kind, Some(hfid)),
            Some(None) => return Err(format!("{} has no peer", rel.name)),
            None => match self.snapshot().fields.get(&rel.name) {
                Some(FieldValue::One(RelatedOne::Loaded(Some(peer)))) => {
                    (Some(peer.id.clone()), peer.kind.clone(), peer.hfid.clone())
                }
                Some(FieldValue::One(RelatedOne::Loaded(None))) => {
                    return Err(format!("{} has no peer", rel.name));
                }
                _ => return Err(format!("{} is not loaded", rel.name)),
            },
        };

        if let Some(peer) = id.as_deref().and_then(|id| peers.node_by_id(id, &self.branch)) {
            return peer.path_token(rest, HfidSource::Stored, peers);
        }
        let from_hfid = hfid.zip(peers.hfid_paths(&kind, &self.branch)).and_then(|(hfid, paths)| {
            let position = paths.iter().position(|path| path == rest)?;
            hfid.get(position).cloned()
        });
        from_hfid.ok_or_else(|| format!("peer of {} is not known locally", rel.name))
    }

    // =========================================================================
    // DIRTY TRACKING
    // =========================================================================

    pub fn is_dirty(&self) -> bool {
        !self.lock_pending().is_empty()
    }

    pub fn pending_changes(&self) -> BTreeMap<String, PendingChange> {
        self.lock_pending().clone()
    }

    pub fn discard_changes(&self) {
        self.lock_pending().clear();
    }

    /// Pending changes as mutation input.
    pub fn pending_data(&self) -> NodeData {
        to_node_data(&self.lock_pending())
    }

    /// Drop the pending entries that are unchanged since `sent` was taken.
    /// Entries modified in between stay dirty.
    pub fn clear_sent(&self, sent: &BTreeMap<String, PendingChange>) {
        let mut pending = self.lock_pending();
        for (name, change) in sent {
            if pending.get(name) == Some(change) {
                pending.remove(name);
            }
        }
    }

    // =========================================================================
    // SNAPSHOT REPLACEMENT
    // =========================================================================

    /// Swap in `incoming` when it is newer. Fields the newer query did not
    /// select are carried over from the current snapshot.
    pub fn apply_snapshot(&self, incoming: Snapshot) -> bool {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if incoming.revision <= guard.revision {
            return false;
        }
        let mut merged = incoming;
        for (name, value) in &guard.fields {
            merged
                .fields
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        *guard = Arc::new(merged);
        true
    }

    /// Replace one field at a new revision, keeping everything else.
    pub fn replace_field(&self, name: &str, value: FieldValue, revision: u64) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Snapshot::clone(&guard);
        next.fields.insert(name.to_string(), value);
        next.revision = revision.max(guard.revision);
        *guard = Arc::new(next);
    }

    fn lock_pending(&self) -> MutexGuard<'_, BTreeMap<String, PendingChange>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unknown(&self, field: &str) -> ValidationError {
        ValidationError::UnknownField {
            kind: self.schema.kind.clone(),
            field: field.to_string(),
        }
    }

    fn cardinality(&self, field: &str, expected: &str) -> ValidationError {
        ValidationError::Cardinality {
            field: field.to_string(),
            expected: expected.to_string(),
        }
    }
}

pub(crate) fn to_node_data(changes: &BTreeMap<String, PendingChange>) -> NodeData {
    let mut data = NodeData::default();
    for (name, change) in changes {
        match change {
            PendingChange::Attribute(value) => {
                data.attributes.insert(name.clone(), value.clone());
            }
            PendingChange::Relationship(input) => {
                data.relationships.insert(name.clone(), input.clone());
            }
        }
    }
    data
}
