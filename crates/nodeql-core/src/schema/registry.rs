//! # Schema Registry
//!
//! Builds the immutable kind table from a [`SchemaDocument`].
//!
//! Loading runs in fixed stages:
//! 1. Resolve kind tokens, reject duplicates
//! 2. Validate `inherit_from` edges
//! 3. Order generics topologically (DFS, cycle path reported)
//! 4. Flatten generics, then nodes: own fields first, then each parent's
//! 5. Validate relationship peers and symmetric pairing
//! 6. Compute generic implementers
//!
//! Every iteration goes through `BTreeMap`/declaration order so two loads of
//! the same document produce identical registries.

use super::{
    AttributeRecord, AttributeSchema, BranchMode, FieldPattern, GenericSchema, KindRecord,
    KindSchema, NodeSchema, RelationshipRecord, RelationshipSchema, SchemaDocument, SchemaRef,
};
use crate::error::SchemaError;
use crate::primitives::{ORDER_WEIGHT_STEP, PATH_SEPARATOR};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

// =============================================================================
// REGISTRY
// =============================================================================

/// Flattened, immutable schema table for one branch.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    version: Option<String>,
    nodes: Vec<Arc<NodeSchema>>,
    node_index: BTreeMap<String, usize>,
    generics: BTreeMap<String, Arc<GenericSchema>>,
}

impl SchemaRegistry {
    /// Build a registry from a decoded document.
    pub fn load(document: SchemaDocument) -> Result<Self, SchemaError> {
        let generic_records = index_records(&document.generics, &BTreeMap::new())?;
        let node_records = index_records(&document.nodes, &generic_records)?;

        for (kind, record) in generic_records.iter().chain(node_records.iter()) {
            check_inherit_from(kind, record, &generic_records)?;
        }

        let order = topological_order(&generic_records)?;

        // Generics first, parents before children
        let mut flat_generics: BTreeMap<String, Flattened> = BTreeMap::new();
        for kind in &order {
            let Some(record) = generic_records.get(kind) else {
                continue;
            };
            let flat = flatten(kind, record, &flat_generics)?;
            flat_generics.insert(kind.clone(), flat);
        }

        let mut flat_nodes: BTreeMap<String, Flattened> = BTreeMap::new();
        for (kind, record) in &node_records {
            let flat = flatten(kind, record, &flat_generics)?;
            flat_nodes.insert(kind.clone(), flat);
        }

        let mut implementers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (kind, flat) in &flat_nodes {
            for generic in &flat.ancestors {
                implementers
                    .entry(generic.clone())
                    .or_default()
                    .insert(kind.clone());
            }
        }

        let mut generics = BTreeMap::new();
        for (kind, flat) in flat_generics {
            let Some(record) = generic_records.get(&kind) else {
                continue;
            };
            let used_by: Vec<String> = implementers
                .get(&kind)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            compare_used_by(&kind, record, &used_by);
            let schema = build_generic(kind.clone(), record, flat, used_by);
            generics.insert(kind, Arc::new(schema));
        }

        let mut nodes = Vec::with_capacity(flat_nodes.len());
        let mut node_index = BTreeMap::new();
        for (kind, flat) in flat_nodes {
            let Some(record) = node_records.get(&kind) else {
                continue;
            };
            node_index.insert(kind.clone(), nodes.len());
            nodes.push(Arc::new(build_node(kind, record, flat)));
        }

        let registry = Self {
            version: document.version,
            nodes,
            node_index,
            generics,
        };
        registry.check_peers()?;
        registry.check_pairing()?;

        tracing::debug!(
            nodes = registry.nodes.len(),
            generics = registry.generics.len(),
            "Schema registry loaded"
        );
        Ok(registry)
    }

    /// Parse JSON text and build a registry.
    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        Self::load(SchemaDocument::from_json(raw)?)
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Flattened concrete kind.
    pub fn get(&self, kind: &str) -> Result<Arc<NodeSchema>, SchemaError> {
        self.node_index
            .get(kind)
            .and_then(|&idx| self.nodes.get(idx))
            .cloned()
            .ok_or_else(|| SchemaError::NotFound(kind.to_string()))
    }

    /// Flattened generic kind.
    pub fn get_generic(&self, kind: &str) -> Result<Arc<GenericSchema>, SchemaError> {
        self.generics
            .get(kind)
            .cloned()
            .ok_or_else(|| SchemaError::NotFound(kind.to_string()))
    }

    /// Node or generic, whichever declares `kind`.
    pub fn lookup(&self, kind: &str) -> Result<SchemaRef, SchemaError> {
        if let Ok(node) = self.get(kind) {
            return Ok(SchemaRef::Node(node));
        }
        self.get_generic(kind).map(SchemaRef::Generic)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.node_index.contains_key(kind) || self.generics.contains_key(kind)
    }

    /// Concrete kinds implementing `generic`, in kind order.
    pub fn implementers(&self, generic: &str) -> Result<&[String], SchemaError> {
        self.generics
            .get(generic)
            .map(|g| g.used_by.as_slice())
            .ok_or_else(|| SchemaError::NotFound(generic.to_string()))
    }

    pub fn node_kinds(&self) -> impl Iterator<Item = &str> {
        self.node_index.keys().map(String::as_str)
    }

    pub fn generic_kinds(&self) -> impl Iterator<Item = &str> {
        self.generics.keys().map(String::as_str)
    }

    pub fn nodes(&self) -> &[Arc<NodeSchema>] {
        &self.nodes
    }

    /// True when `candidate` is `kind` itself, one of its generics, or (for a
    /// generic `kind`) one of its implementers.
    pub fn is_related_kind(&self, kind: &str, candidate: &str) -> bool {
        if kind == candidate {
            return true;
        }
        match self.lookup(kind) {
            Ok(SchemaRef::Node(node)) => node.implements(candidate),
            Ok(SchemaRef::Generic(generic)) => {
                generic.implements.iter().any(|g| g == candidate)
                    || generic.used_by.iter().any(|k| k == candidate)
            }
            Err(_) => false,
        }
    }

    // =========================================================================
    // POST-FLATTEN CHECKS
    // =========================================================================

    fn schemas(&self) -> Vec<SchemaRef> {
        self.nodes
            .iter()
            .cloned()
            .map(SchemaRef::Node)
            .chain(self.generics.values().cloned().map(SchemaRef::Generic))
            .collect()
    }

    fn check_peers(&self) -> Result<(), SchemaError> {
        for schema in self.schemas() {
            for rel in schema.relationships() {
                if !self.contains(&rel.peer) {
                    return Err(SchemaError::UnknownPeer {
                        kind: schema.kind().to_string(),
                        relationship: rel.name.clone(),
                        peer: rel.peer.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Every relationship on the peer side that shares an identifier must
    /// point back at this kind (or a related kind) with the complementary
    /// direction. One-sided relationships are allowed.
    fn check_pairing(&self) -> Result<(), SchemaError> {
        for schema in self.schemas() {
            for rel in schema.relationships() {
                let peer = self.lookup(&rel.peer)?;
                let counterparts = peer.relationships().iter().filter(|other| {
                    other.identifier == rel.identifier
                        && !(peer.kind() == schema.kind() && other.name == rel.name)
                });
                for other in counterparts {
                    let points_back = self.is_related_kind(schema.kind(), &other.peer);
                    if !points_back || other.direction != rel.direction.complement() {
                        return Err(SchemaError::AsymmetricRelationship {
                            kind: schema.kind().to_string(),
                            relationship: rel.name.clone(),
                            peer: rel.peer.clone(),
                            identifier: rel.identifier.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Per-branch registries. Installing replaces a branch's registry wholesale.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    registries: RwLock<BTreeMap<String, Arc<SchemaRegistry>>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, branch: impl Into<String>, registry: SchemaRegistry) -> Arc<SchemaRegistry> {
        let branch = branch.into();
        let registry = Arc::new(registry);
        tracing::info!(
            branch = %branch,
            nodes = registry.nodes.len(),
            generics = registry.generics.len(),
            "Schema installed"
        );
        self.registries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(branch, Arc::clone(&registry));
        registry
    }

    pub fn registry(&self, branch: &str) -> Result<Arc<SchemaRegistry>, SchemaError> {
        self.registries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(branch)
            .cloned()
            .ok_or_else(|| SchemaError::BranchNotLoaded(branch.to_string()))
    }

    /// Drop a branch's registry, e.g. after the branch is deleted.
    pub fn remove(&self, branch: &str) -> Option<Arc<SchemaRegistry>> {
        self.registries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(branch)
    }

    pub fn branches(&self) -> Vec<String> {
        self.registries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

// =============================================================================
// LOAD STAGES
// =============================================================================

fn index_records<'a>(
    records: &'a [KindRecord],
    already: &BTreeMap<String, &KindRecord>,
) -> Result<BTreeMap<String, &'a KindRecord>, SchemaError> {
    let mut index = BTreeMap::new();
    for record in records {
        let kind = record.resolved_kind().ok_or(SchemaError::MissingKind)?;
        if already.contains_key(&kind) || index.contains_key(&kind) {
            return Err(SchemaError::DuplicateKind(kind));
        }
        index.insert(kind, record);
    }
    Ok(index)
}

fn check_inherit_from(
    kind: &str,
    record: &KindRecord,
    generics: &BTreeMap<String, &KindRecord>,
) -> Result<(), SchemaError> {
    let mut seen = BTreeSet::new();
    for parent in &record.inherit_from {
        if !generics.contains_key(parent) {
            return Err(SchemaError::UnknownGeneric {
                kind: kind.to_string(),
                generic: parent.clone(),
            });
        }
        if !seen.insert(parent.as_str()) {
            return Err(SchemaError::DuplicateInheritance {
                kind: kind.to_string(),
                generic: parent.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Parents-first order over generics. Reports the cycle path on failure.
fn topological_order(generics: &BTreeMap<String, &KindRecord>) -> Result<Vec<String>, SchemaError> {
    fn visit(
        kind: &str,
        generics: &BTreeMap<String, &KindRecord>,
        state: &mut BTreeMap<String, Visit>,
        path: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<(), SchemaError> {
        match state.get(kind) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::InProgress) => {
                let start = path.iter().position(|k| k == kind).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(kind.to_string());
                return Err(SchemaError::Cycle(cycle));
            }
            None => {}
        }
        state.insert(kind.to_string(), Visit::InProgress);
        path.push(kind.to_string());
        if let Some(record) = generics.get(kind) {
            for parent in &record.inherit_from {
                visit(parent, generics, state, path, order)?;
            }
        }
        path.pop();
        state.insert(kind.to_string(), Visit::Done);
        order.push(kind.to_string());
        Ok(())
    }

    let mut state = BTreeMap::new();
    let mut order = Vec::with_capacity(generics.len());
    for kind in generics.keys() {
        visit(kind, generics, &mut state, &mut Vec::new(), &mut order)?;
    }
    Ok(order)
}

// =============================================================================
// FLATTENING
// =============================================================================

/// A field plus what was explicit in its record.
#[derive(Debug, Clone)]
struct Draft<T> {
    field: T,
    explicit_weight: bool,
    branch: Option<BranchMode>,
}

#[derive(Debug, Clone, Default)]
struct Flattened {
    attributes: Vec<Draft<AttributeSchema>>,
    relationships: Vec<Draft<RelationshipSchema>>,
    ancestors: BTreeSet<String>,
}

trait Field {
    fn name(&self) -> &str;
    fn order_weight(&self) -> u32;
    fn set_order_weight(&mut self, weight: u32);
    fn mark_inherited(&mut self);
    fn set_branch(&mut self, branch: BranchMode);
    fn conflicts_with(&self, other: &Self) -> bool;
}

impl Field for AttributeSchema {
    fn name(&self) -> &str {
        &self.name
    }
    fn order_weight(&self) -> u32 {
        self.order_weight
    }
    fn set_order_weight(&mut self, weight: u32) {
        self.order_weight = weight;
    }
    fn mark_inherited(&mut self) {
        self.inherited = true;
    }
    fn set_branch(&mut self, branch: BranchMode) {
        self.branch = branch;
    }
    fn conflicts_with(&self, other: &Self) -> bool {
        self.kind != other.kind
    }
}

impl Field for RelationshipSchema {
    fn name(&self) -> &str {
        &self.name
    }
    fn order_weight(&self) -> u32 {
        self.order_weight
    }
    fn set_order_weight(&mut self, weight: u32) {
        self.order_weight = weight;
    }
    fn mark_inherited(&mut self) {
        self.inherited = true;
    }
    fn set_branch(&mut self, branch: BranchMode) {
        self.branch = branch;
    }
    fn conflicts_with(&self, other: &Self) -> bool {
        self.cardinality != other.cardinality || self.peer != other.peer
    }
}

fn default_weight(position: usize) -> u32 {
    (position as u32).saturating_add(1).saturating_mul(ORDER_WEIGHT_STEP)
}

/// `lower(a)__lower(b)` with the two kinds sorted.
pub(crate) fn default_identifier(kind: &str, peer: &str) -> String {
    let mut pair = [kind.to_lowercase(), peer.to_lowercase()];
    pair.sort();
    pair.join(PATH_SEPARATOR)
}

fn convert_attribute(record: &AttributeRecord, position: usize) -> Draft<AttributeSchema> {
    let regex = record.regex.as_deref().map(FieldPattern::new);
    if let Some(pattern) = regex.as_ref().filter(|p| p.compiled().is_none()) {
        tracing::warn!(
            attribute = %record.name,
            pattern = %pattern.as_str(),
            "Attribute pattern does not compile; writes to it will be rejected"
        );
    }
    Draft {
        field: AttributeSchema {
            name: record.name.clone(),
            kind: record.kind,
            label: record.label.clone(),
            description: record.description.clone(),
            optional: record.optional,
            unique: record.unique,
            read_only: record.read_only,
            default_value: record.default_value.clone(),
            enum_values: record.enum_values.clone(),
            choices: record.choices.iter().map(|c| c.name().to_string()).collect(),
            min_length: record.min_length,
            max_length: record.max_length,
            regex,
            order_weight: record.order_weight.unwrap_or_else(|| default_weight(position)),
            inherited: false,
            branch: BranchMode::default(),
        },
        explicit_weight: record.order_weight.is_some(),
        branch: record.branch,
    }
}

fn convert_relationship(
    kind: &str,
    record: &RelationshipRecord,
    position: usize,
) -> Draft<RelationshipSchema> {
    Draft {
        field: RelationshipSchema {
            name: record.name.clone(),
            peer: record.peer.clone(),
            cardinality: record.cardinality,
            direction: record.direction,
            kind: record.kind,
            identifier: record
                .identifier
                .clone()
                .unwrap_or_else(|| default_identifier(kind, &record.peer)),
            label: record.label.clone(),
            optional: record.optional,
            read_only: record.read_only,
            order_weight: record.order_weight.unwrap_or_else(|| default_weight(position)),
            inherited: false,
            branch: BranchMode::default(),
        },
        explicit_weight: record.order_weight.is_some(),
        branch: record.branch,
    }
}

fn flatten(
    kind: &str,
    record: &KindRecord,
    parents: &BTreeMap<String, Flattened>,
) -> Result<Flattened, SchemaError> {
    let mut attributes: Vec<Draft<AttributeSchema>> = record
        .attributes
        .iter()
        .enumerate()
        .map(|(pos, a)| convert_attribute(a, pos))
        .collect();
    let mut relationships: Vec<Draft<RelationshipSchema>> = record
        .relationships
        .iter()
        .enumerate()
        .map(|(pos, r)| convert_relationship(kind, r, pos))
        .collect();

    let mut local = BTreeSet::new();
    for name in attributes
        .iter()
        .map(|d| d.field.name.as_str())
        .chain(relationships.iter().map(|d| d.field.name.as_str()))
    {
        if !local.insert(name.to_string()) {
            return Err(duplicate_field(kind, name));
        }
    }

    let mut ancestors = BTreeSet::new();
    for parent_kind in &record.inherit_from {
        let parent = parents
            .get(parent_kind)
            .ok_or_else(|| SchemaError::UnknownGeneric {
                kind: kind.to_string(),
                generic: parent_kind.clone(),
            })?;
        ancestors.insert(parent_kind.clone());
        ancestors.extend(parent.ancestors.iter().cloned());
        merge(kind, &mut attributes, &parent.attributes, &local)?;
        merge(kind, &mut relationships, &parent.relationships, &local)?;
    }

    // An attribute and a relationship may not share a name
    for attr in &attributes {
        if relationships.iter().any(|r| r.field.name == attr.field.name) {
            return Err(duplicate_field(kind, &attr.field.name));
        }
    }

    Ok(Flattened {
        attributes,
        relationships,
        ancestors,
    })
}

fn merge<T: Field + Clone>(
    kind: &str,
    target: &mut Vec<Draft<T>>,
    incoming: &[Draft<T>],
    local: &BTreeSet<String>,
) -> Result<(), SchemaError> {
    for candidate in incoming {
        let name = candidate.field.name();
        match target.iter_mut().find(|d| d.field.name() == name) {
            Some(existing) if local.contains(name) => {
                // Local override keeps its definition, borrows the weight
                if !existing.explicit_weight {
                    existing.field.set_order_weight(candidate.field.order_weight());
                    existing.explicit_weight = true;
                }
            }
            Some(existing) => {
                if existing.field.conflicts_with(&candidate.field) {
                    return Err(duplicate_field(kind, name));
                }
            }
            None => {
                let mut draft = candidate.clone();
                draft.field.mark_inherited();
                target.push(draft);
            }
        }
    }
    Ok(())
}

fn duplicate_field(kind: &str, field: &str) -> SchemaError {
    SchemaError::DuplicateField {
        kind: kind.to_string(),
        field: field.to_string(),
    }
}

fn resolve_branch<T: Field>(drafts: Vec<Draft<T>>, kind_branch: BranchMode) -> Vec<T> {
    drafts
        .into_iter()
        .map(|draft| {
            let mut field = draft.field;
            field.set_branch(draft.branch.unwrap_or(kind_branch));
            field
        })
        .collect()
}

fn build_node(kind: String, record: &KindRecord, flat: Flattened) -> NodeSchema {
    let branch = record.branch.unwrap_or_default();
    NodeSchema {
        kind,
        namespace: record.namespace.clone(),
        name: record.name.clone(),
        label: record.label.clone(),
        description: record.description.clone(),
        default_filter: record.default_filter.clone(),
        branch,
        order_by: record.order_by.clone(),
        display_labels: record.display_labels.clone(),
        human_friendly_id: record.human_friendly_id.clone(),
        inherit_from: record.inherit_from.clone(),
        implements: flat.ancestors.into_iter().collect(),
        attributes: resolve_branch(flat.attributes, branch),
        relationships: resolve_branch(flat.relationships, branch),
    }
}

fn build_generic(
    kind: String,
    record: &KindRecord,
    flat: Flattened,
    used_by: Vec<String>,
) -> GenericSchema {
    let branch = record.branch.unwrap_or_default();
    GenericSchema {
        kind,
        namespace: record.namespace.clone(),
        name: record.name.clone(),
        label: record.label.clone(),
        description: record.description.clone(),
        branch,
        order_by: record.order_by.clone(),
        display_labels: record.display_labels.clone(),
        human_friendly_id: record.human_friendly_id.clone(),
        inherit_from: record.inherit_from.clone(),
        implements: flat.ancestors.into_iter().collect(),
        attributes: resolve_branch(flat.attributes, branch),
        relationships: resolve_branch(flat.relationships, branch),
        used_by,
    }
}

fn compare_used_by(kind: &str, record: &KindRecord, computed: &[String]) {
    if record.used_by.is_empty() {
        return;
    }
    let declared: BTreeSet<&str> = record.used_by.iter().map(String::as_str).collect();
    let actual: BTreeSet<&str> = computed.iter().map(String::as_str).collect();
    if declared != actual {
        tracing::warn!(
            generic = %kind,
            declared = ?declared,
            computed = ?actual,
            "Declared used_by differs from computed implementers"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::schema::{AttributeKind, Cardinality, RelationshipDirection};
    use serde_json::json;

    fn load(value: serde_json::Value) -> Result<SchemaRegistry, SchemaError> {
        SchemaRegistry::load(SchemaDocument::from_value(value).unwrap())
    }

    fn repository_schema() -> serde_json::Value {
        json!({
            "generics": [{
                "kind": "CoreGenericRepository",
                "attributes": [
                    {"name": "name", "kind": "Text", "unique": true},
                    {"name": "description", "kind": "Text", "optional": true},
                    {"name": "location", "kind": "Text"}
                ],
                "relationships": [
                    {"name": "tags", "peer": "BuiltinTag", "optional": true}
                ]
            }],
            "nodes": [
                {
                    "kind": "CoreRepository",
                    "inherit_from": ["CoreGenericRepository"],
                    "attributes": [
                        {"name": "password", "kind": "Password", "optional": true},
                        {"name": "description", "kind": "TextArea", "optional": true}
                    ]
                },
                {
                    "kind": "BuiltinTag",
                    "attributes": [{"name": "name", "kind": "Text"}]
                }
            ]
        })
    }

    #[test]
    fn effective_fields_are_own_plus_inherited() {
        let registry = load(repository_schema()).unwrap();
        let repo = registry.get("CoreRepository").unwrap();

        let names: Vec<&str> = repo.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["password", "description", "name", "location"]);

        assert!(!repo.attribute("password").unwrap().inherited);
        assert!(repo.attribute("name").unwrap().inherited);
        assert!(repo.relationship("tags").unwrap().inherited);

        // Local override replaces the inherited definition
        let description = repo.attribute("description").unwrap();
        assert_eq!(description.kind, AttributeKind::TextArea);
        assert!(!description.inherited);
    }

    #[test]
    fn override_without_weight_takes_inherited_weight() {
        let registry = load(repository_schema()).unwrap();
        let repo = registry.get("CoreRepository").unwrap();
        let generic = registry.get_generic("CoreGenericRepository").unwrap();
        assert_eq!(
            repo.attribute("description").unwrap().order_weight,
            generic.attribute("description").unwrap().order_weight
        );
        assert_eq!(repo.attribute("password").unwrap().order_weight, 1000);
    }

    #[test]
    fn implementers_are_computed() {
        let registry = load(repository_schema()).unwrap();
        assert_eq!(
            registry.implementers("CoreGenericRepository").unwrap(),
            &["CoreRepository".to_string()]
        );
        assert!(registry.lookup("CoreGenericRepository").unwrap().is_generic());
        assert!(matches!(
            registry.get("CoreGenericRepository"),
            Err(SchemaError::NotFound(_))
        ));
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let err = load(json!({
            "generics": [
                {"kind": "A", "inherit_from": ["B"]},
                {"kind": "B", "inherit_from": ["A"]}
            ]
        }))
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::Cycle(vec!["A".into(), "B".into(), "A".into()])
        );
    }

    #[test]
    fn unknown_generic_is_rejected() {
        let err = load(json!({
            "nodes": [{"kind": "N", "inherit_from": ["Missing"]}]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownGeneric { .. }));
    }

    #[test]
    fn inheriting_from_a_node_is_rejected() {
        let err = load(json!({
            "nodes": [
                {"kind": "Base"},
                {"kind": "N", "inherit_from": ["Base"]}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownGeneric { .. }));
    }

    #[test]
    fn duplicate_kind_and_inheritance() {
        let err = load(json!({"nodes": [{"kind": "N"}, {"kind": "N"}]})).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateKind("N".into()));

        let err = load(json!({
            "generics": [{"kind": "G"}],
            "nodes": [{"kind": "N", "inherit_from": ["G", "G"]}]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateInheritance { .. }));
    }

    #[test]
    fn conflicting_generics_are_rejected() {
        let err = load(json!({
            "generics": [
                {"kind": "G1", "attributes": [{"name": "size", "kind": "Number"}]},
                {"kind": "G2", "attributes": [{"name": "size", "kind": "Text"}]}
            ],
            "nodes": [{"kind": "N", "inherit_from": ["G1", "G2"]}]
        }))
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateField {
                kind: "N".into(),
                field: "size".into()
            }
        );
    }

    #[test]
    fn attribute_and_relationship_clash_is_rejected() {
        let err = load(json!({
            "generics": [
                {"kind": "G1", "attributes": [{"name": "site"}]},
                {"kind": "G2", "relationships": [{"name": "site", "peer": "N"}]}
            ],
            "nodes": [{"kind": "N", "inherit_from": ["G1", "G2"]}]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn diamond_inheritance_is_deduplicated() {
        let registry = load(json!({
            "generics": [
                {"kind": "Root", "attributes": [{"name": "name"}]},
                {"kind": "Left", "inherit_from": ["Root"]},
                {"kind": "Right", "inherit_from": ["Root"]}
            ],
            "nodes": [{"kind": "N", "inherit_from": ["Left", "Right"]}]
        }))
        .unwrap();
        let node = registry.get("N").unwrap();
        assert_eq!(node.attributes.len(), 1);
        assert_eq!(node.implements, vec!["Left", "Right", "Root"]);
        assert_eq!(registry.implementers("Root").unwrap(), &["N".to_string()]);
    }

    #[test]
    fn field_branch_defaults_to_concrete_kind() {
        let registry = load(json!({
            "generics": [{"kind": "G", "attributes": [
                {"name": "a"},
                {"name": "b", "branch": "local"}
            ]}],
            "nodes": [{"kind": "N", "branch": "agnostic", "inherit_from": ["G"]}]
        }))
        .unwrap();
        let node = registry.get("N").unwrap();
        assert_eq!(node.attribute("a").unwrap().branch, BranchMode::Agnostic);
        assert_eq!(node.attribute("b").unwrap().branch, BranchMode::Local);
    }

    #[test]
    fn default_identifier_is_shared_by_both_sides() {
        let registry = load(json!({
            "nodes": [
                {"kind": "InfraDevice", "relationships": [
                    {"name": "site", "peer": "InfraSite", "cardinality": "one"}
                ]},
                {"kind": "InfraSite", "relationships": [
                    {"name": "devices", "peer": "InfraDevice", "cardinality": "many"}
                ]}
            ]
        }))
        .unwrap();
        let device = registry.get("InfraDevice").unwrap();
        let site = registry.get("InfraSite").unwrap();
        assert_eq!(
            device.relationship("site").unwrap().identifier,
            "infradevice__infrasite"
        );
        assert_eq!(
            device.relationship("site").unwrap().identifier,
            site.relationship("devices").unwrap().identifier
        );
        assert_eq!(
            device.relationship("site").unwrap().cardinality,
            Cardinality::One
        );
    }

    #[test]
    fn mismatched_direction_is_asymmetric() {
        let err = load(json!({
            "nodes": [
                {"kind": "A", "relationships": [
                    {"name": "b", "peer": "B", "identifier": "a_b", "direction": "outbound"}
                ]},
                {"kind": "B", "relationships": [
                    {"name": "a", "peer": "A", "identifier": "a_b", "direction": "outbound"}
                ]}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::AsymmetricRelationship { .. }));
    }

    #[test]
    fn outbound_inbound_pair_is_accepted() {
        let registry = load(json!({
            "nodes": [
                {"kind": "A", "relationships": [
                    {"name": "b", "peer": "B", "identifier": "a_b", "direction": "outbound"}
                ]},
                {"kind": "B", "relationships": [
                    {"name": "a", "peer": "A", "identifier": "a_b", "direction": "inbound"}
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(
            registry.get("B").unwrap().relationship("a").unwrap().direction,
            RelationshipDirection::Inbound
        );
    }

    #[test]
    fn counterpart_pointing_elsewhere_is_asymmetric() {
        let err = load(json!({
            "nodes": [
                {"kind": "A", "relationships": [{"name": "b", "peer": "B", "identifier": "x"}]},
                {"kind": "B", "relationships": [{"name": "c", "peer": "C", "identifier": "x"}]},
                {"kind": "C"}
            ]
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::AsymmetricRelationship { ref kind, .. } if kind == "A"
        ));
    }

    #[test]
    fn unknown_peer_is_rejected() {
        let err = load(json!({
            "nodes": [{"kind": "A", "relationships": [{"name": "b", "peer": "Nope"}]}]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownPeer { .. }));
    }

    #[test]
    fn catalog_installs_and_removes() {
        let catalog = SchemaCatalog::new();
        assert!(matches!(
            catalog.registry("main"),
            Err(SchemaError::BranchNotLoaded(_))
        ));
        catalog.install("main", load(repository_schema()).unwrap());
        assert!(catalog.registry("main").unwrap().contains("CoreRepository"));
        assert_eq!(catalog.branches(), vec!["main".to_string()]);
        assert!(catalog.remove("main").is_some());
        assert!(catalog.registry("main").is_err());
    }

    #[test]
    fn attribute_patterns_compile_at_load() {
        let registry = load(json!({
            "generics": [{
                "kind": "CoreNamed",
                "attributes": [{"name": "slug", "regex": "[a-z]+"}]
            }],
            "nodes": [{
                "kind": "InfraSite",
                "inherit_from": ["CoreNamed"],
                "attributes": [{"name": "code", "regex": "(?<=x)y"}]
            }]
        }))
        .unwrap();
        let site = registry.get("InfraSite").unwrap();

        let slug = site.attribute("slug").unwrap().regex.as_ref().unwrap();
        assert_eq!(slug.as_str(), "[a-z]+");
        let compiled = slug.compiled().unwrap();
        assert!(compiled.is_match("paris-1"));
        assert!(!compiled.is_match("1paris"));

        // Lookbehind is unsupported: the schema still loads
        let code = site.attribute("code").unwrap().regex.as_ref().unwrap();
        assert!(code.compiled().is_none());
        assert_eq!(
            serde_json::to_value(site.attribute("code").unwrap()).unwrap()["regex"],
            json!("(?<=x)y")
        );
    }
}
