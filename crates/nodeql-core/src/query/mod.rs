//! # Query Builder
//!
//! Turns a [`QueryRequest`] into GraphQL text for one kind.
//!
//! Output is a pure function of the registry and the request: fields are
//! emitted in `(order_weight, name)` order, filter arguments in key order.
//! Every failure is raised here, before a transport is involved.
//!
//! Selection rules for a node reached after `hop` relationship hops:
//! - meta fields (`id`, `hfid` when defined, `display_label`, `__typename`) always
//! - attributes while `hop <= depth`
//! - relationships at the root, and while `hop < depth`
//! - an explicit `include` path overrides both limits along that path

pub mod filter;
pub(crate) mod render;

use crate::error::QueryBuildError;
use crate::primitives::{
    DEFAULT_BRANCH, DEFAULT_RELATIONSHIP_DEPTH, MAX_RELATIONSHIP_DEPTH, PATH_SEPARATOR,
};
use crate::schema::{FieldRef, KindSchema, RelationshipSchema, SchemaRegistry};
use crate::transport::GraphQlRequest;
use render::Selection;
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// REQUEST TYPES
// =============================================================================

/// Offset pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Pagination {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// The window right after this one.
    pub fn next(self) -> Self {
        Self {
            offset: self.offset.saturating_add(self.limit),
            limit: self.limit,
        }
    }
}

/// Everything needed to build a read query for one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub kind: String,
    pub filters: BTreeMap<String, Value>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Relationship depth; the client default when unset.
    pub depth: Option<usize>,
    pub pagination: Option<Pagination>,
    /// `limit` argument applied to every cardinality-many selection.
    pub relationship_limit: Option<usize>,
    /// Target branch; the client default when unset.
    pub branch: Option<String>,
    pub at: Option<String>,
}

impl QueryRequest {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: BTreeMap::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            depth: None,
            pagination: None,
            relationship_limit: None,
            branch: None,
            at: None,
        }
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.include.push(path.into());
        self
    }

    pub fn exclude(mut self, path: impl Into<String>) -> Self {
        self.exclude.push(path.into());
        self
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.pagination = Some(Pagination::new(offset, limit));
        self
    }

    pub fn relationship_limit(mut self, limit: usize) -> Self {
        self.relationship_limit = Some(limit);
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn at(mut self, at: impl Into<String>) -> Self {
        self.at = Some(at.into());
        self
    }

    pub fn effective_depth(&self) -> usize {
        self.depth.unwrap_or(DEFAULT_RELATIONSHIP_DEPTH)
    }

    pub fn effective_branch(&self) -> &str {
        self.branch.as_deref().unwrap_or(DEFAULT_BRANCH)
    }
}

/// One page of a single cardinality-many relationship of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipPageRequest {
    pub kind: String,
    pub id: String,
    pub relationship: String,
    pub pagination: Pagination,
    pub depth: usize,
    pub branch: String,
    pub at: Option<String>,
}

// =============================================================================
// PATH TREES
// =============================================================================

/// `include`/`exclude` paths folded into a tree keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PathTree {
    children: BTreeMap<String, PathTree>,
}

impl PathTree {
    fn child(&self, name: &str) -> Option<&PathTree> {
        self.children.get(name)
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Query construction bound to one registry.
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    registry: &'a SchemaRegistry,
}

/// Settings that stay constant across one recursive selection walk.
struct Walk {
    depth: usize,
    relationship_limit: Option<usize>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Build the paginated read query for `request.kind`.
    pub fn build(&self, request: &QueryRequest) -> Result<GraphQlRequest, QueryBuildError> {
        let depth = request.effective_depth();
        let branch = request.effective_branch();
        if depth > MAX_RELATIONSHIP_DEPTH {
            return Err(QueryBuildError::DepthExceeded {
                requested: depth,
                max: MAX_RELATIONSHIP_DEPTH,
            });
        }
        if request.pagination.is_some_and(|p| p.limit == 0) {
            return Err(QueryBuildError::InvalidPagination);
        }

        let schema = self.registry.lookup(&request.kind)?;
        filter::validate_filters(self.registry, &schema, &request.filters)?;
        let include = self.path_tree(&schema, &request.include)?;
        let exclude = self.path_tree(&schema, &request.exclude)?;

        let walk = Walk {
            depth,
            relationship_limit: request.relationship_limit,
        };
        let node = self.node_selection(&schema, 0, Some(&include), Some(&exclude), &walk)?;

        let mut root = Selection::with_children(&request.kind, connection(node));
        if let Some(page) = request.pagination {
            root = root
                .arg("offset", page.offset.to_string())
                .arg("limit", page.limit.to_string());
        }
        for (key, value) in &request.filters {
            root = root.arg(key, render::literal(value));
        }

        let query = render::operation("query", &[root]);
        tracing::debug!(kind = %request.kind, branch = %branch, "Built query");
        Ok(GraphQlRequest::new(query, branch).with_at(request.at.clone()))
    }

    /// Build the query fetching one page of `request.relationship`.
    pub fn build_relationship_page(
        &self,
        request: &RelationshipPageRequest,
    ) -> Result<GraphQlRequest, QueryBuildError> {
        if request.depth > MAX_RELATIONSHIP_DEPTH {
            return Err(QueryBuildError::DepthExceeded {
                requested: request.depth,
                max: MAX_RELATIONSHIP_DEPTH,
            });
        }
        if request.pagination.limit == 0 {
            return Err(QueryBuildError::InvalidPagination);
        }
        let schema = self.registry.lookup(&request.kind)?;
        let rel = self.many_relationship(&schema, &request.relationship)?;
        let peer = self.registry.lookup(&rel.peer)?;

        let walk = Walk {
            depth: request.depth,
            relationship_limit: None,
        };
        let peer_fields = self.node_selection(&peer, 1, None, None, &walk)?;
        let page = Selection::with_children(&rel.name, connection(peer_fields))
            .arg("offset", request.pagination.offset.to_string())
            .arg("limit", request.pagination.limit.to_string());

        let node = vec![Selection::leaf("id"), Selection::leaf("__typename"), page];
        let root = Selection::with_children(&request.kind, connection(node)).arg(
            "ids",
            render::literal(&Value::Array(vec![Value::String(request.id.clone())])),
        );

        let query = render::operation("query", &[root]);
        tracing::debug!(
            kind = %request.kind,
            relationship = %request.relationship,
            offset = request.pagination.offset,
            "Built relationship page query"
        );
        Ok(GraphQlRequest::new(query, &request.branch).with_at(request.at.clone()))
    }

    fn many_relationship<'s>(
        &self,
        schema: &'s dyn KindSchema,
        name: &str,
    ) -> Result<&'s RelationshipSchema, QueryBuildError> {
        match schema.field(name) {
            Some(FieldRef::Relationship(rel)) if rel.is_many() => Ok(rel),
            Some(_) => Err(QueryBuildError::NotManyRelationship {
                kind: schema.kind().to_string(),
                relationship: name.to_string(),
            }),
            None => Err(QueryBuildError::UnknownField {
                kind: schema.kind().to_string(),
                path: name.to_string(),
            }),
        }
    }

    /// Resolve `paths` against the schema and fold them into a tree.
    fn path_tree(
        &self,
        schema: &dyn KindSchema,
        paths: &[String],
    ) -> Result<PathTree, QueryBuildError> {
        let mut tree = PathTree::default();
        for path in paths {
            let unknown = || QueryBuildError::UnknownField {
                kind: schema.kind().to_string(),
                path: path.clone(),
            };
            let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
            let hops = segments.len().saturating_sub(1);
            if hops > MAX_RELATIONSHIP_DEPTH {
                return Err(QueryBuildError::DepthExceeded {
                    requested: hops,
                    max: MAX_RELATIONSHIP_DEPTH,
                });
            }

            let mut current = self.registry.lookup(schema.kind())?;
            let mut node = &mut tree;
            for (idx, segment) in segments.iter().enumerate() {
                let last = idx + 1 == segments.len();
                match current.field(segment) {
                    Some(FieldRef::Attribute(_)) if last => {}
                    Some(FieldRef::Relationship(rel)) => {
                        if !last {
                            current = self.registry.lookup(&rel.peer)?;
                        }
                    }
                    _ => return Err(unknown()),
                }
                node = node.children.entry((*segment).to_string()).or_default();
            }
        }
        Ok(tree)
    }

    /// Fields of one node: meta first, then schema fields by weight.
    fn node_selection(
        &self,
        schema: &dyn KindSchema,
        hop: usize,
        include: Option<&PathTree>,
        exclude: Option<&PathTree>,
        walk: &Walk,
    ) -> Result<Vec<Selection>, QueryBuildError> {
        let mut fields = meta_selection(schema);
        let restricted = include.is_some_and(|tree| !tree.is_leaf());

        for field in schema.ordered_fields() {
            let name = field.name();
            let excluded = exclude.and_then(|tree| tree.child(name));
            if excluded.is_some_and(PathTree::is_leaf) {
                continue;
            }
            let explicit = include.and_then(|tree| tree.child(name));
            if restricted && explicit.is_none() {
                continue;
            }

            match field {
                FieldRef::Attribute(attr) => {
                    if explicit.is_some() || hop <= walk.depth {
                        fields.push(attribute_selection(&attr.name));
                    }
                }
                FieldRef::Relationship(rel) => {
                    if explicit.is_none() && hop != 0 && hop >= walk.depth {
                        continue;
                    }
                    let peer = self.registry.lookup(&rel.peer)?;
                    let peer_fields =
                        self.node_selection(&peer, hop + 1, explicit, excluded, walk)?;
                    fields.push(relationship_selection(rel, peer_fields, walk));
                }
            }
        }
        Ok(fields)
    }
}

// =============================================================================
// SELECTION HELPERS
// =============================================================================

fn meta_selection(schema: &dyn KindSchema) -> Vec<Selection> {
    let mut fields = vec![Selection::leaf("id")];
    if !schema.human_friendly_id().is_empty() {
        fields.push(Selection::leaf("hfid"));
    }
    fields.push(Selection::leaf("display_label"));
    fields.push(Selection::leaf("__typename"));
    fields
}

pub(crate) fn attribute_selection(name: &str) -> Selection {
    Selection::with_children(
        name,
        vec![
            Selection::leaf("value"),
            Selection::leaf("is_default"),
            Selection::leaf("is_protected"),
            Selection::with_children("source", vec![Selection::leaf("id")]),
            Selection::with_children("owner", vec![Selection::leaf("id")]),
        ],
    )
}

fn relationship_selection(
    rel: &RelationshipSchema,
    peer_fields: Vec<Selection>,
    walk: &Walk,
) -> Selection {
    if !rel.is_many() {
        return Selection::with_children(
            &rel.name,
            vec![Selection::with_children("node", peer_fields)],
        );
    }
    let selection = Selection::with_children(&rel.name, connection(peer_fields));
    match walk.relationship_limit {
        Some(limit) => selection.arg("limit", limit.to_string()),
        None => selection,
    }
}

/// `count` plus `edges { node { ... } }`.
fn connection(node_fields: Vec<Selection>) -> Vec<Selection> {
    vec![
        Selection::leaf("count"),
        Selection::with_children(
            "edges",
            vec![Selection::with_children("node", node_fields)],
        ),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_json(
            &json!({
                "nodes": [
                    {"kind": "InfraDevice",
                     "human_friendly_id": ["name__value"],
                     "attributes": [
                        {"name": "name", "order_weight": 100},
                        {"name": "description", "optional": true, "order_weight": 300}
                     ],
                     "relationships": [
                        {"name": "site", "peer": "InfraSite", "cardinality": "one", "order_weight": 200},
                        {"name": "interfaces", "peer": "InfraInterface", "order_weight": 400}
                     ]},
                    {"kind": "InfraSite",
                     "attributes": [{"name": "name"}],
                     "relationships": [
                        {"name": "devices", "peer": "InfraDevice"},
                        {"name": "region", "peer": "InfraRegion", "cardinality": "one"}
                     ]},
                    {"kind": "InfraRegion", "attributes": [{"name": "name"}]},
                    {"kind": "InfraInterface", "attributes": [{"name": "name"}]}
                ]
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn default_query_shape() {
        let registry = registry();
        let request = QueryRequest::new("InfraSite").paginate(0, 50);
        let text = QueryBuilder::new(&registry).build(&request).unwrap().query;
        let expected = "\
query {
    InfraSite(offset: 0, limit: 50) {
        count
        edges {
            node {
                id
                display_label
                __typename
                devices {
                    count
                    edges {
                        node {
                            id
                            hfid
                            display_label
                            __typename
                            name {
                                value
                                is_default
                                is_protected
                                source {
                                    id
                                }
                                owner {
                                    id
                                }
                            }
                            description {
                                value
                                is_default
                                is_protected
                                source {
                                    id
                                }
                                owner {
                                    id
                                }
                            }
                        }
                    }
                }
                name {
                    value
                    is_default
                    is_protected
                    source {
                        id
                    }
                    owner {
                        id
                    }
                }
                region {
                    node {
                        id
                        display_label
                        __typename
                        name {
                            value
                            is_default
                            is_protected
                            source {
                                id
                            }
                            owner {
                                id
                            }
                        }
                    }
                }
            }
        }
    }
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn fields_follow_order_weight() {
        let registry = registry();
        let text = QueryBuilder::new(&registry)
            .build(&QueryRequest::new("InfraDevice"))
            .unwrap()
            .query;
        let name = text.find("name {").unwrap();
        let site = text.find("site {").unwrap();
        let description = text.find("description {").unwrap();
        let interfaces = text.find("interfaces {").unwrap();
        assert!(name < site && site < description && description < interfaces);
    }

    #[test]
    fn depth_zero_emits_peer_references() {
        let registry = registry();
        let text = QueryBuilder::new(&registry)
            .build(&QueryRequest::new("InfraSite").depth(0).include("region"))
            .unwrap()
            .query;
        assert!(text.contains("region {\n                    node {\n                        id\n                        display_label\n                        __typename\n                    }"));
        assert!(!text.contains("devices"));
    }

    #[test]
    fn include_path_goes_beyond_default_depth() {
        let registry = registry();
        let text = QueryBuilder::new(&registry)
            .build(&QueryRequest::new("InfraDevice").include("site__region__name"))
            .unwrap()
            .query;
        assert!(text.contains("region {"));
        // Restricted: only the included root field is selected
        assert!(!text.contains("interfaces"));
    }

    #[test]
    fn exclude_removes_fields() {
        let registry = registry();
        let text = QueryBuilder::new(&registry)
            .build(&QueryRequest::new("InfraDevice").exclude("interfaces").exclude("site__name"))
            .unwrap()
            .query;
        assert!(!text.contains("interfaces"));
        assert!(text.contains("site {"));
        assert_eq!(text.matches("name {").count(), 1);
    }

    #[test]
    fn unknown_paths_and_depth_are_rejected() {
        let registry = registry();
        let builder = QueryBuilder::new(&registry);
        assert!(matches!(
            builder.build(&QueryRequest::new("InfraDevice").include("bogus")),
            Err(QueryBuildError::UnknownField { .. })
        ));
        assert!(matches!(
            builder.build(&QueryRequest::new("InfraDevice").include("name__value")),
            Err(QueryBuildError::UnknownField { .. })
        ));
        assert!(matches!(
            builder.build(&QueryRequest::new("InfraDevice").depth(4)),
            Err(QueryBuildError::DepthExceeded { requested: 4, max: 3 })
        ));
        assert!(matches!(
            builder.build(&QueryRequest::new("Nope")),
            Err(QueryBuildError::Schema(_))
        ));
    }

    #[test]
    fn filters_are_rendered_in_key_order() {
        let registry = registry();
        let request = QueryRequest::new("InfraDevice")
            .filter("site__name__value", "paris")
            .filter("name__values", json!(["a", "b"]))
            .paginate(10, 5);
        let text = QueryBuilder::new(&registry).build(&request).unwrap().query;
        assert!(text.contains(
            r#"InfraDevice(offset: 10, limit: 5, name__values: ["a", "b"], site__name__value: "paris") {"#
        ));
    }

    #[test]
    fn relationship_limit_applies_to_many_selections() {
        let registry = registry();
        let text = QueryBuilder::new(&registry)
            .build(&QueryRequest::new("InfraDevice").relationship_limit(20))
            .unwrap()
            .query;
        assert!(text.contains("interfaces(limit: 20) {"));
        assert!(text.contains("site {"));
    }

    #[test]
    fn relationship_page_query() {
        let registry = registry();
        let request = RelationshipPageRequest {
            kind: "InfraSite".into(),
            id: "site-1".into(),
            relationship: "devices".into(),
            pagination: Pagination::new(50, 50),
            depth: 1,
            branch: "main".into(),
            at: None,
        };
        let text = QueryBuilder::new(&registry)
            .build_relationship_page(&request)
            .unwrap()
            .query;
        assert!(text.starts_with("query {\n    InfraSite(ids: [\"site-1\"]) {"));
        assert!(text.contains("devices(offset: 50, limit: 50) {"));

        let not_many = RelationshipPageRequest {
            relationship: "region".into(),
            ..request
        };
        assert!(matches!(
            QueryBuilder::new(&registry).build_relationship_page(&not_many),
            Err(QueryBuildError::NotManyRelationship { .. })
        ));
    }

    #[test]
    fn generics_are_queryable() {
        let registry = SchemaRegistry::from_json(
            &json!({
                "generics": [{"kind": "CoreNode", "attributes": [{"name": "name"}]}],
                "nodes": [{"kind": "Leaf", "inherit_from": ["CoreNode"]}]
            })
            .to_string(),
        )
        .unwrap();
        let text = QueryBuilder::new(&registry)
            .build(&QueryRequest::new("CoreNode"))
            .unwrap()
            .query;
        assert!(text.contains("CoreNode {"));
    }
}
