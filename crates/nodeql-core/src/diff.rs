//! # Branch Diff Summary
//!
//! Per-node change counts of a branch against its origin, read from the
//! server's `DiffTree` query.

use crate::error::ClientError;
use crate::transport::GraphQlRequest;
use serde::Serialize;
use serde_json::Value;

const DIFF_TREE_QUERY: &str = "\
query GetDiffTree($branch_name: String!) {
    DiffTree(branch: $branch_name) {
        nodes {
            uuid
            kind
            status
            label
            num_added
            num_updated
            num_removed
            attributes {
                name
                status
                num_added
                num_updated
                num_removed
            }
            relationships {
                name
                status
                cardinality
                num_added
                num_updated
                num_removed
                elements {
                    status
                    num_added
                    num_updated
                    num_removed
                }
            }
        }
    }
}
";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeDiffSummary {
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementType {
    Attribute,
    RelationshipOne,
    RelationshipMany,
}

/// Change of one peer of a cardinality-many relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDiffPeer {
    pub action: String,
    pub summary: NodeDiffSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDiffElement {
    pub name: String,
    pub element_type: ElementType,
    pub action: String,
    pub summary: NodeDiffSummary,
    /// Only for cardinality-many relationships.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<NodeDiffPeer>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDiff {
    pub branch: String,
    pub kind: String,
    pub id: String,
    pub action: String,
    pub display_label: String,
    pub elements: Vec<NodeDiffElement>,
}

// =============================================================================
// QUERY + PARSING
// =============================================================================

/// The `DiffTree` query for `branch`, routed to that branch.
pub fn diff_request(branch: &str) -> GraphQlRequest {
    GraphQlRequest::new(DIFF_TREE_QUERY, branch)
        .with_variable("branch_name", branch)
        .with_tracker("query-difftree")
}

/// Decode a `DiffTree` response. A null tree means no changes.
pub fn parse_diff_tree(data: &Value, branch: &str) -> Result<Vec<NodeDiff>, ClientError> {
    let tree = data
        .get("DiffTree")
        .ok_or_else(|| ClientError::invalid("response has no DiffTree field"))?;
    if tree.is_null() {
        return Ok(Vec::new());
    }
    let nodes = tree
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::invalid("DiffTree without nodes"))?;
    Ok(nodes.iter().map(|node| node_diff(node, branch)).collect())
}

fn node_diff(node: &Value, branch: &str) -> NodeDiff {
    let mut elements = Vec::new();
    for attribute in list(node, "attributes") {
        elements.push(NodeDiffElement {
            name: text(attribute, "name"),
            element_type: ElementType::Attribute,
            action: text(attribute, "status"),
            summary: summary(attribute),
            peers: None,
        });
    }
    for relationship in list(node, "relationships") {
        let is_one = text(relationship, "cardinality").eq_ignore_ascii_case("one");
        let peers = (!is_one).then(|| {
            list(relationship, "elements")
                .map(|element| NodeDiffPeer {
                    action: text(element, "status"),
                    summary: summary(element),
                })
                .collect()
        });
        elements.push(NodeDiffElement {
            name: text(relationship, "name"),
            element_type: if is_one {
                ElementType::RelationshipOne
            } else {
                ElementType::RelationshipMany
            },
            action: text(relationship, "status"),
            summary: summary(relationship),
            peers,
        });
    }
    NodeDiff {
        branch: branch.to_string(),
        kind: text(node, "kind"),
        id: text(node, "uuid"),
        action: text(node, "status"),
        display_label: text(node, "label"),
        elements,
    }
}

fn list<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn text(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn summary(value: &Value) -> NodeDiffSummary {
    let count = |key: &str| value.get(key).and_then(Value::as_u64).unwrap_or(0);
    NodeDiffSummary {
        added: count("num_added"),
        updated: count("num_updated"),
        removed: count("num_removed"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_targets_branch() {
        let request = diff_request("feature");
        assert_eq!(request.branch, "feature");
        assert_eq!(request.variables["branch_name"], "feature");
        assert!(request.query.starts_with("query GetDiffTree($branch_name: String!) {"));
    }

    #[test]
    fn parses_tree() {
        let data = json!({"DiffTree": {"nodes": [{
            "uuid": "d1",
            "kind": "InfraDevice",
            "status": "UPDATED",
            "label": "edge01",
            "attributes": [
                {"name": "description", "status": "UPDATED", "num_updated": 1}
            ],
            "relationships": [
                {"name": "site", "status": "UPDATED", "cardinality": "ONE", "num_updated": 1},
                {
                    "name": "tags",
                    "status": "UPDATED",
                    "cardinality": "MANY",
                    "num_added": 1,
                    "num_removed": 1,
                    "elements": [
                        {"status": "ADDED", "num_added": 1},
                        {"status": "REMOVED", "num_removed": 1}
                    ]
                }
            ]
        }]}});
        let diffs = parse_diff_tree(&data, "feature").unwrap();
        assert_eq!(diffs.len(), 1);
        let diff = &diffs[0];
        assert_eq!(diff.id, "d1");
        assert_eq!(diff.action, "UPDATED");
        assert_eq!(diff.display_label, "edge01");
        assert_eq!(diff.elements.len(), 3);

        assert_eq!(diff.elements[0].element_type, ElementType::Attribute);
        assert_eq!(diff.elements[0].summary.updated, 1);
        assert_eq!(diff.elements[1].element_type, ElementType::RelationshipOne);
        assert!(diff.elements[1].peers.is_none());
        let peers = diff.elements[2].peers.as_ref().unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1].summary.removed, 1);

        let rendered = serde_json::to_value(&diff.elements[2]).unwrap();
        assert_eq!(rendered["element_type"], "RELATIONSHIP_MANY");
    }

    #[test]
    fn null_tree_is_empty() {
        assert!(parse_diff_tree(&json!({"DiffTree": null}), "main").unwrap().is_empty());
        assert!(parse_diff_tree(&json!({}), "main").is_err());
    }
}
