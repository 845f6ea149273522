//! # Client Primitives
//!
//! Hardcoded constants shared by the schema registry, the builders and the
//! client front-ends. They are compiled in and immutable at runtime.

/// Branch used when the caller does not name one.
pub const DEFAULT_BRANCH: &str = "main";

/// Number of nodes requested per page when the caller gives no explicit limit.
pub const DEFAULT_PAGINATION_SIZE: usize = 50;

/// Relationship hops whose peers get their attributes expanded by default.
///
/// - `0`: peers are emitted as references only (`id`, `display_label`, `__typename`)
/// - `1`: peers also carry their scalar attributes
pub const DEFAULT_RELATIONSHIP_DEPTH: usize = 1;

/// Operations a batch keeps in flight at once.
pub const DEFAULT_MAX_CONCURRENT_EXECUTION: usize = 5;

/// Maximum relationship depth a query may request.
///
/// All generated queries must stay bounded; deeper requests are rejected
/// before any transport call.
pub const MAX_RELATIONSHIP_DEPTH: usize = 3;

/// Step used to assign `order_weight` to fields declared without one.
///
/// A field at position `n` in its record receives `(n + 1) * ORDER_WEIGHT_STEP`.
pub const ORDER_WEIGHT_STEP: u32 = 1000;

/// Separator between segments of a field path, filter key or HFID component.
pub const PATH_SEPARATOR: &str = "__";

// =============================================================================
// RESERVED FIELD NAMES
// =============================================================================

/// Meta fields selected on every node and never treated as schema fields.
pub const META_FIELDS: &[&str] = &["id", "hfid", "display_label", "__typename"];

/// Subfields accepted after an attribute name in a filter key.
pub const ATTRIBUTE_FILTER_SUFFIXES: &[&str] = &[
    "value",
    "values",
    "is_default",
    "is_protected",
    "is_visible",
    "source__id",
    "owner__id",
    "isnull",
];

/// Subfields accepted directly after a relationship name in a filter key.
pub const RELATIONSHIP_FILTER_SUFFIXES: &[&str] = &["ids", "isnull"];

/// Filter keys that are not rooted at a schema field.
pub const TOP_LEVEL_FILTERS: &[&str] = &["ids", "hfid", "any__value", "partial_match"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_depth_is_within_bounds() {
        assert!(DEFAULT_RELATIONSHIP_DEPTH <= MAX_RELATIONSHIP_DEPTH);
    }

    #[test]
    fn meta_fields_are_not_filter_suffixes() {
        for meta in META_FIELDS {
            assert!(!ATTRIBUTE_FILTER_SUFFIXES.contains(meta));
        }
    }
}
