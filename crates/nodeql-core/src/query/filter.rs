//! # Filter Validation
//!
//! Filter keys follow the server's `__`-separated argument naming:
//!
//! - `name__value`, `name__values`, `name__isnull`, `name__source__id`, ...
//! - `site__ids`, `site__isnull`, `site__name__value` (one relationship hop)
//! - top-level `ids`, `hfid`, `any__value`, `partial_match`
//!
//! Validation only rejects what cannot possibly be valid for the schema; the
//! server remains the authority on everything else.

use crate::error::QueryBuildError;
use crate::primitives::{
    ATTRIBUTE_FILTER_SUFFIXES, PATH_SEPARATOR, RELATIONSHIP_FILTER_SUFFIXES, TOP_LEVEL_FILTERS,
};
use crate::schema::{FieldRef, KindSchema, SchemaRegistry};
use serde_json::Value;
use std::collections::BTreeMap;

/// Check every filter key against `schema` and every value against the
/// shape its key requires.
pub fn validate_filters(
    registry: &SchemaRegistry,
    schema: &dyn KindSchema,
    filters: &BTreeMap<String, Value>,
) -> Result<(), QueryBuildError> {
    for (key, value) in filters {
        validate_filter(registry, schema, key, value)?;
    }
    Ok(())
}

fn validate_filter(
    registry: &SchemaRegistry,
    schema: &dyn KindSchema,
    key: &str,
    value: &Value,
) -> Result<(), QueryBuildError> {
    if TOP_LEVEL_FILTERS.contains(&key) {
        return check_value(key, key, value);
    }

    let unknown = || QueryBuildError::UnknownFilter {
        kind: schema.kind().to_string(),
        filter: key.to_string(),
    };

    let (head, rest) = key.split_once(PATH_SEPARATOR).ok_or_else(unknown)?;
    match schema.field(head).ok_or_else(unknown)? {
        FieldRef::Attribute(_) => {
            if ATTRIBUTE_FILTER_SUFFIXES.contains(&rest) {
                check_value(key, rest, value)
            } else {
                Err(unknown())
            }
        }
        FieldRef::Relationship(rel) => {
            if RELATIONSHIP_FILTER_SUFFIXES.contains(&rest) {
                return check_value(key, rest, value);
            }
            // One hop into the peer: only attribute filters are accepted there
            let peer = registry.lookup(&rel.peer)?;
            let (peer_field, suffix) = rest.split_once(PATH_SEPARATOR).ok_or_else(unknown)?;
            match peer.field(peer_field) {
                Some(FieldRef::Attribute(_)) if ATTRIBUTE_FILTER_SUFFIXES.contains(&suffix) => {
                    check_value(key, suffix, value)
                }
                _ => Err(unknown()),
            }
        }
    }
}

/// Shape checks keyed on the trailing segment of a filter.
fn check_value(filter: &str, suffix: &str, value: &Value) -> Result<(), QueryBuildError> {
    let invalid = |reason: &str| QueryBuildError::InvalidFilterValue {
        filter: filter.to_string(),
        reason: reason.to_string(),
    };
    match suffix {
        "ids" | "hfid" => match value {
            Value::Array(items) if items.iter().all(Value::is_string) => Ok(()),
            _ => Err(invalid("expected a list of strings")),
        },
        "values" => match value {
            Value::Array(items) if !items.iter().any(contains_object) => Ok(()),
            Value::Array(_) => Err(invalid("expected a list of scalars")),
            _ => Err(invalid("expected a list")),
        },
        "isnull" | "is_default" | "is_protected" | "is_visible" | "partial_match" => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(invalid("expected a boolean"))
            }
        }
        "any__value" | "source__id" | "owner__id" => {
            if value.is_string() {
                Ok(())
            } else {
                Err(invalid("expected a string"))
            }
        }
        _ => {
            if contains_object(value) {
                Err(invalid("objects are not valid filter values"))
            } else {
                Ok(())
            }
        }
    }
}

/// Filter values are printed inline, where object keys would be bare.
fn contains_object(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(contains_object),
        _ => false,
    }
}
