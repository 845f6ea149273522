//! # Schema Model
//!
//! Two layers live here:
//!
//! - **Records** (`SchemaDocument`, `KindRecord`, ...): the raw payload as the
//!   server describes it. Every field is optional on the wire.
//! - **Resolved schemas** (`NodeSchema`, `GenericSchema`, ...): immutable,
//!   flattened descriptions produced by [`SchemaRegistry::load`].
//!
//! Resolved schemas are shared as `Arc` and never mutated after load.

pub mod registry;

pub use registry::{SchemaCatalog, SchemaRegistry};

use crate::error::SchemaError;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// ENUMERATIONS
// =============================================================================

/// How a kind or field behaves across branches. Advisory metadata only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchMode {
    #[default]
    Aware,
    Agnostic,
    Local,
}

/// Value kind of an attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeKind {
    #[default]
    Text,
    TextArea,
    Number,
    Bandwidth,
    Boolean,
    Checkbox,
    Password,
    HashedPassword,
    Dropdown,
    Enum,
    DateTime,
    #[serde(rename = "URL")]
    Url,
    File,
    Email,
    #[serde(rename = "JSON")]
    Json,
    List,
    #[serde(rename = "IPHost")]
    IpHost,
    #[serde(rename = "IPNetwork")]
    IpNetwork,
    MacAddress,
    Color,
    Any,
    /// Kinds added server-side after this client was built.
    #[serde(other)]
    Other,
}

impl AttributeKind {
    /// Write-only kinds: sent in mutation input, never selected back.
    pub fn is_password(self) -> bool {
        matches!(self, Self::Password | Self::HashedPassword)
    }

    /// Check the JSON shape of a non-null value against this kind.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Number | Self::Bandwidth => value.is_i64() || value.is_u64(),
            Self::Boolean | Self::Checkbox => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Json | Self::Any | Self::Other => true,
            Self::Text
            | Self::TextArea
            | Self::Password
            | Self::HashedPassword
            | Self::Dropdown
            | Self::Enum
            | Self::DateTime
            | Self::Url
            | Self::File
            | Self::Email
            | Self::IpHost
            | Self::IpNetwork
            | Self::MacAddress
            | Self::Color => value.is_string(),
        }
    }

    /// Name of the JSON shape [`accepts`](Self::accepts) expects.
    pub fn expected_shape(self) -> &'static str {
        match self {
            Self::Number | Self::Bandwidth => "an integer",
            Self::Boolean | Self::Checkbox => "a boolean",
            Self::List => "a list",
            Self::Json | Self::Any | Self::Other => "any value",
            _ => "a string",
        }
    }
}

/// Name of the JSON shape of `value`, for error messages.
pub(crate) fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_f64() => "a float",
        Value::Number(_) => "an integer",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    #[default]
    Many,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipDirection {
    #[default]
    Bidirectional,
    Outbound,
    Inbound,
}

impl RelationshipDirection {
    /// Direction the peer side must declare for the pair to be symmetric.
    pub fn complement(self) -> Self {
        match self {
            Self::Bidirectional => Self::Bidirectional,
            Self::Outbound => Self::Inbound,
            Self::Inbound => Self::Outbound,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    #[default]
    Generic,
    Attribute,
    Component,
    Parent,
    Group,
    Hierarchy,
    Profile,
}

// =============================================================================
// RAW RECORDS
// =============================================================================

/// Raw schema payload: `{ "generics": [...], "nodes": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDocument {
    pub version: Option<String>,
    pub generics: Vec<KindRecord>,
    pub nodes: Vec<KindRecord>,
}

impl SchemaDocument {
    /// Parse a document from JSON text.
    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(raw).map_err(|e| SchemaError::InvalidDocument(e.to_string()))
    }

    /// Parse a document from an already decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        serde_json::from_value(value).map_err(|e| SchemaError::InvalidDocument(e.to_string()))
    }
}

/// One node or generic as described by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindRecord {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub default_filter: Option<String>,
    pub branch: Option<BranchMode>,
    pub order_by: Vec<String>,
    pub display_labels: Vec<String>,
    pub human_friendly_id: Vec<String>,
    pub attributes: Vec<AttributeRecord>,
    pub relationships: Vec<RelationshipRecord>,
    pub inherit_from: Vec<String>,
    pub used_by: Vec<String>,
}

impl KindRecord {
    /// The kind token: `kind` when set, otherwise `namespace + name`.
    pub fn resolved_kind(&self) -> Option<String> {
        if !self.kind.is_empty() {
            return Some(self.kind.clone());
        }
        if self.name.is_empty() {
            return None;
        }
        Some(format!("{}{}", self.namespace, self.name))
    }
}

/// A dropdown choice, either bare or with display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChoiceRecord {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        label: Option<String>,
    },
}

impl ChoiceRecord {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeRecord {
    pub name: String,
    pub kind: AttributeKind,
    pub label: Option<String>,
    pub description: Option<String>,
    pub optional: bool,
    pub unique: bool,
    pub read_only: bool,
    pub default_value: Option<Value>,
    #[serde(rename = "enum")]
    pub enum_values: Vec<Value>,
    pub choices: Vec<ChoiceRecord>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub regex: Option<String>,
    pub order_weight: Option<u32>,
    pub branch: Option<BranchMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipRecord {
    pub name: String,
    pub peer: String,
    pub cardinality: Cardinality,
    pub direction: RelationshipDirection,
    pub kind: RelationshipKind,
    pub identifier: Option<String>,
    pub label: Option<String>,
    pub optional: bool,
    pub read_only: bool,
    pub order_weight: Option<u32>,
    pub branch: Option<BranchMode>,
}

impl Default for RelationshipRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            peer: String::new(),
            cardinality: Cardinality::default(),
            direction: RelationshipDirection::default(),
            kind: RelationshipKind::default(),
            identifier: None,
            label: None,
            optional: true,
            read_only: false,
            order_weight: None,
            branch: None,
        }
    }
}

// =============================================================================
// RESOLVED SCHEMAS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeSchema {
    pub name: String,
    pub kind: AttributeKind,
    pub label: Option<String>,
    pub description: Option<String>,
    pub optional: bool,
    pub unique: bool,
    pub read_only: bool,
    pub default_value: Option<Value>,
    pub enum_values: Vec<Value>,
    pub choices: Vec<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub regex: Option<FieldPattern>,
    pub order_weight: u32,
    pub inherited: bool,
    pub branch: BranchMode,
}

impl AttributeSchema {
    pub fn is_password(&self) -> bool {
        self.kind.is_password()
    }

    /// The closed set of values this attribute accepts, if any.
    ///
    /// `choices` wins over `enum`; enum members that are not strings are
    /// compared by their JSON text.
    pub fn allowed_values(&self) -> Option<Vec<String>> {
        if !self.choices.is_empty() {
            return Some(self.choices.clone());
        }
        if !self.enum_values.is_empty() {
            return Some(self.enum_values.iter().map(value_token).collect());
        }
        None
    }

    /// A value is required on create when the attribute is neither optional
    /// nor backed by a server-side default.
    pub fn is_required(&self) -> bool {
        !self.optional && self.default_value.is_none()
    }
}

/// `regex` constraint of an attribute, compiled once when the registry loads.
///
/// Matching is anchored at the start of the value, as the server matches.
/// A pattern the `regex` crate cannot compile keeps the schema loadable;
/// writes to the attribute then fail with `ValidationError::InvalidPattern`.
#[derive(Debug, Clone)]
pub struct FieldPattern {
    source: String,
    compiled: Option<Regex>,
}

impl FieldPattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Regex::new(&format!("^(?:{source})")).ok();
        Self { source, compiled }
    }

    /// The pattern as the schema declares it.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn compiled(&self) -> Option<&Regex> {
        self.compiled.as_ref()
    }
}

impl PartialEq for FieldPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for FieldPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// Textual token of a JSON scalar: strings unquoted, everything else as JSON.
pub(crate) fn value_token(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipSchema {
    pub name: String,
    pub peer: String,
    pub cardinality: Cardinality,
    pub direction: RelationshipDirection,
    pub kind: RelationshipKind,
    pub identifier: String,
    pub label: Option<String>,
    pub optional: bool,
    pub read_only: bool,
    pub order_weight: u32,
    pub inherited: bool,
    pub branch: BranchMode,
}

impl RelationshipSchema {
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

/// A concrete, instantiable kind with its effective (flattened) field set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSchema {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub default_filter: Option<String>,
    pub branch: BranchMode,
    pub order_by: Vec<String>,
    pub display_labels: Vec<String>,
    pub human_friendly_id: Vec<String>,
    /// Direct parents as declared.
    pub inherit_from: Vec<String>,
    /// Every generic implemented, directly or transitively.
    pub implements: Vec<String>,
    pub attributes: Vec<AttributeSchema>,
    pub relationships: Vec<RelationshipSchema>,
}

impl NodeSchema {
    pub fn implements(&self, generic: &str) -> bool {
        self.implements.iter().any(|g| g == generic)
    }
}

/// An abstract kind. Queryable, never instantiable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenericSchema {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub branch: BranchMode,
    pub order_by: Vec<String>,
    pub display_labels: Vec<String>,
    pub human_friendly_id: Vec<String>,
    pub inherit_from: Vec<String>,
    pub implements: Vec<String>,
    pub attributes: Vec<AttributeSchema>,
    pub relationships: Vec<RelationshipSchema>,
    /// Concrete kinds implementing this generic, computed at load.
    pub used_by: Vec<String>,
}

// =============================================================================
// KIND SCHEMA TRAIT
// =============================================================================

/// Borrowed view over one field of a kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldRef<'a> {
    Attribute(&'a AttributeSchema),
    Relationship(&'a RelationshipSchema),
}

impl<'a> FieldRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Self::Attribute(a) => &a.name,
            Self::Relationship(r) => &r.name,
        }
    }

    pub fn order_weight(&self) -> u32 {
        match self {
            Self::Attribute(a) => a.order_weight,
            Self::Relationship(r) => r.order_weight,
        }
    }
}

/// Read access shared by node and generic schemas.
pub trait KindSchema {
    fn kind(&self) -> &str;
    fn attributes(&self) -> &[AttributeSchema];
    fn relationships(&self) -> &[RelationshipSchema];
    fn human_friendly_id(&self) -> &[String];

    fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes().iter().find(|a| a.name == name)
    }

    fn relationship(&self, name: &str) -> Option<&RelationshipSchema> {
        self.relationships().iter().find(|r| r.name == name)
    }

    fn field(&self, name: &str) -> Option<FieldRef<'_>> {
        self.attribute(name)
            .map(FieldRef::Attribute)
            .or_else(|| self.relationship(name).map(FieldRef::Relationship))
    }

    /// All fields in ascending `(order_weight, name)`.
    fn ordered_fields(&self) -> Vec<FieldRef<'_>> {
        let mut fields: Vec<FieldRef<'_>> = self
            .attributes()
            .iter()
            .map(FieldRef::Attribute)
            .chain(self.relationships().iter().map(FieldRef::Relationship))
            .collect();
        fields.sort_by(|a, b| {
            a.order_weight()
                .cmp(&b.order_weight())
                .then_with(|| a.name().cmp(b.name()))
        });
        fields
    }
}

impl KindSchema for NodeSchema {
    fn kind(&self) -> &str {
        &self.kind
    }
    fn attributes(&self) -> &[AttributeSchema] {
        &self.attributes
    }
    fn relationships(&self) -> &[RelationshipSchema] {
        &self.relationships
    }
    fn human_friendly_id(&self) -> &[String] {
        &self.human_friendly_id
    }
}

impl KindSchema for GenericSchema {
    fn kind(&self) -> &str {
        &self.kind
    }
    fn attributes(&self) -> &[AttributeSchema] {
        &self.attributes
    }
    fn relationships(&self) -> &[RelationshipSchema] {
        &self.relationships
    }
    fn human_friendly_id(&self) -> &[String] {
        &self.human_friendly_id
    }
}

/// Either kind of resolved schema, as returned by [`SchemaRegistry::lookup`].
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaRef {
    Node(Arc<NodeSchema>),
    Generic(Arc<GenericSchema>),
}

impl SchemaRef {
    pub fn is_generic(&self) -> bool {
        matches!(self, Self::Generic(_))
    }

    pub fn as_node(&self) -> Option<&Arc<NodeSchema>> {
        match self {
            Self::Node(node) => Some(node),
            Self::Generic(_) => None,
        }
    }
}

impl KindSchema for SchemaRef {
    fn kind(&self) -> &str {
        match self {
            Self::Node(n) => &n.kind,
            Self::Generic(g) => &g.kind,
        }
    }
    fn attributes(&self) -> &[AttributeSchema] {
        match self {
            Self::Node(n) => &n.attributes,
            Self::Generic(g) => &g.attributes,
        }
    }
    fn relationships(&self) -> &[RelationshipSchema] {
        match self {
            Self::Node(n) => &n.relationships,
            Self::Generic(g) => &g.relationships,
        }
    }
    fn human_friendly_id(&self) -> &[String] {
        match self {
            Self::Node(n) => &n.human_friendly_id,
            Self::Generic(g) => &g.human_friendly_id,
        }
    }
}
