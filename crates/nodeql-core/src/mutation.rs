//! # Mutation Builder
//!
//! Client-side validation and GraphQL text for writes against one concrete
//! kind. Nothing here touches a transport; upsert identity resolution is
//! done by the caller, which passes the resolved id (if any) in.
//!
//! Input values are checked for:
//! - unknown and read-only fields
//! - JSON shape against the attribute kind
//! - `choices` / `enum` membership
//! - `min_length` / `max_length` / `regex`
//! - relationship cardinality
//! - required fields (create only)

use crate::error::ValidationError;
use crate::query::attribute_selection;
use crate::query::render::{self, Input, Selection};
use crate::schema::{
    AttributeSchema, FieldRef, KindSchema, NodeSchema, RelationshipSchema, shape_of, value_token,
};
use crate::transport::GraphQlRequest;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;

/// GraphQL type of the variables carrying free-form JSON attribute values.
const JSON_VARIABLE_TYPE: &str = "GenericScalar";

// =============================================================================
// INPUT TYPES
// =============================================================================

/// Reference to a peer node, by id or by human friendly id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerInput {
    Id(String),
    Hfid { kind: String, hfid: Vec<String> },
}

impl PeerInput {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn hfid(kind: impl Into<String>, hfid: Vec<String>) -> Self {
        Self::Hfid {
            kind: kind.into(),
            hfid,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Id(id) => json!({ "id": id }),
            Self::Hfid { kind, hfid } => json!({ "hfid": hfid, "kind": kind }),
        }
    }
}

/// New value of one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipInput {
    /// Cardinality one; `None` clears the relationship.
    One(Option<PeerInput>),
    Many(Vec<PeerInput>),
}

impl RelationshipInput {
    fn to_value(&self) -> Value {
        match self {
            Self::One(Some(peer)) => peer.to_value(),
            Self::One(None) => Value::Null,
            Self::Many(peers) => Value::Array(peers.iter().map(PeerInput::to_value).collect()),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::One(peer) => peer.is_none(),
            Self::Many(peers) => peers.is_empty(),
        }
    }
}

/// Field values supplied by a caller for a create, update or upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeData {
    pub attributes: BTreeMap<String, Value>,
    pub relationships: BTreeMap<String, RelationshipInput>,
}

impl NodeData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn one(mut self, name: impl Into<String>, peer: Option<PeerInput>) -> Self {
        self.relationships
            .insert(name.into(), RelationshipInput::One(peer));
        self
    }

    pub fn many(mut self, name: impl Into<String>, peers: Vec<PeerInput>) -> Self {
        self.relationships
            .insert(name.into(), RelationshipInput::Many(peers));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.relationships.is_empty()
    }
}

// =============================================================================
// OUTPUT TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOperation {
    Create,
    Update,
    Delete,
    RelationshipAdd,
    RelationshipRemove,
}

impl MutationOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::RelationshipAdd => "relationship-add",
            Self::RelationshipRemove => "relationship-remove",
        }
    }

    /// Name of the root mutation field for `kind`.
    pub fn field_name(self, kind: &str) -> String {
        match self {
            Self::Create => format!("{kind}Create"),
            Self::Update => format!("{kind}Update"),
            Self::Delete => format!("{kind}Delete"),
            Self::RelationshipAdd => "RelationshipAdd".to_string(),
            Self::RelationshipRemove => "RelationshipRemove".to_string(),
        }
    }

    /// Whether the response carries the written object.
    pub fn returns_object(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A built mutation and how to read its response.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub operation: MutationOperation,
    pub kind: String,
    /// Root field of the response `data` object, e.g. `CoreRepositoryCreate`.
    pub field: String,
    pub request: GraphQlRequest,
}

// =============================================================================
// BUILDER
// =============================================================================

/// Mutation construction for one concrete kind.
#[derive(Debug, Clone, Copy)]
pub struct MutationBuilder<'a> {
    schema: &'a NodeSchema,
}

impl<'a> MutationBuilder<'a> {
    pub fn new(schema: &'a NodeSchema) -> Self {
        Self { schema }
    }

    /// Every provided field is sent; required fields must be present.
    pub fn build_create(
        &self,
        data: &NodeData,
        branch: &str,
    ) -> Result<MutationRequest, ValidationError> {
        self.validate(data)?;
        self.check_required(data)?;
        let (input, variables) = self.input_object(None, data);
        Ok(self.finish(MutationOperation::Create, input, variables, branch))
    }

    /// Only the provided fields are sent, keyed by `id`.
    pub fn build_update(
        &self,
        id: &str,
        data: &NodeData,
        branch: &str,
    ) -> Result<MutationRequest, ValidationError> {
        self.require_id(id, MutationOperation::Update)?;
        self.validate(data)?;
        let (input, variables) = self.input_object(Some(id), data);
        Ok(self.finish(MutationOperation::Update, input, variables, branch))
    }

    /// `existing` is the id resolved from the HFID, if any.
    pub fn build_upsert(
        &self,
        existing: Option<&str>,
        data: &NodeData,
        branch: &str,
    ) -> Result<MutationRequest, ValidationError> {
        match existing {
            Some(id) => self.build_update(id, data, branch),
            None => self.build_create(data, branch),
        }
    }

    pub fn build_delete(&self, id: &str, branch: &str) -> Result<MutationRequest, ValidationError> {
        self.require_id(id, MutationOperation::Delete)?;
        let input = vec![("id".to_string(), Input::Literal(Value::String(id.to_string())))];
        Ok(self.finish(MutationOperation::Delete, input, Map::new(), branch))
    }

    pub fn build_relationship_add(
        &self,
        id: &str,
        relationship: &str,
        peers: &[PeerInput],
        branch: &str,
    ) -> Result<MutationRequest, ValidationError> {
        self.relationship_change(MutationOperation::RelationshipAdd, id, relationship, peers, branch)
    }

    pub fn build_relationship_remove(
        &self,
        id: &str,
        relationship: &str,
        peers: &[PeerInput],
        branch: &str,
    ) -> Result<MutationRequest, ValidationError> {
        self.relationship_change(
            MutationOperation::RelationshipRemove,
            id,
            relationship,
            peers,
            branch,
        )
    }

    fn relationship_change(
        &self,
        operation: MutationOperation,
        id: &str,
        relationship: &str,
        peers: &[PeerInput],
        branch: &str,
    ) -> Result<MutationRequest, ValidationError> {
        self.require_id(id, operation)?;
        let rel = match self.schema.field(relationship) {
            Some(FieldRef::Relationship(rel)) => rel,
            _ => return Err(self.unknown(relationship)),
        };
        if !rel.is_many() {
            return Err(ValidationError::Cardinality {
                field: rel.name.clone(),
                expected: "one".into(),
            });
        }
        if rel.read_only {
            return Err(self.read_only(relationship));
        }
        let input = vec![
            ("id".to_string(), Input::Literal(Value::String(id.to_string()))),
            ("name".to_string(), Input::Literal(Value::String(rel.identifier.clone()))),
            (
                "nodes".to_string(),
                Input::Literal(Value::Array(peers.iter().map(PeerInput::to_value).collect())),
            ),
        ];
        Ok(self.finish(operation, input, Map::new(), branch))
    }

    // =========================================================================
    // VALIDATION
    // =========================================================================

    /// Field-level checks shared by every write. Required fields are not
    /// checked here.
    pub fn validate(&self, data: &NodeData) -> Result<(), ValidationError> {
        for (name, value) in &data.attributes {
            let attr = match self.schema.field(name) {
                Some(FieldRef::Attribute(attr)) => attr,
                _ => return Err(self.unknown(name)),
            };
            if attr.read_only {
                return Err(self.read_only(name));
            }
            validate_attribute(&self.schema.kind, attr, value)?;
        }
        for (name, input) in &data.relationships {
            let rel = match self.schema.field(name) {
                Some(FieldRef::Relationship(rel)) => rel,
                _ => return Err(self.unknown(name)),
            };
            if rel.read_only {
                return Err(self.read_only(name));
            }
            validate_relationship(&self.schema.kind, rel, input)?;
        }
        Ok(())
    }

    fn check_required(&self, data: &NodeData) -> Result<(), ValidationError> {
        for attr in self.schema.attributes.iter().filter(|a| !a.read_only) {
            let provided = data.attributes.get(&attr.name).is_some_and(|v| !v.is_null());
            if attr.is_required() && !provided {
                return Err(self.missing(&attr.name));
            }
        }
        for rel in self.schema.relationships.iter().filter(|r| !r.read_only) {
            let provided = data
                .relationships
                .get(&rel.name)
                .is_some_and(|input| !input.is_empty());
            if !rel.optional && !provided {
                return Err(self.missing(&rel.name));
            }
        }
        Ok(())
    }

    fn require_id(&self, id: &str, operation: MutationOperation) -> Result<(), ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::MissingId {
                kind: self.schema.kind.clone(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    fn unknown(&self, field: &str) -> ValidationError {
        ValidationError::UnknownField {
            kind: self.schema.kind.clone(),
            field: field.to_string(),
        }
    }

    fn read_only(&self, field: &str) -> ValidationError {
        ValidationError::ReadOnly {
            kind: self.schema.kind.clone(),
            field: field.to_string(),
        }
    }

    fn missing(&self, field: &str) -> ValidationError {
        ValidationError::MissingRequired {
            kind: self.schema.kind.clone(),
            field: field.to_string(),
        }
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    /// Input object in schema field order, `id` first when present.
    ///
    /// Object and list attribute values are not printed: each becomes a
    /// variable named after its attribute, returned alongside the input.
    fn input_object(
        &self,
        id: Option<&str>,
        data: &NodeData,
    ) -> (Vec<(String, Input)>, Map<String, Value>) {
        let mut input = Vec::new();
        let mut variables = Map::new();
        if let Some(id) = id {
            input.push(("id".to_string(), Input::Literal(Value::String(id.to_string()))));
        }
        for field in self.schema.ordered_fields() {
            match field {
                FieldRef::Attribute(attr) => {
                    let Some(value) = data.attributes.get(&attr.name) else {
                        continue;
                    };
                    let inner = if value.is_object() || value.is_array() {
                        variables.insert(attr.name.clone(), value.clone());
                        Input::Variable(attr.name.clone())
                    } else {
                        Input::Literal(value.clone())
                    };
                    input.push((
                        attr.name.clone(),
                        Input::Object(vec![("value".to_string(), inner)]),
                    ));
                }
                FieldRef::Relationship(rel) => {
                    if let Some(rel_input) = data.relationships.get(&rel.name) {
                        input.push((rel.name.clone(), Input::Literal(rel_input.to_value())));
                    }
                }
            }
        }
        (input, variables)
    }

    /// Meta plus every non-password attribute.
    fn object_selection(&self) -> Selection {
        let mut fields = vec![Selection::leaf("id")];
        if !self.schema.human_friendly_id.is_empty() {
            fields.push(Selection::leaf("hfid"));
        }
        fields.push(Selection::leaf("display_label"));
        fields.push(Selection::leaf("__typename"));
        for field in self.schema.ordered_fields() {
            if let FieldRef::Attribute(attr) = field {
                if !attr.is_password() {
                    fields.push(attribute_selection(&attr.name));
                }
            }
        }
        Selection::with_children("object", fields)
    }

    fn finish(
        &self,
        operation: MutationOperation,
        input: Vec<(String, Input)>,
        variables: Map<String, Value>,
        branch: &str,
    ) -> MutationRequest {
        let field = operation.field_name(&self.schema.kind);
        let mut selection = vec![Selection::leaf("ok")];
        if operation.returns_object() {
            selection.push(self.object_selection());
        }
        let root = Selection::with_children(&field, selection)
            .arg("data", Input::Object(input).render());
        let declared: Vec<(String, &str)> = variables
            .keys()
            .map(|name| (name.clone(), JSON_VARIABLE_TYPE))
            .collect();
        let query = render::operation_with_variables("mutation", &declared, &[root]);
        tracing::debug!(
            kind = %self.schema.kind,
            operation = %operation,
            variables = declared.len(),
            "Built mutation"
        );
        let mut request = GraphQlRequest::new(query, branch)
            .with_tracker(format!("mutation-{}-{}", self.schema.kind.to_lowercase(), operation));
        request.variables = variables;
        MutationRequest {
            operation,
            kind: self.schema.kind.clone(),
            request,
            field,
        }
    }
}

// =============================================================================
// VALUE CHECKS
// =============================================================================

/// Validate one attribute value against its schema.
pub fn validate_attribute(
    kind: &str,
    attr: &AttributeSchema,
    value: &Value,
) -> Result<(), ValidationError> {
    if value.is_null() {
        if attr.optional {
            return Ok(());
        }
        return Err(ValidationError::MissingRequired {
            kind: kind.to_string(),
            field: attr.name.clone(),
        });
    }
    if !attr.kind.accepts(value) {
        return Err(ValidationError::TypeMismatch {
            field: attr.name.clone(),
            expected: attr.kind.expected_shape().to_string(),
            found: shape_of(value).to_string(),
        });
    }
    if let Some(allowed) = attr.allowed_values() {
        let token = value_token(value);
        if !allowed.contains(&token) {
            return Err(ValidationError::InvalidChoice {
                field: attr.name.clone(),
                value: token,
                allowed,
            });
        }
    }
    if let Value::String(text) = value {
        check_text(attr, text)?;
    }
    Ok(())
}

fn check_text(attr: &AttributeSchema, text: &str) -> Result<(), ValidationError> {
    let length = text.chars().count();
    if let Some(max) = attr.max_length {
        if length > max {
            return Err(ValidationError::TooLong {
                field: attr.name.clone(),
                length,
                max,
            });
        }
    }
    if let Some(min) = attr.min_length {
        if length < min {
            return Err(ValidationError::TooShort {
                field: attr.name.clone(),
                length,
                min,
            });
        }
    }
    if let Some(pattern) = &attr.regex {
        let regex = pattern
            .compiled()
            .ok_or_else(|| ValidationError::InvalidPattern {
                field: attr.name.clone(),
                pattern: pattern.as_str().to_string(),
            })?;
        if !regex.is_match(text) {
            return Err(ValidationError::PatternMismatch {
                field: attr.name.clone(),
                pattern: pattern.as_str().to_string(),
            });
        }
    }
    Ok(())
}

fn validate_relationship(
    kind: &str,
    rel: &RelationshipSchema,
    input: &RelationshipInput,
) -> Result<(), ValidationError> {
    match (input, rel.is_many()) {
        (RelationshipInput::Many(_), false) => Err(ValidationError::Cardinality {
            field: rel.name.clone(),
            expected: "one".into(),
        }),
        (RelationshipInput::One(_), true) => Err(ValidationError::Cardinality {
            field: rel.name.clone(),
            expected: "many".into(),
        }),
        (RelationshipInput::One(None), false) if !rel.optional => {
            Err(ValidationError::MissingRequired {
                kind: kind.to_string(),
                field: rel.name.clone(),
            })
        }
        _ => Ok(()),
    }
}
