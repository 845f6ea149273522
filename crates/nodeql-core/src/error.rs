//! # Error Types
//!
//! One enum per concern, plus the umbrella [`ClientError`] returned by the
//! client front-ends.
//!
//! - Schema and query-build errors are raised before any transport call
//! - Transport errors are passed through unchanged; the core never retries
//! - The core never panics; every failure is a recoverable `Result`

use thiserror::Error;

// =============================================================================
// SCHEMA ERRORS
// =============================================================================

/// Structural problems found while building or querying a schema registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The raw document could not be decoded.
    #[error("Invalid schema document: {0}")]
    InvalidDocument(String),

    /// A record carries neither a kind nor a name.
    #[error("Schema record without a kind")]
    MissingKind,

    /// The same kind is declared more than once.
    #[error("Kind declared more than once: {0}")]
    DuplicateKind(String),

    /// `inherit_from` edges form a cycle.
    #[error("Inheritance cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// `inherit_from` names a kind that is not a declared generic.
    #[error("{kind} inherits from undeclared generic {generic}")]
    UnknownGeneric { kind: String, generic: String },

    /// A generic appears twice in one `inherit_from` list.
    #[error("{kind} inherits from {generic} more than once")]
    DuplicateInheritance { kind: String, generic: String },

    /// Two definitions of one field name disagree on kind or cardinality.
    #[error("Conflicting definitions for field {field} on {kind}")]
    DuplicateField { kind: String, field: String },

    /// A relationship points at a kind the document does not declare.
    #[error("Relationship {kind}.{relationship} points at unknown peer {peer}")]
    UnknownPeer {
        kind: String,
        relationship: String,
        peer: String,
    },

    /// The peer side shares the identifier but does not pair back.
    #[error(
        "Relationship {kind}.{relationship} is not paired symmetrically with {peer} (identifier {identifier})"
    )]
    AsymmetricRelationship {
        kind: String,
        relationship: String,
        peer: String,
        identifier: String,
    },

    /// The requested kind is not part of the registry.
    #[error("Schema not found: {0}")]
    NotFound(String),

    /// No registry has been installed for the branch.
    #[error("No schema loaded for branch {0}")]
    BranchNotLoaded(String),
}

// =============================================================================
// VALIDATION ERRORS
// =============================================================================

/// Write-time violations detected client-side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The field does not exist on the kind.
    #[error("{kind} has no field named {field}")]
    UnknownField { kind: String, field: String },

    /// The field is read-only.
    #[error("{kind}.{field} is read-only")]
    ReadOnly { kind: String, field: String },

    /// A required field is missing or null.
    #[error("{kind}.{field} is required")]
    MissingRequired { kind: String, field: String },

    /// The JSON value does not match the attribute kind.
    #[error("{field} expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// Dropdown or enum value outside the allowed set.
    #[error("{value} is not a valid choice for {field} (allowed: {})", .allowed.join(", "))]
    InvalidChoice {
        field: String,
        value: String,
        allowed: Vec<String>,
    },

    /// String longer than `max_length`.
    #[error("{field} is {length} characters long, maximum is {max}")]
    TooLong {
        field: String,
        length: usize,
        max: usize,
    },

    /// String shorter than `min_length`.
    #[error("{field} is {length} characters long, minimum is {min}")]
    TooShort {
        field: String,
        length: usize,
        min: usize,
    },

    /// String does not match the attribute regex.
    #[error("{field} does not match {pattern}")]
    PatternMismatch { field: String, pattern: String },

    /// The attribute regex itself does not compile.
    #[error("{field} has an invalid pattern {pattern}")]
    InvalidPattern { field: String, pattern: String },

    /// Relationship input shape does not match its cardinality.
    #[error("{field} is a cardinality {expected} relationship")]
    Cardinality { field: String, expected: String },

    /// The operation needs a server id and none is known.
    #[error("{operation} on {kind} requires an id")]
    MissingId { kind: String, operation: String },

    /// Generic kinds describe interfaces and cannot be instantiated.
    #[error("{0} is a generic and cannot be instantiated")]
    GenericNotInstantiable(String),

    /// HFID could not be resolved for the kind.
    #[error("Cannot resolve human friendly id of {kind}: {reason}")]
    Hfid { kind: String, reason: String },
}

// =============================================================================
// QUERY BUILD ERRORS
// =============================================================================

/// Failures while turning a request into GraphQL text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryBuildError {
    /// The kind or a peer kind is missing from the registry.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A requested or excluded field path does not resolve.
    #[error("Unknown field path {path} on {kind}")]
    UnknownField { kind: String, path: String },

    /// A filter key does not resolve to a known leaf.
    #[error("Unknown filter {filter} on {kind}")]
    UnknownFilter { kind: String, filter: String },

    /// The filter value has the wrong JSON shape.
    #[error("Invalid value for filter {filter}: {reason}")]
    InvalidFilterValue { filter: String, reason: String },

    /// Relationship depth above the supported maximum.
    #[error("Relationship depth {requested} exceeds the maximum of {max}")]
    DepthExceeded { requested: usize, max: usize },

    /// The operation needs a cardinality many relationship.
    #[error("{kind}.{relationship} is not a cardinality many relationship")]
    NotManyRelationship { kind: String, relationship: String },

    /// A single-node lookup was requested without any criteria.
    #[error("At least one filter must be provided to look up {0}")]
    MissingFilter(String),

    /// A page size of zero was requested.
    #[error("Pagination limit must be greater than zero")]
    InvalidPagination,
}

// =============================================================================
// TRANSPORT ERRORS
// =============================================================================

/// Opaque failures reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server could not be reached.
    #[error("Cannot connect to {0}")]
    ConnectionFailed(String),

    /// The server did not answer in time.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// 401/403 from the server.
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Any other non-success HTTP status.
    #[error("Server error ({status}): {body}")]
    Status { status: u16, body: String },

    /// The response carried a GraphQL `errors` array.
    #[error("GraphQL error: {}", .messages.join(" | "))]
    GraphQl { messages: Vec<String> },

    /// The response body could not be decoded.
    #[error("Cannot decode response: {0}")]
    Decode(String),
}

// =============================================================================
// CLIENT ERRORS
// =============================================================================

/// Umbrella error returned by [`crate::Client`] and [`crate::AsyncClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    QueryBuild(#[from] QueryBuildError),

    /// `get` with `raise_when_missing` matched nothing.
    #[error("No {kind} found on branch {branch} matching {criteria}")]
    NotFound {
        kind: String,
        branch: String,
        criteria: String,
    },

    /// HFID resolution matched more than one node.
    #[error("Human friendly id {} of {kind} matches {candidates} nodes", .hfid.join("__"))]
    Conflict {
        kind: String,
        hfid: Vec<String>,
        candidates: usize,
    },

    /// `get` matched more than one node.
    #[error("Expected a single {kind}, the query returned {count}")]
    TooManyResults { kind: String, count: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response does not have the shape the query asked for.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Build an `InvalidResponse` from anything printable.
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }
}
