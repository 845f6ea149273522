//! # nodeql-core
//!
//! Schema-driven GraphQL client core.
//!
//! A server publishes the schema of its node kinds; this crate turns that
//! schema into query and mutation text, decodes responses into generic node
//! proxies, and keeps one canonical proxy per remote node.
//!
//! ## Layers
//!
//! - `schema`: registry, inheritance flattening, relationship pairing
//! - `query` / `mutation`: deterministic GraphQL construction and validation
//! - `node` / `store`: runtime node proxies and the identity store
//! - `context`: transport-free prepare/absorb steps of every operation
//! - `client` / `async_client`: blocking and cooperative front-ends
//! - `batch`: bounded interleaving of independent cooperative calls
//!
//! ## Architectural Constraints
//!
//! - No network code: transports are supplied by the caller
//! - No runtime: the cooperative client only awaits its transport, and
//!   batches interleave on the caller's task
//! - Schema and query-build errors are raised before any transport call
//! - Query text is a pure function of schema and request

// =============================================================================
// MODULES
// =============================================================================

pub mod async_client;
pub mod batch;
pub mod client;
pub mod context;
pub mod diff;
pub mod error;
pub mod mutation;
pub mod node;
pub mod primitives;
pub mod query;
pub mod schema;
pub mod store;
pub mod transport;

// =============================================================================
// RE-EXPORTS: Schema
// =============================================================================

pub use schema::{
    AttributeKind, AttributeSchema, BranchMode, Cardinality, FieldPattern, GenericSchema,
    KindSchema, NodeSchema, RelationshipDirection, RelationshipKind, RelationshipSchema,
    SchemaCatalog, SchemaDocument, SchemaRef, SchemaRegistry,
};

// =============================================================================
// RE-EXPORTS: Builders
// =============================================================================

pub use mutation::{
    MutationBuilder, MutationOperation, MutationRequest, NodeData, PeerInput, RelationshipInput,
};
pub use query::{Pagination, QueryBuilder, QueryRequest, RelationshipPageRequest};

// =============================================================================
// RE-EXPORTS: Runtime
// =============================================================================

pub use async_client::{AsyncClient, NodeStream, RelatedStream};
pub use batch::Batch;
pub use client::{Client, Nodes, Related};
pub use context::{ClientConfig, Context, GetRequest};
pub use diff::{ElementType, NodeDiff, NodeDiffElement, NodeDiffPeer, NodeDiffSummary};
pub use error::{ClientError, QueryBuildError, SchemaError, TransportError, ValidationError};
pub use node::{
    FieldValue, NodeProxy, PeerRef, PendingChange, RelatedMany, RelatedOne, Scalar, Snapshot,
};
pub use store::{Store, StoreKey};
pub use transport::{AsyncTransport, GraphQlRequest, Transport};

#[cfg(any(test, feature = "testing"))]
pub use transport::ScriptedTransport;
