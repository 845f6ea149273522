//! # Blocking Client
//!
//! Executes [`Context`] operations over a [`Transport`]. Every method is
//! prepare, execute, absorb; validation failures never reach the transport.

use crate::context::{
    ClientConfig, Context, GetRequest, PageCursor, PreparedMutation, RelatedCursor, RelatedStep,
    UpsertPlan,
};
use crate::diff::{NodeDiff, diff_request, parse_diff_tree};
use crate::error::ClientError;
use crate::mutation::{NodeData, PeerInput};
use crate::node::NodeProxy;
use crate::query::QueryRequest;
use crate::schema::SchemaRegistry;
use crate::store::Store;
use crate::transport::{GraphQlRequest, Transport};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// Blocking client over one transport.
#[derive(Debug)]
pub struct Client<T: Transport> {
    transport: T,
    ctx: Context,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            ctx: Context::new(config),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn store(&self) -> &Store {
        self.ctx.store()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Parse and install a schema document for `branch`.
    pub fn load_schema(&self, branch: Option<&str>, raw: &str) -> Result<Arc<SchemaRegistry>, ClientError> {
        let registry = SchemaRegistry::from_json(raw)?;
        Ok(self.ctx.install_schema(branch, registry))
    }

    /// Query skeleton with the configured defaults.
    pub fn query(&self, kind: impl Into<String>) -> QueryRequest {
        self.ctx.query(kind)
    }

    /// Caller-written GraphQL on the default branch.
    pub fn graphql(&self, query: impl Into<String>) -> GraphQlRequest {
        self.ctx.graphql(query)
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get(&self, request: &GetRequest) -> Result<Option<Arc<NodeProxy>>, ClientError> {
        let prepared = self.ctx.prepare_get(request)?;
        let data = self.execute(prepared.request())?;
        self.ctx.finish_get(request, &prepared, &data)
    }

    /// Lazy sequence over every match, one fetch per page. An explicit
    /// `request.pagination` window is fetched alone.
    pub fn filter(&self, request: QueryRequest) -> Result<Nodes<'_, T>, ClientError> {
        Ok(Nodes {
            client: self,
            cursor: self.ctx.cursor(request)?,
            buffer: VecDeque::new(),
        })
    }

    /// Every match, collected.
    pub fn get_many(&self, request: QueryRequest) -> Result<Vec<Arc<NodeProxy>>, ClientError> {
        self.filter(request)?.collect()
    }

    pub fn all(&self, kind: &str, branch: Option<&str>) -> Result<Nodes<'_, T>, ClientError> {
        self.filter(QueryRequest::new(kind).branch(self.ctx.branch(branch)))
    }

    /// Re-read `node` from the server; the store entry takes the result.
    pub fn refresh(&self, node: &NodeProxy) -> Result<Arc<NodeProxy>, ClientError> {
        let request = self.ctx.refresh_request(node)?;
        self.get(&request)?
            .ok_or_else(|| ClientError::invalid(format!("{} vanished during refresh", node.kind())))
    }

    // =========================================================================
    // RELATIONSHIPS
    // =========================================================================

    /// Peer of a cardinality-one relationship, fetched when not loaded.
    pub fn related_one(&self, node: &NodeProxy, name: &str) -> Result<Option<Arc<NodeProxy>>, ClientError> {
        let mut attempt = 0;
        loop {
            match self.ctx.related_one_step(node, name, attempt)? {
                RelatedStep::Ready(peer) => return Ok(peer),
                RelatedStep::Fetch(query) => {
                    let data = self.execute(query.request())?;
                    self.ctx.absorb_query(&query, &data)?;
                    attempt += 1;
                }
            }
        }
    }

    /// Lazy, restartable sequence over the peers of a cardinality-many
    /// relationship. Nothing is cached on `node`.
    pub fn related_many(&self, node: &Arc<NodeProxy>, name: &str) -> Result<Related<'_, T>, ClientError> {
        Ok(Related {
            client: self,
            cursor: self.ctx.related_cursor(node, name)?,
        })
    }

    /// Load every peer and record the list on `node` as fully loaded.
    pub fn materialize_many(&self, node: &Arc<NodeProxy>, name: &str) -> Result<Vec<Arc<NodeProxy>>, ClientError> {
        let peers = self
            .related_many(node, name)?
            .collect::<Result<Vec<_>, _>>()?;
        self.ctx.materialize(node, name, &peers);
        Ok(peers)
    }

    pub fn add_relationships(&self, node: &NodeProxy, name: &str, peers: &[PeerInput]) -> Result<(), ClientError> {
        let prepared = self.ctx.prepare_relationship_add(node, name, peers)?;
        self.mutate(prepared).map(drop)
    }

    pub fn remove_relationships(&self, node: &NodeProxy, name: &str, peers: &[PeerInput]) -> Result<(), ClientError> {
        let prepared = self.ctx.prepare_relationship_remove(node, name, peers)?;
        self.mutate(prepared).map(drop)
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Unsaved node; call [`save`](Self::save) to create it.
    pub fn new_node(&self, kind: &str, data: NodeData, branch: Option<&str>) -> Result<Arc<NodeProxy>, ClientError> {
        self.ctx.new_node(kind, data, branch)
    }

    pub fn create(&self, kind: &str, data: NodeData, branch: Option<&str>) -> Result<Arc<NodeProxy>, ClientError> {
        let node = self.ctx.new_node(kind, data, branch)?;
        self.save(&node)
    }

    /// Create or update `node` from its pending changes. A saved node
    /// without changes is returned as is.
    pub fn save(&self, node: &Arc<NodeProxy>) -> Result<Arc<NodeProxy>, ClientError> {
        match self.ctx.prepare_save(node)? {
            Some(prepared) => self.written(prepared),
            None => Ok(Arc::clone(node)),
        }
    }

    pub fn update(&self, kind: &str, id: &str, data: &NodeData, branch: Option<&str>) -> Result<Arc<NodeProxy>, ClientError> {
        let prepared = self.ctx.prepare_update(kind, id, data, branch)?;
        self.written(prepared)
    }

    /// Update the node matching the HFID of `data`, or create it.
    pub fn upsert(&self, kind: &str, data: &NodeData, branch: Option<&str>) -> Result<Arc<NodeProxy>, ClientError> {
        let existing = match self.ctx.plan_upsert(kind, data, branch)? {
            UpsertPlan::Resolved(id) => Some(id),
            UpsertPlan::Lookup { hfid, query } => {
                let response = self.execute(query.request())?;
                self.ctx.resolve_upsert(&query, hfid, &response)?
            }
        };
        let prepared = self.ctx.prepare_upsert(kind, existing.as_deref(), data, branch)?;
        self.written(prepared)
    }

    pub fn delete(&self, kind: &str, id: &str, branch: Option<&str>) -> Result<(), ClientError> {
        let prepared = self.ctx.prepare_delete(kind, id, branch)?;
        self.mutate(prepared).map(drop)
    }

    /// Change counts of `branch` against its origin.
    pub fn diff_summary(&self, branch: Option<&str>) -> Result<Vec<NodeDiff>, ClientError> {
        let branch = self.ctx.branch(branch);
        let data = self.execute(&diff_request(&branch))?;
        parse_diff_tree(&data, &branch)
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Send `request` unchanged; the response `data` is returned undecoded.
    pub fn execute_graphql(&self, request: &GraphQlRequest) -> Result<Value, ClientError> {
        self.execute(request)
    }

    fn written(&self, prepared: PreparedMutation) -> Result<Arc<NodeProxy>, ClientError> {
        let field = prepared.mutation().field.clone();
        self.mutate(prepared)?
            .ok_or_else(|| ClientError::invalid(format!("{field} returned no node")))
    }

    fn mutate(&self, prepared: PreparedMutation) -> Result<Option<Arc<NodeProxy>>, ClientError> {
        let data = self.execute(prepared.request())?;
        self.ctx.absorb_mutation(prepared, &data)
    }

    fn execute(&self, request: &GraphQlRequest) -> Result<Value, ClientError> {
        tracing::debug!(branch = %request.branch, tracker = ?request.tracker, "Executing request");
        Ok(self.transport.execute(request)?)
    }
}

// =============================================================================
// SEQUENCES
// =============================================================================

/// Lazy node sequence returned by [`Client::filter`]. Stops after the
/// first error.
#[derive(Debug)]
pub struct Nodes<'c, T: Transport> {
    client: &'c Client<T>,
    cursor: PageCursor,
    buffer: VecDeque<Arc<NodeProxy>>,
}

impl<T: Transport> Iterator for Nodes<'_, T> {
    type Item = Result<Arc<NodeProxy>, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node) = self.buffer.pop_front() {
                return Some(Ok(node));
            }
            let ctx = &self.client.ctx;
            let fetched = match self.cursor.next_query(ctx) {
                Ok(Some(query)) => self
                    .client
                    .execute(query.request())
                    .and_then(|data| self.cursor.absorb(ctx, &query, &data)),
                Ok(None) => return None,
                Err(e) => Err(e),
            };
            match fetched {
                Ok(nodes) => self.buffer.extend(nodes),
                Err(e) => {
                    self.cursor.stop();
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Lazy peer sequence returned by [`Client::related_many`].
#[derive(Debug)]
pub struct Related<'c, T: Transport> {
    client: &'c Client<T>,
    cursor: RelatedCursor,
}

impl<T: Transport> Iterator for Related<'_, T> {
    type Item = Result<Arc<NodeProxy>, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(peer) = self.cursor.pop() {
                return Some(Ok(peer));
            }
            let ctx = &self.client.ctx;
            let fetched = match self.cursor.next_query(ctx) {
                Ok(Some(query)) => self
                    .client
                    .execute(query.request())
                    .and_then(|data| self.cursor.absorb(ctx, &query, &data)),
                Ok(None) => return None,
                Err(e) => Err(e),
            };
            if let Err(e) = fetched {
                self.cursor.stop();
                return Some(Err(e));
            }
        }
    }
}
