//! # Client Context
//!
//! The transport-free half of every client operation.
//!
//! Each operation is split into a `prepare_*` step producing the request to
//! execute and an `absorb_*` / `finish_*` step folding the response into the
//! [`Store`]. [`crate::Client`] and [`crate::AsyncClient`] only differ in how
//! they execute the request in between, so every rule lives here once.
//!
//! Preparation performs all schema and input validation: a request that
//! reaches a transport is well-formed.

use crate::error::{ClientError, QueryBuildError, ValidationError};
use crate::mutation::{MutationBuilder, MutationRequest, NodeData, PeerInput};
use crate::node::{
    FieldValue, NodeProxy, PeerResolver, PendingChange, RelatedMany, RelatedOne, Snapshot,
    to_node_data,
};
use crate::primitives::{
    DEFAULT_BRANCH, DEFAULT_MAX_CONCURRENT_EXECUTION, DEFAULT_PAGINATION_SIZE,
    DEFAULT_RELATIONSHIP_DEPTH, META_FIELDS,
};
use crate::query::{Pagination, QueryBuilder, QueryRequest, RelationshipPageRequest};
use crate::schema::{KindSchema, NodeSchema, SchemaCatalog, SchemaRef, SchemaRegistry};
use crate::store::Store;
use crate::transport::GraphQlRequest;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Defaults applied to requests that leave them unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub default_branch: String,
    /// Page size of lazy sequences.
    pub pagination_size: usize,
    pub default_depth: usize,
    /// Upper bound on operations a batch runs at once.
    pub max_concurrent_execution: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_branch: DEFAULT_BRANCH.to_string(),
            pagination_size: DEFAULT_PAGINATION_SIZE,
            default_depth: DEFAULT_RELATIONSHIP_DEPTH,
            max_concurrent_execution: DEFAULT_MAX_CONCURRENT_EXECUTION,
        }
    }
}

// =============================================================================
// PREPARED REQUESTS
// =============================================================================

/// A read query plus what is needed to absorb its response.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    request: GraphQlRequest,
    kind: String,
    branch: String,
}

impl PreparedQuery {
    pub fn request(&self) -> &GraphQlRequest {
        &self.request
    }

    /// Root field of the response `data` object.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }
}

/// Nodes of one response page plus the server-side total.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub nodes: Vec<Arc<NodeProxy>>,
    pub count: usize,
}

/// What a successful mutation response updates.
#[derive(Debug, Clone)]
enum Target {
    /// A proxy being saved; the sent changes are cleared on success.
    Proxy {
        proxy: Arc<NodeProxy>,
        sent: BTreeMap<String, PendingChange>,
    },
    Node,
    Deleted {
        id: String,
    },
    Relationship {
        id: String,
        name: String,
    },
}

/// A write plus what is needed to absorb its response.
#[derive(Debug, Clone)]
pub struct PreparedMutation {
    mutation: MutationRequest,
    schema: Arc<NodeSchema>,
    branch: String,
    target: Target,
}

impl PreparedMutation {
    pub fn request(&self) -> &GraphQlRequest {
        &self.mutation.request
    }

    pub fn mutation(&self) -> &MutationRequest {
        &self.mutation
    }
}

/// Outcome of HFID resolution for an upsert.
#[derive(Debug, Clone)]
pub enum UpsertPlan {
    /// One stored node matched: update it.
    Resolved(String),
    /// The store knows no match; ask the server.
    Lookup {
        hfid: Vec<String>,
        query: PreparedQuery,
    },
}

/// Next step of a cardinality-one relationship resolution.
#[derive(Debug, Clone)]
pub enum RelatedStep {
    Ready(Option<Arc<NodeProxy>>),
    Fetch(PreparedQuery),
}

// =============================================================================
// GET REQUEST
// =============================================================================

/// Single-node lookup. At least one criterion is required.
#[derive(Debug, Clone, PartialEq)]
pub struct GetRequest {
    query: QueryRequest,
    id: Option<String>,
    raise_when_missing: bool,
}

impl GetRequest {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            query: QueryRequest::new(kind),
            id: None,
            raise_when_missing: true,
        }
    }

    /// Match by id. A value that is not a UUID is matched against the
    /// kind's `default_filter` instead, when the kind declares one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn hfid(self, hfid: Vec<String>) -> Self {
        self.filter("hfid", hfid)
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query = self.query.filter(key, value);
        self
    }

    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.query = self.query.include(path);
        self
    }

    pub fn exclude(mut self, path: impl Into<String>) -> Self {
        self.query = self.query.exclude(path);
        self
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.query = self.query.depth(depth);
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.query = self.query.branch(branch);
        self
    }

    pub fn at(mut self, at: impl Into<String>) -> Self {
        self.query = self.query.at(at);
        self
    }

    /// Return `None` instead of [`ClientError::NotFound`] on no match.
    pub fn allow_missing(mut self) -> Self {
        self.raise_when_missing = false;
        self
    }

    pub fn kind(&self) -> &str {
        &self.query.kind
    }

    fn criteria(&self) -> String {
        self.id
            .iter()
            .map(|id| format!("id={id}"))
            .chain(
                self.query
                    .filters
                    .iter()
                    .map(|(key, value)| format!("{key}={value}")),
            )
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// =============================================================================
// CURSORS
// =============================================================================

/// Position in a paginated node sequence. One fetch per page boundary.
#[derive(Debug, Clone)]
pub struct PageCursor {
    request: QueryRequest,
    window: Pagination,
    page: usize,
    /// An explicit caller window is fetched once, never extended.
    single: bool,
    done: bool,
    first: Option<PreparedQuery>,
}

impl PageCursor {
    /// Query for the next page, `None` once the sequence is exhausted.
    pub fn next_query(&mut self, ctx: &Context) -> Result<Option<PreparedQuery>, ClientError> {
        if self.done {
            return Ok(None);
        }
        if let Some(first) = self.first.take() {
            return Ok(Some(first));
        }
        let request = self
            .request
            .clone()
            .paginate(self.window.offset, self.window.limit);
        ctx.prepare_query(&request, page_tracker(&self.request.kind, self.page))
            .map(Some)
    }

    pub fn absorb(
        &mut self,
        ctx: &Context,
        prepared: &PreparedQuery,
        data: &Value,
    ) -> Result<Vec<Arc<NodeProxy>>, ClientError> {
        let page = ctx.absorb_query(prepared, data)?;
        let seen = self.window.offset.saturating_add(page.nodes.len());
        if self.single || page.nodes.is_empty() || seen >= page.count {
            self.done = true;
        } else {
            self.window = self.window.next();
            self.page += 1;
        }
        Ok(page.nodes)
    }

    /// Stop after a failure; the sequence yields nothing more.
    pub fn stop(&mut self) {
        self.done = true;
        self.first = None;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Position in the peers of one cardinality-many relationship.
///
/// Peers already loaded on the owner are yielded first without a fetch when
/// every one of them is in the store.
#[derive(Debug, Clone)]
pub struct RelatedCursor {
    owner: Arc<NodeProxy>,
    owner_id: String,
    relationship: String,
    peer_kind: String,
    buffer: VecDeque<Arc<NodeProxy>>,
    window: Pagination,
    page: usize,
    done: bool,
}

impl RelatedCursor {
    /// Next buffered peer, if any.
    pub fn pop(&mut self) -> Option<Arc<NodeProxy>> {
        self.buffer.pop_front()
    }

    pub fn next_query(&self, ctx: &Context) -> Result<Option<PreparedQuery>, ClientError> {
        if self.done {
            return Ok(None);
        }
        let branch = self.owner.branch().to_string();
        let request = RelationshipPageRequest {
            kind: self.owner.kind().to_string(),
            id: self.owner_id.clone(),
            relationship: self.relationship.clone(),
            pagination: self.window,
            depth: ctx.config.default_depth.max(1),
            branch: branch.clone(),
            at: None,
        };
        let registry = ctx.registry(&branch)?;
        let tracker = format!(
            "query-{}-{}-page{}",
            request.kind.to_lowercase(),
            request.relationship,
            self.page
        );
        let graphql = QueryBuilder::new(&registry)
            .build_relationship_page(&request)?
            .with_tracker(tracker);
        Ok(Some(PreparedQuery {
            request: graphql,
            kind: request.kind,
            branch,
        }))
    }

    pub fn absorb(
        &mut self,
        ctx: &Context,
        prepared: &PreparedQuery,
        data: &Value,
    ) -> Result<(), ClientError> {
        let registry = ctx.registry(&prepared.branch)?;
        let connection = data
            .get(&prepared.kind)
            .and_then(|root| root.get("edges"))
            .and_then(Value::as_array)
            .and_then(|edges| edges.first())
            .and_then(|edge| edge.get("node"))
            .and_then(|node| node.get(&self.relationship))
            .ok_or_else(|| {
                ClientError::invalid(format!(
                    "{} {} page has no {} connection",
                    prepared.kind, self.owner_id, self.relationship
                ))
            })?;
        let edges = connection
            .get("edges")
            .and_then(Value::as_array)
            .ok_or_else(|| ClientError::invalid("relationship without edges"))?;
        let count = connection
            .get("count")
            .and_then(Value::as_u64)
            .map_or(edges.len(), |c| c as usize);

        for node in edges.iter().filter_map(|edge| edge.get("node")) {
            let peer = ctx.absorb_node(&registry, &prepared.branch, &self.peer_kind, node)?;
            self.buffer.push_back(peer);
        }

        let seen = self.window.offset.saturating_add(edges.len());
        if edges.is_empty() || seen >= count {
            self.done = true;
        } else {
            self.window = self.window.next();
            self.page += 1;
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.done = true;
        self.buffer.clear();
    }

    /// Nothing buffered and nothing left to fetch.
    pub fn is_exhausted(&self) -> bool {
        self.done && self.buffer.is_empty()
    }

    pub fn owner(&self) -> &Arc<NodeProxy> {
        &self.owner
    }

    pub fn relationship(&self) -> &str {
        &self.relationship
    }
}

fn page_tracker(kind: &str, page: usize) -> String {
    format!("query-{}-page{page}", kind.to_lowercase())
}

fn kind_tracker(kind: &str, operation: &str) -> String {
    format!("query-{}-{operation}", kind.to_lowercase())
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Per-client state: configuration, per-branch schemas and the node store.
#[derive(Debug, Default)]
pub struct Context {
    config: ClientConfig,
    schemas: SchemaCatalog,
    store: Store,
}

impl Context {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            schemas: SchemaCatalog::new(),
            store: Store::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn schemas(&self) -> &SchemaCatalog {
        &self.schemas
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Install `registry` for `branch` (the default branch when `None`).
    pub fn install_schema(&self, branch: Option<&str>, registry: SchemaRegistry) -> Arc<SchemaRegistry> {
        self.schemas.install(self.branch(branch), registry)
    }

    /// `branch`, or the configured default.
    pub fn branch(&self, branch: Option<&str>) -> String {
        branch.unwrap_or(&self.config.default_branch).to_string()
    }

    pub fn registry(&self, branch: &str) -> Result<Arc<SchemaRegistry>, ClientError> {
        Ok(self.schemas.registry(branch)?)
    }

    /// Concrete schema for a write. Generics cannot be instantiated.
    pub fn node_schema(&self, kind: &str, branch: &str) -> Result<Arc<NodeSchema>, ClientError> {
        match self.registry(branch)?.lookup(kind)? {
            SchemaRef::Node(schema) => Ok(schema),
            SchemaRef::Generic(_) => Err(ValidationError::GenericNotInstantiable(kind.to_string()).into()),
        }
    }

    /// Caller-written GraphQL on the default branch. Variables, tracker and
    /// branch are set with the [`GraphQlRequest`] builders.
    pub fn graphql(&self, query: impl Into<String>) -> GraphQlRequest {
        GraphQlRequest::new(query, &self.config.default_branch)
    }

    /// Request skeleton carrying the configured defaults.
    pub fn query(&self, kind: impl Into<String>) -> QueryRequest {
        QueryRequest::new(kind)
            .branch(&self.config.default_branch)
            .depth(self.config.default_depth)
    }

    fn resolve(&self, request: &QueryRequest) -> QueryRequest {
        let mut request = request.clone();
        request
            .branch
            .get_or_insert_with(|| self.config.default_branch.clone());
        request.depth.get_or_insert(self.config.default_depth);
        request
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Validate and build a read query. Fails before any transport call.
    pub fn prepare_query(
        &self,
        request: &QueryRequest,
        tracker: impl Into<String>,
    ) -> Result<PreparedQuery, ClientError> {
        let request = self.resolve(request);
        let branch = request.effective_branch().to_string();
        let registry = self.registry(&branch)?;
        let graphql = QueryBuilder::new(&registry)
            .build(&request)?
            .with_tracker(tracker);
        Ok(PreparedQuery {
            request: graphql,
            kind: request.kind,
            branch,
        })
    }

    /// Fold a `{ Kind { count edges { node } } }` response into the store.
    pub fn absorb_query(&self, prepared: &PreparedQuery, data: &Value) -> Result<QueryPage, ClientError> {
        let registry = self.registry(&prepared.branch)?;
        let connection = data.get(&prepared.kind).ok_or_else(|| {
            ClientError::invalid(format!("response has no {} field", prepared.kind))
        })?;
        let edges = connection
            .get("edges")
            .and_then(Value::as_array)
            .ok_or_else(|| ClientError::invalid(format!("{} without edges", prepared.kind)))?;

        let mut nodes = Vec::with_capacity(edges.len());
        for edge in edges {
            let node = edge
                .get("node")
                .ok_or_else(|| ClientError::invalid(format!("{} edge without node", prepared.kind)))?;
            nodes.push(self.absorb_node(&registry, &prepared.branch, &prepared.kind, node)?);
        }
        let count = connection
            .get("count")
            .and_then(Value::as_u64)
            .map_or(nodes.len(), |c| c as usize);

        tracing::debug!(kind = %prepared.kind, branch = %prepared.branch, nodes = nodes.len(), count, "Absorbed page");
        Ok(QueryPage { nodes, count })
    }

    /// Store one node object, and first every embedded peer that carries
    /// attribute data. The concrete schema comes from `__typename`.
    fn absorb_node(
        &self,
        registry: &SchemaRegistry,
        branch: &str,
        default_kind: &str,
        node: &Value,
    ) -> Result<Arc<NodeProxy>, ClientError> {
        let kind = node
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or(default_kind);
        let schema = match registry.lookup(kind)? {
            SchemaRef::Node(schema) => schema,
            SchemaRef::Generic(_) => {
                return Err(ClientError::invalid(format!(
                    "{kind} node without a concrete __typename"
                )));
            }
        };

        for rel in &schema.relationships {
            let Some(raw) = node.get(&rel.name) else {
                continue;
            };
            for peer in embedded_nodes(raw, rel.is_many()) {
                if carries_data(peer) {
                    self.absorb_node(registry, branch, &rel.peer, peer)?;
                }
            }
        }

        let snapshot = Snapshot::from_graphql(&schema, node, self.store.next_revision())?;
        Ok(self.store.get_or_create(&schema, branch, snapshot))
    }

    /// Start a lazy sequence. The first page query is built now, so an
    /// invalid request fails here.
    pub fn cursor(&self, request: QueryRequest) -> Result<PageCursor, ClientError> {
        let (window, single) = match request.pagination {
            Some(window) => (window, true),
            None => (Pagination::new(0, self.config.pagination_size), false),
        };
        let first_request = request.clone().paginate(window.offset, window.limit);
        let first = self.prepare_query(&first_request, page_tracker(&request.kind, 1))?;
        Ok(PageCursor {
            request,
            window,
            page: 1,
            single,
            done: false,
            first: Some(first),
        })
    }

    pub fn prepare_get(&self, get: &GetRequest) -> Result<PreparedQuery, ClientError> {
        let mut request = self.resolve(&get.query);
        if let Some(id) = &get.id {
            let (key, value) = self.id_filter(&request.kind, request.effective_branch(), id)?;
            request = request.filter(key, value);
        }
        if request.filters.is_empty() {
            return Err(QueryBuildError::MissingFilter(get.query.kind.clone()).into());
        }
        // Two nodes are enough to tell "one" from "many"; the count is exact
        let request = request.paginate(0, 2);
        self.prepare_query(&request, kind_tracker(&get.query.kind, "get"))
    }

    /// `ids` for a UUID; otherwise the concrete kind's `default_filter`,
    /// falling back to `ids` when it has none.
    fn id_filter(&self, kind: &str, branch: &str, id: &str) -> Result<(String, Value), ClientError> {
        if Uuid::parse_str(id).is_err() {
            if let SchemaRef::Node(schema) = self.registry(branch)?.lookup(kind)? {
                if let Some(filter) = &schema.default_filter {
                    return Ok((filter.clone(), Value::String(id.to_string())));
                }
            }
        }
        Ok(("ids".to_string(), Value::Array(vec![Value::String(id.to_string())])))
    }

    pub fn finish_get(
        &self,
        get: &GetRequest,
        prepared: &PreparedQuery,
        data: &Value,
    ) -> Result<Option<Arc<NodeProxy>>, ClientError> {
        let page = self.absorb_query(prepared, data)?;
        match page.nodes.len() {
            0 if get.raise_when_missing => Err(ClientError::NotFound {
                kind: get.query.kind.clone(),
                branch: prepared.branch.clone(),
                criteria: get.criteria(),
            }),
            0 => Ok(None),
            1 if page.count <= 1 => Ok(page.nodes.into_iter().next()),
            found => Err(ClientError::TooManyResults {
                kind: get.query.kind.clone(),
                count: page.count.max(found),
            }),
        }
    }

    /// Re-read a saved node by id at the default depth.
    pub fn refresh_request(&self, proxy: &NodeProxy) -> Result<GetRequest, ClientError> {
        let id = require_id(proxy, "refresh")?;
        Ok(GetRequest::new(proxy.kind())
            .filter("ids", vec![id])
            .branch(proxy.branch()))
    }

    // =========================================================================
    // RELATIONSHIPS
    // =========================================================================

    /// Resolve a cardinality-one relationship one step at a time.
    ///
    /// `attempt` counts fetches already executed: an unloaded relationship
    /// refetches the owner once, an uncached peer is fetched once.
    pub fn related_one_step(
        &self,
        owner: &NodeProxy,
        name: &str,
        attempt: usize,
    ) -> Result<RelatedStep, ClientError> {
        match owner.relationship_one(name)? {
            RelatedOne::Loaded(None) => Ok(RelatedStep::Ready(None)),
            RelatedOne::Loaded(Some(peer)) => {
                if let Some(node) = self.store.get_by_id(&peer.id, owner.branch()) {
                    return Ok(RelatedStep::Ready(Some(node)));
                }
                if attempt >= 2 {
                    return Err(ClientError::invalid(format!(
                        "peer {} of {}.{name} was not returned",
                        peer.id,
                        owner.kind()
                    )));
                }
                let request = QueryRequest::new(&peer.kind)
                    .filter("ids", vec![peer.id.clone()])
                    .branch(owner.branch());
                self.prepare_query(&request, kind_tracker(&peer.kind, "get"))
                    .map(RelatedStep::Fetch)
            }
            RelatedOne::Unloaded => {
                if attempt >= 1 {
                    return Err(ClientError::invalid(format!(
                        "{}.{name} was not returned",
                        owner.kind()
                    )));
                }
                let id = require_id(owner, "related_one")?;
                let request = QueryRequest::new(owner.kind())
                    .filter("ids", vec![id])
                    .include(name)
                    .branch(owner.branch());
                self.prepare_query(&request, kind_tracker(owner.kind(), "get"))
                    .map(RelatedStep::Fetch)
            }
        }
    }

    pub fn related_cursor(&self, owner: &Arc<NodeProxy>, name: &str) -> Result<RelatedCursor, ClientError> {
        let state = owner.relationship_many(name)?;
        let owner_id = require_id(owner, "related_many")?;
        let peer_kind = owner
            .schema()
            .relationships
            .iter()
            .find(|rel| rel.name == name)
            .map(|rel| rel.peer.clone())
            .ok_or_else(|| ValidationError::UnknownField {
                kind: owner.kind().to_string(),
                field: name.to_string(),
            })?;

        let cached: Option<Vec<Arc<NodeProxy>>> = state
            .peers()
            .iter()
            .map(|peer| self.store.get_by_id(&peer.id, owner.branch()))
            .collect();
        let (buffer, offset, done) = match (&state, cached) {
            (RelatedMany::Unloaded, _) | (_, None) => (VecDeque::new(), 0, false),
            (RelatedMany::FullyLoaded(_), Some(nodes)) => (VecDeque::from(nodes), 0, true),
            (RelatedMany::PartiallyLoaded { .. }, Some(nodes)) => {
                let offset = nodes.len();
                (VecDeque::from(nodes), offset, false)
            }
        };

        Ok(RelatedCursor {
            owner: Arc::clone(owner),
            owner_id,
            relationship: name.to_string(),
            peer_kind,
            buffer,
            window: Pagination::new(offset, self.config.pagination_size),
            page: 1,
            done,
        })
    }

    /// Record `peers` as the complete content of `owner.name`.
    pub fn materialize(&self, owner: &NodeProxy, name: &str, peers: &[Arc<NodeProxy>]) {
        let refs = peers.iter().filter_map(|peer| peer.peer_ref()).collect();
        owner.replace_field(
            name,
            FieldValue::Many(RelatedMany::FullyLoaded(refs)),
            self.store.next_revision(),
        );
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Unsaved proxy for `kind`, validated against the schema.
    pub fn new_node(&self, kind: &str, data: NodeData, branch: Option<&str>) -> Result<Arc<NodeProxy>, ClientError> {
        let branch = self.branch(branch);
        let schema = self.node_schema(kind, &branch)?;
        Ok(Arc::new(NodeProxy::new_pending(schema, branch, data)?))
    }

    /// `create` for an unsaved proxy, `update` of its pending changes
    /// otherwise. `None` when a saved proxy has nothing to send.
    pub fn prepare_save(&self, proxy: &Arc<NodeProxy>) -> Result<Option<PreparedMutation>, ClientError> {
        let sent = proxy.pending_changes();
        let data = to_node_data(&sent);
        let builder = MutationBuilder::new(proxy.schema());
        let mutation = match proxy.id() {
            None => builder.build_create(&data, proxy.branch())?,
            Some(_) if sent.is_empty() => return Ok(None),
            Some(id) => builder.build_update(&id, &data, proxy.branch())?,
        };
        Ok(Some(PreparedMutation {
            mutation,
            schema: Arc::clone(proxy.schema()),
            branch: proxy.branch().to_string(),
            target: Target::Proxy {
                proxy: Arc::clone(proxy),
                sent,
            },
        }))
    }

    pub fn prepare_update(
        &self,
        kind: &str,
        id: &str,
        data: &NodeData,
        branch: Option<&str>,
    ) -> Result<PreparedMutation, ClientError> {
        let branch = self.branch(branch);
        let schema = self.node_schema(kind, &branch)?;
        let mutation = MutationBuilder::new(&schema).build_update(id, data, &branch)?;
        Ok(PreparedMutation {
            mutation,
            schema,
            branch,
            target: Target::Node,
        })
    }

    pub fn prepare_delete(&self, kind: &str, id: &str, branch: Option<&str>) -> Result<PreparedMutation, ClientError> {
        let branch = self.branch(branch);
        let schema = self.node_schema(kind, &branch)?;
        let mutation = MutationBuilder::new(&schema).build_delete(id, &branch)?;
        Ok(PreparedMutation {
            mutation,
            schema,
            branch,
            target: Target::Deleted { id: id.to_string() },
        })
    }

    pub fn prepare_relationship_add(
        &self,
        node: &NodeProxy,
        relationship: &str,
        peers: &[PeerInput],
    ) -> Result<PreparedMutation, ClientError> {
        self.relationship_change(node, relationship, peers, true)
    }

    pub fn prepare_relationship_remove(
        &self,
        node: &NodeProxy,
        relationship: &str,
        peers: &[PeerInput],
    ) -> Result<PreparedMutation, ClientError> {
        self.relationship_change(node, relationship, peers, false)
    }

    fn relationship_change(
        &self,
        node: &NodeProxy,
        relationship: &str,
        peers: &[PeerInput],
        add: bool,
    ) -> Result<PreparedMutation, ClientError> {
        let id = require_id(node, if add { "relationship_add" } else { "relationship_remove" })?;
        let builder = MutationBuilder::new(node.schema());
        let mutation = if add {
            builder.build_relationship_add(&id, relationship, peers, node.branch())?
        } else {
            builder.build_relationship_remove(&id, relationship, peers, node.branch())?
        };
        Ok(PreparedMutation {
            mutation,
            schema: Arc::clone(node.schema()),
            branch: node.branch().to_string(),
            target: Target::Relationship {
                id,
                name: relationship.to_string(),
            },
        })
    }

    /// Resolve the HFID of `data` for an upsert: the store first, then the
    /// server. Input is validated before anything else.
    pub fn plan_upsert(&self, kind: &str, data: &NodeData, branch: Option<&str>) -> Result<UpsertPlan, ClientError> {
        let branch = self.branch(branch);
        let schema = self.node_schema(kind, &branch)?;
        let pending = NodeProxy::new_pending(Arc::clone(&schema), &branch, data.clone())?;
        let hfid = pending.compute_hfid_with(self)?;

        let cached: Vec<String> = self
            .store
            .find_by_hfid(&schema.kind, &branch, &hfid)
            .iter()
            .filter_map(|node| node.id())
            .collect();
        match cached.as_slice() {
            [] => {}
            [id] => return Ok(UpsertPlan::Resolved(id.clone())),
            _ => {
                return Err(ClientError::Conflict {
                    kind: schema.kind.clone(),
                    hfid,
                    candidates: cached.len(),
                });
            }
        }

        let request = QueryRequest::new(&schema.kind)
            .filter("hfid", hfid.clone())
            .paginate(0, 2)
            .branch(&branch);
        let query = self.prepare_query(&request, kind_tracker(&schema.kind, "upsert"))?;
        Ok(UpsertPlan::Lookup { hfid, query })
    }

    /// Id of the single node the server matched, if any.
    pub fn resolve_upsert(
        &self,
        query: &PreparedQuery,
        hfid: Vec<String>,
        data: &Value,
    ) -> Result<Option<String>, ClientError> {
        let page = self.absorb_query(query, data)?;
        match page.nodes.len() {
            0 => Ok(None),
            1 if page.count <= 1 => Ok(page.nodes.first().and_then(|node| node.id())),
            found => Err(ClientError::Conflict {
                kind: query.kind.clone(),
                hfid,
                candidates: page.count.max(found),
            }),
        }
    }

    pub fn prepare_upsert(
        &self,
        kind: &str,
        existing: Option<&str>,
        data: &NodeData,
        branch: Option<&str>,
    ) -> Result<PreparedMutation, ClientError> {
        let branch = self.branch(branch);
        let schema = self.node_schema(kind, &branch)?;
        let mutation = MutationBuilder::new(&schema).build_upsert(existing, data, &branch)?;
        Ok(PreparedMutation {
            mutation,
            schema,
            branch,
            target: Target::Node,
        })
    }

    /// Apply a successful mutation response. Nothing changes locally unless
    /// the server reported `ok: true`.
    pub fn absorb_mutation(
        &self,
        prepared: PreparedMutation,
        data: &Value,
    ) -> Result<Option<Arc<NodeProxy>>, ClientError> {
        let field = &prepared.mutation.field;
        let result = data
            .get(field)
            .ok_or_else(|| ClientError::invalid(format!("response has no {field} field")))?;
        if result.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(ClientError::invalid(format!("{field} did not report ok")));
        }
        tracing::info!(
            operation = %prepared.mutation.operation,
            kind = %prepared.mutation.kind,
            branch = %prepared.branch,
            "Mutation applied"
        );

        match prepared.target {
            Target::Deleted { id } => {
                self.store
                    .invalidate(&prepared.schema.kind, &id, &prepared.branch);
                Ok(None)
            }
            Target::Relationship { id, name } => {
                // The loaded peer list is stale; the next read refetches it
                let node = self.store.get(&prepared.schema.kind, &id, &prepared.branch);
                if let Some(node) = &node {
                    node.replace_field(
                        &name,
                        FieldValue::Many(RelatedMany::Unloaded),
                        self.store.next_revision(),
                    );
                }
                Ok(node)
            }
            Target::Proxy { proxy, sent } => {
                let snapshot = self.mutation_snapshot(&prepared.schema, field, result)?;
                proxy.apply_snapshot(snapshot.clone());
                proxy.clear_sent(&sent);
                let canonical = self.store.insert(Arc::clone(&proxy));
                if !Arc::ptr_eq(&canonical, &proxy) {
                    canonical.apply_snapshot(snapshot);
                }
                Ok(Some(canonical))
            }
            Target::Node => {
                let snapshot = self.mutation_snapshot(&prepared.schema, field, result)?;
                Ok(Some(
                    self.store
                        .get_or_create(&prepared.schema, &prepared.branch, snapshot),
                ))
            }
        }
    }

    fn mutation_snapshot(
        &self,
        schema: &NodeSchema,
        field: &str,
        result: &Value,
    ) -> Result<Snapshot, ClientError> {
        let object = result
            .get("object")
            .filter(|object| !object.is_null())
            .ok_or_else(|| ClientError::invalid(format!("{field} returned no object")))?;
        Snapshot::from_graphql(schema, object, self.store.next_revision())
    }
}

/// Peers from the store; HFID paths from the branch registry, generics
/// included.
impl PeerResolver for Context {
    fn node_by_id(&self, id: &str, branch: &str) -> Option<Arc<NodeProxy>> {
        self.store.get_by_id(id, branch)
    }

    fn hfid_paths(&self, kind: &str, branch: &str) -> Option<Vec<String>> {
        let registry = self.schemas.registry(branch).ok()?;
        let schema = registry.lookup(kind).ok()?;
        Some(schema.human_friendly_id().to_vec())
    }
}

fn require_id(node: &NodeProxy, operation: &str) -> Result<String, ValidationError> {
    node.id().ok_or_else(|| ValidationError::MissingId {
        kind: node.kind().to_string(),
        operation: operation.to_string(),
    })
}

/// Peer `node` objects of a relationship value.
fn embedded_nodes(raw: &Value, many: bool) -> Vec<&Value> {
    if many {
        raw.get("edges")
            .and_then(Value::as_array)
            .map(|edges| edges.iter().filter_map(|edge| edge.get("node")).collect())
            .unwrap_or_default()
    } else {
        raw.get("node")
            .filter(|node| !node.is_null())
            .into_iter()
            .collect()
    }
}

/// True when a peer object holds more than meta fields.
fn carries_data(node: &Value) -> bool {
    node.as_object()
        .is_some_and(|object| object.keys().any(|key| !META_FIELDS.contains(&key.as_str())))
}
