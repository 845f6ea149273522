//! # Cooperative Client
//!
//! Same operations as [`crate::Client`] over an [`AsyncTransport`]. The
//! transport future is the only suspension point. Calls queued on a
//! [`Batch`] interleave on the caller's task, bounded by
//! `max_concurrent_execution`. Dropping an in-flight call discards its
//! response, and pages absorbed before that stay in the store.

use crate::batch::Batch;
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
use crate::transport::{AsyncTransport, GraphQlRequest};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug)]
pub struct AsyncClient<T: AsyncTransport> {
    transport: T,
    ctx: Context,
}

impl<T: AsyncTransport> AsyncClient<T> {
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

    pub fn load_schema(&self, branch: Option<&str>, raw: &str) -> Result<Arc<SchemaRegistry>, ClientError> {
        let registry = SchemaRegistry::from_json(raw)?;
        Ok(self.ctx.install_schema(branch, registry))
    }

    pub fn query(&self, kind: impl Into<String>) -> QueryRequest {
        self.ctx.query(kind)
    }

    pub fn graphql(&self, query: impl Into<String>) -> GraphQlRequest {
        self.ctx.graphql(query)
    }

    /// Empty batch bounded by the configured `max_concurrent_execution`.
    pub fn create_batch<K, R>(&self) -> Batch<'_, K, R> {
        Batch::new(self.ctx.config().max_concurrent_execution)
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub async fn get(&self, request: &GetRequest) -> Result<Option<Arc<NodeProxy>>, ClientError> {
        let prepared = self.ctx.prepare_get(request)?;
        let data = self.execute(prepared.request()).await?;
        self.ctx.finish_get(request, &prepared, &data)
    }

    /// Lazy sequence over every match. Building it is synchronous, so an
    /// invalid request fails before anything is awaited.
    pub fn filter(&self, request: QueryRequest) -> Result<NodeStream<'_, T>, ClientError> {
        Ok(NodeStream {
            client: self,
            cursor: self.ctx.cursor(request)?,
            buffer: VecDeque::new(),
        })
    }

    pub async fn get_many(&self, request: QueryRequest) -> Result<Vec<Arc<NodeProxy>>, ClientError> {
        self.filter(request)?.collect().await
    }

    pub fn all(&self, kind: &str, branch: Option<&str>) -> Result<NodeStream<'_, T>, ClientError> {
        self.filter(QueryRequest::new(kind).branch(self.ctx.branch(branch)))
    }

    pub async fn refresh(&self, node: &NodeProxy) -> Result<Arc<NodeProxy>, ClientError> {
        let request = self.ctx.refresh_request(node)?;
        self.get(&request)
            .await?
            .ok_or_else(|| ClientError::invalid(format!("{} vanished during refresh", node.kind())))
    }

    // =========================================================================
    // RELATIONSHIPS
    // =========================================================================

    pub async fn related_one(&self, node: &NodeProxy, name: &str) -> Result<Option<Arc<NodeProxy>>, ClientError> {
        let mut attempt = 0;
        loop {
            match self.ctx.related_one_step(node, name, attempt)? {
                RelatedStep::Ready(peer) => return Ok(peer),
                RelatedStep::Fetch(query) => {
                    let data = self.execute(query.request()).await?;
                    self.ctx.absorb_query(&query, &data)?;
                    attempt += 1;
                }
            }
        }
    }

    pub fn related_many(&self, node: &Arc<NodeProxy>, name: &str) -> Result<RelatedStream<'_, T>, ClientError> {
        Ok(RelatedStream {
            client: self,
            cursor: self.ctx.related_cursor(node, name)?,
        })
    }

    pub async fn materialize_many(&self, node: &Arc<NodeProxy>, name: &str) -> Result<Vec<Arc<NodeProxy>>, ClientError> {
        let peers = self.related_many(node, name)?.collect().await?;
        self.ctx.materialize(node, name, &peers);
        Ok(peers)
    }

    pub async fn add_relationships(&self, node: &NodeProxy, name: &str, peers: &[PeerInput]) -> Result<(), ClientError> {
        let prepared = self.ctx.prepare_relationship_add(node, name, peers)?;
        self.mutate(prepared).await.map(drop)
    }

    pub async fn remove_relationships(&self, node: &NodeProxy, name: &str, peers: &[PeerInput]) -> Result<(), ClientError> {
        let prepared = self.ctx.prepare_relationship_remove(node, name, peers)?;
        self.mutate(prepared).await.map(drop)
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    pub fn new_node(&self, kind: &str, data: NodeData, branch: Option<&str>) -> Result<Arc<NodeProxy>, ClientError> {
        self.ctx.new_node(kind, data, branch)
    }

    pub async fn create(&self, kind: &str, data: NodeData, branch: Option<&str>) -> Result<Arc<NodeProxy>, ClientError> {
        let node = self.ctx.new_node(kind, data, branch)?;
        self.save(&node).await
    }

    pub async fn save(&self, node: &Arc<NodeProxy>) -> Result<Arc<NodeProxy>, ClientError> {
        match self.ctx.prepare_save(node)? {
            Some(prepared) => self.written(prepared).await,
            None => Ok(Arc::clone(node)),
        }
    }

    pub async fn update(&self, kind: &str, id: &str, data: &NodeData, branch: Option<&str>) -> Result<Arc<NodeProxy>, ClientError> {
        let prepared = self.ctx.prepare_update(kind, id, data, branch)?;
        self.written(prepared).await
    }

    pub async fn upsert(&self, kind: &str, data: &NodeData, branch: Option<&str>) -> Result<Arc<NodeProxy>, ClientError> {
        let existing = match self.ctx.plan_upsert(kind, data, branch)? {
            UpsertPlan::Resolved(id) => Some(id),
            UpsertPlan::Lookup { hfid, query } => {
                let response = self.execute(query.request()).await?;
                self.ctx.resolve_upsert(&query, hfid, &response)?
            }
        };
        let prepared = self.ctx.prepare_upsert(kind, existing.as_deref(), data, branch)?;
        self.written(prepared).await
    }

    pub async fn delete(&self, kind: &str, id: &str, branch: Option<&str>) -> Result<(), ClientError> {
        let prepared = self.ctx.prepare_delete(kind, id, branch)?;
        self.mutate(prepared).await.map(drop)
    }

    pub async fn diff_summary(&self, branch: Option<&str>) -> Result<Vec<NodeDiff>, ClientError> {
        let branch = self.ctx.branch(branch);
        let data = self.execute(&diff_request(&branch)).await?;
        parse_diff_tree(&data, &branch)
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Send caller-written GraphQL as is and return the response `data`.
    /// Nothing is decoded into the store.
    pub async fn execute_graphql(&self, request: &GraphQlRequest) -> Result<Value, ClientError> {
        self.execute(request).await
    }

    async fn written(&self, prepared: PreparedMutation) -> Result<Arc<NodeProxy>, ClientError> {
        let field = prepared.mutation().field.clone();
        self.mutate(prepared)
            .await?
            .ok_or_else(|| ClientError::invalid(format!("{field} returned no node")))
    }

    async fn mutate(&self, prepared: PreparedMutation) -> Result<Option<Arc<NodeProxy>>, ClientError> {
        let data = self.execute(prepared.request()).await?;
        self.ctx.absorb_mutation(prepared, &data)
    }

    async fn execute(&self, request: &GraphQlRequest) -> Result<Value, ClientError> {
        tracing::debug!(branch = %request.branch, tracker = ?request.tracker, "Executing request");
        Ok(self.transport.execute(request).await?)
    }
}

// =============================================================================
// STREAMS
// =============================================================================

/// Lazy node sequence returned by [`AsyncClient::filter`].
#[derive(Debug)]
pub struct NodeStream<'c, T: AsyncTransport> {
    client: &'c AsyncClient<T>,
    cursor: PageCursor,
    buffer: VecDeque<Arc<NodeProxy>>,
}

impl<T: AsyncTransport> NodeStream<'_, T> {
    /// Next node, fetching a page at each boundary. `None` when exhausted
    /// or after an error was returned.
    pub async fn next(&mut self) -> Option<Result<Arc<NodeProxy>, ClientError>> {
        loop {
            if let Some(node) = self.buffer.pop_front() {
                return Some(Ok(node));
            }
            let ctx = &self.client.ctx;
            let fetched = match self.cursor.next_query(ctx) {
                Ok(Some(query)) => match self.client.execute(query.request()).await {
                    Ok(data) => self.cursor.absorb(ctx, &query, &data),
                    Err(e) => Err(e),
                },
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

    pub async fn collect(mut self) -> Result<Vec<Arc<NodeProxy>>, ClientError> {
        let mut nodes = Vec::new();
        while let Some(node) = self.next().await {
            nodes.push(node?);
        }
        Ok(nodes)
    }
}

/// Lazy peer sequence returned by [`AsyncClient::related_many`].
#[derive(Debug)]
pub struct RelatedStream<'c, T: AsyncTransport> {
    client: &'c AsyncClient<T>,
    cursor: RelatedCursor,
}

impl<T: AsyncTransport> RelatedStream<'_, T> {
    pub async fn next(&mut self) -> Option<Result<Arc<NodeProxy>, ClientError>> {
        loop {
            if let Some(peer) = self.cursor.pop() {
                return Some(Ok(peer));
            }
            let ctx = &self.client.ctx;
            let fetched = match self.cursor.next_query(ctx) {
                Ok(Some(query)) => match self.client.execute(query.request()).await {
                    Ok(data) => self.cursor.absorb(ctx, &query, &data),
                    Err(e) => Err(e),
                },
                Ok(None) => return None,
                Err(e) => Err(e),
            };
            if let Err(e) = fetched {
                self.cursor.stop();
                return Some(Err(e));
            }
        }
    }

    pub async fn collect(mut self) -> Result<Vec<Arc<NodeProxy>>, ClientError> {
        let mut peers = Vec::new();
        while let Some(peer) = self.next().await {
            peers.push(peer?);
        }
        Ok(peers)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::ScriptedTransport;
    use serde_json::json;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SCHEMA: &str = r#"{
        "generics": [{
            "kind": "CoreGenericRepository",
            "attributes": [
                {"name": "name", "unique": true},
                {"name": "password", "kind": "Password", "optional": true}
            ]
        }],
        "nodes": [{
            "kind": "CoreRepository",
            "inherit_from": ["CoreGenericRepository"],
            "human_friendly_id": ["name__value"],
            "attributes": [{"name": "description", "optional": true}]
        }]
    }"#;

    fn client() -> AsyncClient<ScriptedTransport> {
        let client = AsyncClient::new(ScriptedTransport::new(), ClientConfig::default());
        client.load_schema(None, SCHEMA).unwrap();
        client
    }

    #[tokio::test]
    async fn create_round_trip() {
        let client = client();
        client.transport().push(json!({"CoreRepositoryCreate": {"ok": true, "object": {
            "id": "r1",
            "hfid": ["infra"],
            "display_label": "infra",
            "__typename": "CoreRepository",
            "name": {"value": "infra", "is_default": false},
            "description": {"value": null}
        }}}));

        let data = NodeData::new()
            .attribute("name", "infra")
            .attribute("password", "s3cret");
        let node = client.create("CoreRepository", data, None).await.unwrap();

        let sent = &client.transport().calls()[0].query;
        assert!(sent.contains(r#"password: {value: "s3cret"}"#));
        assert!(!sent.contains("password {"));

        assert_eq!(node.id().as_deref(), Some("r1"));
        assert_eq!(node.attribute("name").unwrap().unwrap().value, json!("infra"));
        assert_eq!(node.hfid(), Some(vec!["infra".to_string()]));
        assert!(!node.is_dirty());
    }

    #[tokio::test]
    async fn upsert_with_stored_hfid_updates() {
        let client = client();
        client.transport().push(json!({"CoreRepository": {"count": 1, "edges": [{"node": {
            "id": "r1", "__typename": "CoreRepository", "name": {"value": "infra"}
        }}]}}));
        client.get_many(QueryRequest::new("CoreRepository")).await.unwrap();

        client.transport().push(json!({"CoreRepositoryUpdate": {"ok": true, "object": {
            "id": "r1", "__typename": "CoreRepository", "name": {"value": "infra"}
        }}}));
        let data = NodeData::new().attribute("name", "infra");
        let node = client.upsert("CoreRepository", &data, None).await.unwrap();

        let calls = client.transport().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].query.contains(r#"CoreRepositoryUpdate(data: {id: "r1""#));
        assert!(Arc::ptr_eq(
            &node,
            &client.store().get("CoreRepository", "r1", "main").unwrap()
        ));
    }

    #[tokio::test]
    async fn upsert_without_match_creates() {
        let client = client();
        client
            .transport()
            .push(json!({"CoreRepository": {"count": 0, "edges": []}}))
            .push(json!({"CoreRepositoryCreate": {"ok": true, "object": {
                "id": "r9", "__typename": "CoreRepository", "name": {"value": "new"}
            }}}));
        let data = NodeData::new().attribute("name", "new");
        let node = client.upsert("CoreRepository", &data, None).await.unwrap();
        assert_eq!(node.id().as_deref(), Some("r9"));
        let calls = client.transport().calls();
        assert_eq!(calls[0].tracker.as_deref(), Some("query-corerepository-upsert"));
        assert!(calls[1].query.contains("CoreRepositoryCreate"));
    }

    #[tokio::test]
    async fn stream_ends_after_error() {
        let client = client();
        client.transport().push(json!({"unexpected": {}}));
        let mut nodes = client.all("CoreRepository", None).unwrap();
        assert!(matches!(nodes.next().await, Some(Err(ClientError::InvalidResponse(_)))));
        assert!(nodes.next().await.is_none());
    }

    fn repository(id: &str) -> Value {
        json!({"CoreRepository": {"count": 1, "edges": [{"node": {
            "id": id, "__typename": "CoreRepository", "name": {"value": id}
        }}]}})
    }

    #[tokio::test]
    async fn raw_graphql_passes_through() {
        let client = client();
        client.transport().push(json!({"InfrahubInfo": {"version": "1.2"}}));
        let request = client
            .graphql("query($v: String) { InfrahubInfo { version } }")
            .with_variable("v", "x")
            .with_tracker("query-info");
        let data = client.execute_graphql(&request).await.unwrap();

        assert_eq!(data["InfrahubInfo"]["version"], "1.2");
        let call = &client.transport().calls()[0];
        assert_eq!(call.branch, "main");
        assert_eq!(call.variables["v"], "x");
        assert_eq!(call.tracker.as_deref(), Some("query-info"));
        assert!(client.store().is_empty());
    }

    /// Echoes the `n` variable back after yielding, counting overlapping calls.
    #[derive(Debug, Default)]
    struct CountingTransport {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl AsyncTransport for CountingTransport {
        fn execute(
            &self,
            request: &GraphQlRequest,
        ) -> impl Future<Output = Result<Value, TransportError>> + Send {
            let n = request.variables.get("n").cloned().unwrap_or(Value::Null);
            async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(json!({"echo": n}))
            }
        }
    }

    #[tokio::test]
    async fn batch_respects_max_concurrent_execution() {
        let config = ClientConfig {
            max_concurrent_execution: 3,
            ..ClientConfig::default()
        };
        let client = AsyncClient::new(CountingTransport::default(), config);
        let requests: Vec<GraphQlRequest> = (0..8)
            .map(|n| client.graphql("query($n: Int) { echo(n: $n) }").with_variable("n", n))
            .collect();

        let mut batch = client.create_batch();
        assert_eq!(batch.limit(), 3);
        for (n, request) in requests.iter().enumerate() {
            batch.add(n, client.execute_graphql(request));
        }
        let results = batch.execute().await.unwrap();

        let peak = client.transport().peak.load(Ordering::SeqCst);
        assert!(peak > 1 && peak <= 3, "peak {peak}");
        for (n, data) in &results {
            assert_eq!(data["echo"], json!(n));
        }
        assert_eq!(results.len(), 8);
    }

    #[tokio::test]
    async fn batch_collect_reports_failures_per_key() {
        let client = client();
        client
            .transport()
            .push(repository("r1"))
            .push_error(TransportError::ConnectionFailed("reset".into()))
            .push(repository("r3"));
        let requests: Vec<(&str, GetRequest)> = ["r1", "r2", "r3"]
            .into_iter()
            .map(|id| (id, GetRequest::new("CoreRepository").id(id)))
            .collect();

        let mut batch = client.create_batch();
        for (id, request) in &requests {
            batch.add(*id, client.get(request));
        }
        let outcomes = batch.execute_collect().await;

        let keys: Vec<&str> = outcomes.iter().map(|(key, _)| *key).collect();
        assert_eq!(keys, vec!["r1", "r2", "r3"]);
        assert_eq!(outcomes[0].1.as_ref().unwrap().as_ref().unwrap().id().as_deref(), Some("r1"));
        assert!(matches!(
            outcomes[1].1,
            Err(ClientError::Transport(TransportError::ConnectionFailed(_)))
        ));
        assert_eq!(outcomes[2].1.as_ref().unwrap().as_ref().unwrap().id().as_deref(), Some("r3"));
        assert!(client.store().get("CoreRepository", "r3", "main").is_some());
    }
}
