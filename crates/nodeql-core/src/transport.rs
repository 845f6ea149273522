//! # Transport Seam
//!
//! The core never talks to the network. Callers hand it something that can
//! execute a [`GraphQlRequest`] and return the `data` member of the response.
//!
//! - [`Transport`]: blocking execution, used by [`crate::Client`]
//! - [`AsyncTransport`]: cooperative execution, used by [`crate::AsyncClient`]
//!
//! Implementations own retry policy; the core never retries.

use crate::error::TransportError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;

#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedTransport;

// =============================================================================
// REQUEST
// =============================================================================

/// A built GraphQL operation plus routing metadata.
///
/// Serializes to the wire body `{"query": ..., "variables": ...}`; the
/// routing fields are for the transport only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    #[serde(skip)]
    pub branch: String,
    #[serde(skip)]
    pub at: Option<String>,
    /// Free-form label identifying the operation in server logs.
    #[serde(skip)]
    pub tracker: Option<String>,
}

impl GraphQlRequest {
    pub fn new(query: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Map::new(),
            branch: branch.into(),
            at: None,
            tracker: None,
        }
    }

    pub fn with_at(mut self, at: Option<String>) -> Self {
        self.at = at;
        self
    }

    pub fn with_tracker(mut self, tracker: impl Into<String>) -> Self {
        self.tracker = Some(tracker.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// Blocking transport.
pub trait Transport {
    /// Execute `request` and return the response `data` object.
    fn execute(&self, request: &GraphQlRequest) -> Result<Value, TransportError>;
}

/// Cooperative transport. The returned future is the only suspension point
/// of every client operation.
pub trait AsyncTransport {
    fn execute(
        &self,
        request: &GraphQlRequest,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn execute(&self, request: &GraphQlRequest) -> Result<Value, TransportError> {
        (**self).execute(request)
    }
}

// =============================================================================
// SCRIPTED TRANSPORT
// =============================================================================

/// Test double, compiled for this crate's tests and behind the `testing`
/// feature for downstream ones.
#[cfg(any(test, feature = "testing"))]
mod scripted {
    use super::{AsyncTransport, GraphQlRequest, Transport};
    use crate::error::TransportError;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// In-memory transport replaying queued responses and recording every call.
    ///
    /// Implements both traits, so the same script drives either client. Running
    /// out of responses is reported as a decode error.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<Value, TransportError>>>,
        calls: Mutex<Vec<GraphQlRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a successful `data` payload.
        pub fn push(&self, data: Value) -> &Self {
            self.lock_responses().push_back(Ok(data));
            self
        }

        /// Queue a failure.
        pub fn push_error(&self, error: TransportError) -> &Self {
            self.lock_responses().push_back(Err(error));
            self
        }

        /// Requests executed so far, oldest first.
        pub fn calls(&self) -> Vec<GraphQlRequest> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        fn lock_responses(&self) -> MutexGuard<'_, VecDeque<Result<Value, TransportError>>> {
            self.responses.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn next(&self, request: &GraphQlRequest) -> Result<Value, TransportError> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
            self.lock_responses()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Decode("no scripted response left".into())))
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(&self, request: &GraphQlRequest) -> Result<Value, TransportError> {
            self.next(request)
        }
    }

    impl AsyncTransport for ScriptedTransport {
        fn execute(
            &self,
            request: &GraphQlRequest,
        ) -> impl Future<Output = Result<Value, TransportError>> + Send {
            let result = self.next(request);
            async move { result }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_body_omits_routing_fields() {
        let request = GraphQlRequest::new("query { x }", "main")
            .with_tracker("query-x-page1")
            .with_at(Some("2024-01-01T00:00:00Z".into()));
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body, json!({"query": "query { x }"}));

        let with_vars = request.with_variable("branch_name", "feature");
        let body = serde_json::to_value(&with_vars).unwrap();
        assert_eq!(body["variables"]["branch_name"], "feature");
    }

    #[test]
    fn scripted_transport_replays_and_records() {
        let transport = ScriptedTransport::new();
        transport.push(json!({"a": 1})).push_error(TransportError::Timeout("slow".into()));

        let request = GraphQlRequest::new("query { a }", "main");
        assert_eq!(Transport::execute(&transport, &request).unwrap(), json!({"a": 1}));
        assert!(matches!(
            Transport::execute(&transport, &request),
            Err(TransportError::Timeout(_))
        ));
        assert!(matches!(
            Transport::execute(&transport, &request),
            Err(TransportError::Decode(_))
        ));
        assert_eq!(transport.call_count(), 3);
    }
}
