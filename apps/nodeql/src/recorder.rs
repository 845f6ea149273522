//! # Request Recorder
//!
//! Decorates a transport and writes every request/response pair to disk, one
//! JSON file per operation. Useful for building fixtures from a live server.
//!
//! Files are named after the request tracker; untracked requests fall back
//! to a hash of the query text and variables. A failed write is logged and
//! never reaches the caller.

use nodeql_core::{AsyncTransport, GraphQlRequest, TransportError};
use serde_json::{Value, json};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct RecordingTransport<T> {
    inner: T,
    directory: PathBuf,
}

impl<T> RecordingTransport<T> {
    pub fn new(inner: T, directory: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            directory: directory.into(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File a request is recorded to.
    pub fn path_for(&self, request: &GraphQlRequest) -> PathBuf {
        let name = match &request.tracker {
            Some(tracker) => sanitize(tracker),
            None => {
                let mut hasher = DefaultHasher::new();
                request.query.hash(&mut hasher);
                Value::Object(request.variables.clone()).to_string().hash(&mut hasher);
                format!("{:016x}", hasher.finish())
            }
        };
        self.directory.join(format!("{name}.json"))
    }

    fn record(&self, request: &GraphQlRequest, outcome: &Result<Value, TransportError>) {
        let path = self.path_for(request);
        let response = match outcome {
            Ok(data) => json!({"data": data}),
            Err(err) => json!({"error": err.to_string()}),
        };
        let entry = json!({
            "branch": request.branch,
            "at": request.at,
            "tracker": request.tracker,
            "request": request,
            "response": response,
        });

        let written = std::fs::create_dir_all(&self.directory).and_then(|()| {
            let body = serde_json::to_vec_pretty(&entry).map_err(std::io::Error::other)?;
            std::fs::write(&path, body)
        });
        match written {
            Ok(()) => debug!(path = %path.display(), "Recorded GraphQL operation"),
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to record GraphQL operation"),
        }
    }
}

impl<T: AsyncTransport + Sync> AsyncTransport for RecordingTransport<T> {
    async fn execute(&self, request: &GraphQlRequest) -> Result<Value, TransportError> {
        let outcome = self.inner.execute(request).await;
        self.record(request, &outcome);
        outcome
    }
}

/// Keep tracker names usable as file names.
fn sanitize(tracker: &str) -> String {
    tracker
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use nodeql_core::ScriptedTransport;

    #[test]
    fn tracker_names_the_file() {
        let recorder = RecordingTransport::new(ScriptedTransport::new(), "/tmp/rec");
        let request = GraphQlRequest::new("query { x }", "main").with_tracker("query-infrasite-page1");
        assert_eq!(
            recorder.path_for(&request),
            PathBuf::from("/tmp/rec/query-infrasite-page1.json")
        );
        let odd = GraphQlRequest::new("query { x }", "main").with_tracker("a/b c");
        assert_eq!(recorder.path_for(&odd), PathBuf::from("/tmp/rec/a_b_c.json"));
    }

    #[test]
    fn untracked_requests_hash_query_and_variables() {
        let recorder = RecordingTransport::new(ScriptedTransport::new(), "/tmp/rec");
        let a = GraphQlRequest::new("query { x }", "main");
        let b = GraphQlRequest::new("query { x }", "main").with_variable("v", 1);
        assert_eq!(recorder.path_for(&a), recorder.path_for(&a.clone()));
        assert_ne!(recorder.path_for(&a), recorder.path_for(&b));
    }
}
