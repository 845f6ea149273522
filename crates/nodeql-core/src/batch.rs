//! # Batches
//!
//! Independent client operations run together on the caller's task, with
//! at most `limit` in flight at once. Each operation is registered under a
//! caller-chosen key that comes back with its result.
//!
//! - [`Batch::execute`]: the first failure aborts the batch
//! - [`Batch::execute_collect`]: every outcome is returned, failures included
//!
//! Results are yielded in insertion order whatever the completion order.

use crate::error::ClientError;
use futures::future::LocalBoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::fmt;
use std::future::Future;

/// Operations queued for concurrent execution. Nothing runs until
/// [`execute`](Self::execute) or [`execute_collect`](Self::execute_collect)
/// is awaited.
pub struct Batch<'a, K, R> {
    limit: usize,
    tasks: Vec<(K, LocalBoxFuture<'a, Result<R, ClientError>>)>,
}

impl<'a, K, R> Batch<'a, K, R> {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            tasks: Vec::new(),
        }
    }

    /// Queue `task` under `key`.
    pub fn add<F>(&mut self, key: K, task: F) -> &mut Self
    where
        F: Future<Output = Result<R, ClientError>> + 'a,
    {
        self.tasks.push((key, Box::pin(task)));
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task. The first error is returned and the tasks still
    /// pending are dropped unfinished.
    pub async fn execute(self) -> Result<Vec<(K, R)>, ClientError> {
        let Self { limit, tasks } = self;
        tracing::debug!(tasks = tasks.len(), limit, "Executing batch");
        stream::iter(
            tasks
                .into_iter()
                .map(|(key, task)| async move { task.await.map(|value| (key, value)) }),
        )
        .buffered(limit)
        .try_collect()
        .await
    }

    /// Run every task to completion; failures are reported next to their
    /// key instead of stopping the batch.
    pub async fn execute_collect(self) -> Vec<(K, Result<R, ClientError>)> {
        let Self { limit, tasks } = self;
        tracing::debug!(tasks = tasks.len(), limit, "Executing batch, collecting errors");
        let outcomes: Vec<(K, Result<R, ClientError>)> = stream::iter(
            tasks
                .into_iter()
                .map(|(key, task)| async move { (key, task.await) }),
        )
        .buffered(limit)
        .collect()
        .await;
        let failed = outcomes.iter().filter(|(_, outcome)| outcome.is_err()).count();
        if failed > 0 {
            tracing::warn!(failed, total = outcomes.len(), "Batch finished with failures");
        }
        outcomes
    }
}

impl<K: fmt::Debug, R> fmt::Debug for Batch<'_, K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("limit", &self.limit)
            .field("keys", &self.tasks.iter().map(|(key, _)| key).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Task that yields `yields` times before resolving, tracking how many
    /// tasks are running at once.
    async fn tracked(
        running: Rc<Cell<usize>>,
        peak: Rc<Cell<usize>>,
        yields: usize,
        outcome: Result<usize, ClientError>,
    ) -> Result<usize, ClientError> {
        running.set(running.get() + 1);
        peak.set(peak.get().max(running.get()));
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
        running.set(running.get() - 1);
        outcome
    }

    #[tokio::test]
    async fn runs_at_most_limit_tasks_at_once() {
        let running = Rc::new(Cell::new(0));
        let peak = Rc::new(Cell::new(0));
        let mut batch = Batch::new(2);
        for idx in 0..5 {
            batch.add(
                idx,
                tracked(Rc::clone(&running), Rc::clone(&peak), 5 - idx, Ok(idx * 10)),
            );
        }
        assert_eq!(batch.len(), 5);

        let results = batch.execute().await.unwrap();
        assert_eq!(peak.get(), 2);
        // Insertion order, although later tasks finish first
        assert_eq!(results, vec![(0, 0), (1, 10), (2, 20), (3, 30), (4, 40)]);
    }

    #[tokio::test]
    async fn first_failure_aborts() {
        let running = Rc::new(Cell::new(0));
        let peak = Rc::new(Cell::new(0));
        let mut batch = Batch::new(1);
        batch
            .add("a", tracked(Rc::clone(&running), Rc::clone(&peak), 0, Ok(1)))
            .add(
                "b",
                tracked(
                    Rc::clone(&running),
                    Rc::clone(&peak),
                    0,
                    Err(ClientError::invalid("boom")),
                ),
            )
            .add("c", tracked(Rc::clone(&running), Rc::clone(&peak), 0, Ok(3)));

        assert!(matches!(
            batch.execute().await,
            Err(ClientError::InvalidResponse(message)) if message == "boom"
        ));
    }

    #[tokio::test]
    async fn collect_mode_keeps_every_outcome() {
        let running = Rc::new(Cell::new(0));
        let peak = Rc::new(Cell::new(0));
        let mut batch = Batch::new(0);
        assert_eq!(batch.limit(), 1);
        batch
            .add("a", tracked(Rc::clone(&running), Rc::clone(&peak), 1, Ok(1)))
            .add(
                "b",
                tracked(
                    Rc::clone(&running),
                    Rc::clone(&peak),
                    1,
                    Err(ClientError::invalid("boom")),
                ),
            )
            .add("c", tracked(Rc::clone(&running), Rc::clone(&peak), 1, Ok(3)));

        let outcomes = batch.execute_collect().await;
        let keys: Vec<&str> = outcomes.iter().map(|(key, _)| *key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(matches!(outcomes[0].1, Ok(1)));
        assert!(outcomes[1].1.is_err());
        assert!(matches!(outcomes[2].1, Ok(3)));
        assert_eq!(running.get(), 0);
    }
}
