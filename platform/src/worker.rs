use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use crate::client::{ClientResult, PlatformClient};
use crate::graph::{ExprGraph, NodeId};
use crate::value::Value;

/// Bounded fan-out over independent evaluation roots. Per-class training
/// subgraphs share only read access to the input stack and training set, so
/// their materializing calls can run concurrently up to the platform's
/// concurrent-request quota.
#[derive(Clone, Copy, Debug)]
pub struct EvalPool {
    limit: usize,
}

impl Default for EvalPool {
    fn default() -> Self {
        Self { limit: 8 }
    }
}

impl EvalPool {
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "EvalPool limit must be positive");
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Evaluate every root concurrently, at most `limit` in flight, and
    /// return the results in input order.
    pub async fn evaluate_many(
        &self,
        client: &Arc<dyn PlatformClient>,
        graph: &ExprGraph,
        roots: &[NodeId],
    ) -> Vec<ClientResult<Value>> {
        let graph = Arc::new(graph.clone());
        let mut pending: JoinSet<(usize, ClientResult<Value>)> = JoinSet::new();
        let mut results: Vec<Option<ClientResult<Value>>> =
            (0..roots.len()).map(|_| None).collect();

        let mut next = 0usize;
        while next < roots.len() && pending.len() < self.limit {
            spawn_eval(&mut pending, client, &graph, roots[next], next);
            next += 1;
        }

        while let Some(joined) = pending.join_next().await {
            let (index, result) = joined.expect("Evaluation task should not panic");
            results[index] = Some(result);

            if next < roots.len() {
                spawn_eval(&mut pending, client, &graph, roots[next], next);
                next += 1;
            }
        }

        debug!(roots = roots.len(), limit = self.limit, "fan-out complete");

        results
            .into_iter()
            .map(|slot| slot.expect("Every root evaluates exactly once"))
            .collect()
    }
}

fn spawn_eval(
    pending: &mut JoinSet<(usize, ClientResult<Value>)>,
    client: &Arc<dyn PlatformClient>,
    graph: &Arc<ExprGraph>,
    root: NodeId,
    index: usize,
) {
    let client = Arc::clone(client);
    let graph = Arc::clone(graph);
    pending.spawn(async move {
        let result = client.evaluate(&graph, root).await;
        (index, result)
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::client::ClientError;
    use crate::export::{ImageExportParams, TableExportParams, TaskId};

    #[derive(Debug, Default)]
    struct SlowClient {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl PlatformClient for SlowClient {
        async fn asset_exists(&self, _path: &str) -> ClientResult<bool> {
            Ok(true)
        }

        async fn evaluate(&self, graph: &ExprGraph, root: NodeId) -> ClientResult<Value> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let node = graph.by_id(root).unwrap();
            let value = node.args[0].1.as_const().unwrap().clone();
            Ok(value)
        }

        async fn export_image(
            &self,
            _graph: &ExprGraph,
            _root: NodeId,
            _params: &ImageExportParams,
        ) -> ClientResult<TaskId> {
            Ok(TaskId::unique())
        }

        async fn export_table(
            &self,
            _graph: &ExprGraph,
            _root: NodeId,
            _params: &TableExportParams,
        ) -> ClientResult<TaskId> {
            Ok(TaskId::unique())
        }

        async fn create_collection(&self, _path: &str) -> ClientResult<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn results_keep_input_order() {
        let client: Arc<dyn PlatformClient> = Arc::new(SlowClient::default());

        let mut graph = ExprGraph::new();
        let roots: Vec<NodeId> = (0..10)
            .map(|i| graph.invoke("Image.constant", [("value", (i as i64).into())]))
            .collect();

        let results = EvalPool::new(3)
            .evaluate_many(&client, &graph, &roots)
            .await;

        assert_eq!(results.len(), 10);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(*result.as_ref().unwrap(), Value::Int(i as i64));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_flight_never_exceeds_limit() {
        let slow = Arc::new(SlowClient::default());
        let client: Arc<dyn PlatformClient> = slow.clone();

        let mut graph = ExprGraph::new();
        let roots: Vec<NodeId> = (0..20)
            .map(|i| graph.invoke("Image.constant", [("value", (i as i64).into())]))
            .collect();

        EvalPool::new(4).evaluate_many(&client, &graph, &roots).await;

        assert!(slow.max_in_flight.load(Ordering::SeqCst) <= 4);
        assert_eq!(slow.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_roots_returns_empty() {
        let client: Arc<dyn PlatformClient> = Arc::new(SlowClient::default());
        let graph = ExprGraph::new();
        let results = EvalPool::default().evaluate_many(&client, &graph, &[]).await;
        assert!(results.is_empty());
    }

    #[allow(dead_code)]
    fn error_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ClientError>();
    }
}
