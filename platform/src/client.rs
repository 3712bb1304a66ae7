use std::fmt::{Debug, Formatter};

use async_trait::async_trait;
use hashbrown::HashMap;
use thiserror::Error;

use common::Shared;

use crate::export::{ImageExportParams, TableExportParams, TaskId};
use crate::graph::{ExprGraph, GraphError, Node, NodeId};
use crate::value::Value;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Platform rejected the request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Malformed platform reply: {0}")]
    MalformedReply(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Handle to the remote imagery platform. Constructed once at process entry
/// and passed to every component that needs remote access; components never
/// initialize their own.
///
/// `evaluate` materializes one node of an expression graph into a local
/// `Value`. `export_*` submit asynchronous jobs and return immediately with
/// the platform task id; no polling or completion tracking happens here.
#[async_trait]
pub trait PlatformClient: Debug + Send + Sync {
    async fn asset_exists(&self, path: &str) -> ClientResult<bool>;

    async fn evaluate(&self, graph: &ExprGraph, root: NodeId) -> ClientResult<Value>;

    async fn export_image(
        &self,
        graph: &ExprGraph,
        root: NodeId,
        params: &ImageExportParams,
    ) -> ClientResult<TaskId>;

    async fn export_table(
        &self,
        graph: &ExprGraph,
        root: NodeId,
        params: &TableExportParams,
    ) -> ClientResult<TaskId>;

    async fn create_collection(&self, path: &str) -> ClientResult<()>;
}

pub type Handler = dyn Fn(&ExprGraph, &Node) -> ClientResult<Value> + Send + Sync + 'static;

/// In-process client backed by per-operator lambdas. Evaluation dispatches
/// on the root node's operator name; export submissions are recorded instead
/// of leaving the process. This is the client every test drives.
#[derive(Default)]
pub struct LambdaClient {
    handlers: HashMap<String, Box<Handler>>,
    existing_assets: Vec<String>,
    submissions: Shared<Vec<Submission>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    Image { description: String },
    Table { description: String },
    Collection { path: String },
}

impl LambdaClient {
    pub fn add_handler<F>(&mut self, op: &str, handler: F)
    where
        F: Fn(&ExprGraph, &Node) -> ClientResult<Value> + Send + Sync + 'static,
    {
        if self
            .handlers
            .insert(op.to_string(), Box::new(handler))
            .is_some()
        {
            panic!("Handler for operator {} already exists", op);
        }
    }

    /// Register an asset path the probe will report as present.
    pub fn add_asset(&mut self, path: &str) {
        self.existing_assets.push(path.to_string());
    }

    pub async fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().await.clone()
    }
}

#[async_trait]
impl PlatformClient for LambdaClient {
    async fn asset_exists(&self, path: &str) -> ClientResult<bool> {
        Ok(self.existing_assets.iter().any(|asset| asset == path))
    }

    async fn evaluate(&self, graph: &ExprGraph, root: NodeId) -> ClientResult<Value> {
        let node = graph
            .by_id(root)
            .ok_or_else(|| ClientError::MalformedReply("evaluation root not in graph".into()))?;
        let handler = self
            .handlers
            .get(&node.op)
            .unwrap_or_else(|| panic!("Missing handler for operator {}", node.op));
        handler(graph, node)
    }

    async fn export_image(
        &self,
        _graph: &ExprGraph,
        _root: NodeId,
        params: &ImageExportParams,
    ) -> ClientResult<TaskId> {
        self.submissions.lock().await.push(Submission::Image {
            description: params.description.clone(),
        });
        Ok(TaskId::unique())
    }

    async fn export_table(
        &self,
        _graph: &ExprGraph,
        _root: NodeId,
        params: &TableExportParams,
    ) -> ClientResult<TaskId> {
        self.submissions.lock().await.push(Submission::Table {
            description: params.description.clone(),
        });
        Ok(TaskId::unique())
    }

    async fn create_collection(&self, path: &str) -> ClientResult<()> {
        self.submissions.lock().await.push(Submission::Collection {
            path: path.to_string(),
        });
        Ok(())
    }
}

impl Debug for LambdaClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LambdaClient")
            .field("handlers", &self.handlers.len())
            .field("existing_assets", &self.existing_assets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lambda_client_dispatches_on_operator() -> anyhow::Result<()> {
        let mut client = LambdaClient::default();
        client.add_handler("Table.aggregateDistinct", |_, _| {
            Ok([Value::Int(3), Value::Int(1)].into_iter().collect())
        });

        let mut graph = ExprGraph::new();
        let table = graph.invoke("Table.load", [("asset", "users/a/pts".into())]);
        let distinct = graph.invoke(
            "Table.aggregateDistinct",
            [("table", table.into()), ("property", "LANDCOVER".into())],
        );

        let labels = client.evaluate(&graph, distinct).await?;
        assert_eq!(labels.as_list().len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn asset_probe_reports_registered_assets() -> anyhow::Result<()> {
        let mut client = LambdaClient::default();
        client.add_asset("projects/x/composite");

        assert!(client.asset_exists("projects/x/composite").await?);
        assert!(!client.asset_exists("projects/x/missing").await?);

        Ok(())
    }

    #[tokio::test]
    async fn exports_are_recorded_not_sent() -> anyhow::Result<()> {
        let client = LambdaClient::default();
        let mut graph = ExprGraph::new();
        let image = graph.invoke("Image.load", [("asset", "users/a/img".into())]);

        let params = ImageExportParams::to_asset("Primitive1", "users/a/prims/Primitive1");
        client.export_image(&graph, image, &params).await?;

        assert_eq!(
            client.submissions().await,
            vec![Submission::Image {
                description: "Primitive1".to_string()
            }]
        );

        Ok(())
    }

    #[tokio::test]
    #[should_panic(expected = "Missing handler")]
    async fn unregistered_operator_panics() {
        let client = LambdaClient::default();
        let mut graph = ExprGraph::new();
        let node = graph.invoke("Model.explain", [("model", Value::Null.into())]);
        let _ = client.evaluate(&graph, node).await;
    }
}
