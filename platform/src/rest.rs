use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;

use crate::client::{ClientError, ClientResult, PlatformClient};
use crate::export::{ImageExportParams, TableExportParams, TaskId};
use crate::graph::{ExprGraph, NodeId};
use crate::value::Value;

/// REST implementation of [`PlatformClient`]. One instance per process,
/// cloned nowhere; the underlying `reqwest::Client` pools connections.
/// No retries anywhere: remote failures surface to the caller unmodified.
#[derive(Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ComputeReply {
    result: Value,
}

#[derive(Debug, Deserialize)]
struct ExportReply {
    task_id: String,
}

impl RestClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> ClientResult<reqwest::Response> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    fn parse_task_id(reply: ExportReply) -> ClientResult<TaskId> {
        TaskId::from_str(&reply.task_id).map_err(|_| {
            ClientError::MalformedReply(format!("unparseable task id: {}", reply.task_id))
        })
    }
}

#[async_trait]
impl PlatformClient for RestClient {
    async fn asset_exists(&self, path: &str) -> ClientResult<bool> {
        let response = self
            .http
            .get(self.url(&format!("assets/{}", path)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(ClientError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn evaluate(&self, graph: &ExprGraph, root: NodeId) -> ClientResult<Value> {
        let body = serde_json::json!({ "expression": graph.to_wire(root) });
        let reply: ComputeReply = self
            .post("value:compute", body)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::MalformedReply(e.to_string()))?;
        Ok(reply.result)
    }

    async fn export_image(
        &self,
        graph: &ExprGraph,
        root: NodeId,
        params: &ImageExportParams,
    ) -> ClientResult<TaskId> {
        let body = serde_json::json!({
            "expression": graph.to_wire(root),
            "params": params,
        });
        let reply: ExportReply = self
            .post("image:export", body)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::MalformedReply(e.to_string()))?;
        Self::parse_task_id(reply)
    }

    async fn export_table(
        &self,
        graph: &ExprGraph,
        root: NodeId,
        params: &TableExportParams,
    ) -> ClientResult<TaskId> {
        let body = serde_json::json!({
            "expression": graph.to_wire(root),
            "params": params,
        });
        let reply: ExportReply = self
            .post("table:export", body)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::MalformedReply(e.to_string()))?;
        Self::parse_task_id(reply)
    }

    async fn create_collection(&self, path: &str) -> ClientResult<()> {
        self.post("collections", serde_json::json!({ "path": path }))
            .await?;
        Ok(())
    }
}
