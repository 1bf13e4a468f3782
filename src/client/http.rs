//! HTTP implementation of `TaskBackend` over the worker's REST contract.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{CancelReport, TaskBackend};
use crate::config::MonitorConfig;
use crate::error::RemoteError;
use crate::jobs::{RemoteStatus, SubmittedTask};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    tasks: Vec<SubmittedTask>,
}

/// REST client for the remote task service.
pub struct HttpTaskClient {
    base_url: reqwest::Url,
    client: reqwest::Client,
}

impl HttpTaskClient {
    pub fn new(config: &MonitorConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::Transport {
                endpoint: config.api_url.clone(),
                reason: e.to_string(),
            })?;

        let base_url = reqwest::Url::parse(&config.api_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| RemoteError::Transport {
                endpoint: config.api_url.clone(),
                reason: "not a usable base URL".to_string(),
            })?;

        Ok(Self { base_url, client })
    }

    /// Base URL with `segments` appended, each percent-encoded as a single
    /// path segment.
    fn url(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send a request, check the status code, and decode the JSON body.
    async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, RemoteError> {
        let body = self.send(endpoint, request).await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<String, RemoteError> {
        let resp = request.send().await.map_err(|e| RemoteError::Transport {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| RemoteError::Transport {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(RemoteError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl TaskBackend for HttpTaskClient {
    async fn submit(&self, correlation_ids: &[String]) -> Result<Vec<SubmittedTask>, RemoteError> {
        let request = self
            .client
            .post(self.url(&["submit"]))
            .json(&serde_json::json!({ "correlation_ids": correlation_ids }));
        let resp: SubmitResponse = self.send_json("submit", request).await?;
        Ok(resp.tasks)
    }

    async fn batch_status(
        &self,
        task_ids: &[String],
    ) -> Result<HashMap<String, RemoteStatus>, RemoteError> {
        let request = self
            .client
            .get(self.url(&["status"]))
            .query(&[("task_ids", task_ids.join(","))]);
        self.send_json("status", request).await
    }

    async fn task_status(&self, task_id: &str) -> Result<RemoteStatus, RemoteError> {
        let endpoint = format!("status/{task_id}");
        let request = self.client.get(self.url(&["status", task_id]));
        self.send_json(&endpoint, request).await
    }

    async fn cancel(&self, task_id: &str) -> Result<(), RemoteError> {
        let endpoint = format!("task/{task_id}");
        let request = self.client.delete(self.url(&["task", task_id]));
        self.send(&endpoint, request).await.map(|_| ())
    }

    async fn cancel_batch(&self, task_ids: &[String]) -> Result<CancelReport, RemoteError> {
        let request = self
            .client
            .post(self.url(&["cancel"]))
            .query(&[("task_ids", task_ids.join(","))]);
        self.send_json("cancel", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_url: &str) -> HttpTaskClient {
        let config = MonitorConfig {
            api_url: api_url.to_string(),
            ..Default::default()
        };
        HttpTaskClient::new(&config).unwrap()
    }

    #[test]
    fn segments_join_with_or_without_trailing_slash() {
        for base in ["http://localhost:8000/api/tasks", "http://localhost:8000/api/tasks/"] {
            let client = client(base);
            assert_eq!(
                client.url(&["status"]).as_str(),
                "http://localhost:8000/api/tasks/status"
            );
            assert_eq!(
                client.url(&["task", "abc"]).as_str(),
                "http://localhost:8000/api/tasks/task/abc"
            );
        }
    }

    #[test]
    fn task_id_stays_one_segment() {
        let client = client("http://localhost:8000/api/tasks/");
        let url = client.url(&["status", "a/b?c#d"]);
        assert_eq!(url.path(), "/api/tasks/status/a%2Fb%3Fc%23d");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }
}
