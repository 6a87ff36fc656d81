//! HTTP client for the Weave trace server.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_TRACE_SERVER: &str = "https://trace.wandb.ai";
const DEFAULT_APP_URL: &str = "https://wandb.ai";

/// Errors from Weave client construction or call logging.
#[derive(Debug, Error)]
pub enum WeaveError {
    #[error("WANDB_API_KEY is not set")]
    MissingApiKey,
    #[error("trace server rejected call: HTTP {0}")]
    Rejected(u16),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// One finished call, ready to submit to the trace server.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub op_name: String,
    pub inputs: serde_json::Value,
    pub output: serde_json::Value,
    pub attributes: serde_json::Value,
}

/// Client bound to a single Weave project.
///
/// Construction reads credentials from the environment:
/// - `WANDB_API_KEY` (required)
/// - `WEAVE_TRACE_SERVER_URL` (default `https://trace.wandb.ai`)
/// - `WANDB_BASE_URL` (default `https://wandb.ai`, used for trace UI links)
pub struct WeaveClient {
    http: reqwest::Client,
    api_key: String,
    trace_server_url: String,
    app_url: String,
    entity: Option<String>,
    project: String,
}

impl WeaveClient {
    /// Build a client for `project` ("entity/project" or bare "project").
    pub fn new(project: &str) -> Result<Self, WeaveError> {
        let api_key = std::env::var("WANDB_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(WeaveError::MissingApiKey)?;

        let trace_server_url = std::env::var("WEAVE_TRACE_SERVER_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_TRACE_SERVER.to_string());
        let app_url = std::env::var("WANDB_BASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_APP_URL.to_string());

        let (entity, project) = match project.split_once('/') {
            Some((entity, name)) => (Some(entity.to_string()), name.to_string()),
            None => (None, project.to_string()),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_key,
            trace_server_url: trace_server_url.trim_end_matches('/').to_string(),
            app_url: app_url.trim_end_matches('/').to_string(),
            entity,
            project,
        })
    }

    /// Submit one call (start + end) and return its UI URL, when one can be
    /// derived. The URL requires an entity-qualified project.
    pub async fn log_call(&self, record: CallRecord) -> Result<Option<String>, WeaveError> {
        let call_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let start_body = json!({
            "start": {
                "project_id": self.project_id(),
                "id": call_id,
                "op_name": record.op_name,
                "started_at": now,
                "attributes": record.attributes,
                "inputs": record.inputs,
            }
        });
        self.post("call/start", &start_body).await?;

        let end_body = json!({
            "end": {
                "project_id": self.project_id(),
                "id": call_id,
                "ended_at": Utc::now().to_rfc3339(),
                "output": record.output,
                "summary": {},
            }
        });
        self.post("call/end", &end_body).await?;

        Ok(self.ui_url(&call_id))
    }

    async fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<(), WeaveError> {
        let resp = self
            .http
            .post(format!("{}/{endpoint}", self.trace_server_url))
            .basic_auth("api", Some(&self.api_key))
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(WeaveError::Rejected(resp.status().as_u16()));
        }
        Ok(())
    }

    fn project_id(&self) -> String {
        match &self.entity {
            Some(entity) => format!("{entity}/{}", self.project),
            None => self.project.clone(),
        }
    }

    fn ui_url(&self, call_id: &str) -> Option<String> {
        self.entity.as_ref().map(|entity| {
            format!(
                "{}/{entity}/{}/weave/calls/{call_id}",
                self.app_url, self.project
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(project: &str) -> WeaveClient {
        WeaveClient {
            http: reqwest::Client::new(),
            api_key: "key".to_string(),
            trace_server_url: DEFAULT_TRACE_SERVER.to_string(),
            app_url: DEFAULT_APP_URL.to_string(),
            entity: project.split_once('/').map(|(e, _)| e.to_string()),
            project: project
                .split_once('/')
                .map(|(_, p)| p)
                .unwrap_or(project)
                .to_string(),
        }
    }

    #[test]
    fn ui_url_requires_entity() {
        assert_eq!(client("app").ui_url("abc"), None);
        assert_eq!(
            client("team/app").ui_url("abc"),
            Some("https://wandb.ai/team/app/weave/calls/abc".to_string())
        );
    }

    #[test]
    fn project_id_formats() {
        assert_eq!(client("app").project_id(), "app");
        assert_eq!(client("team/app").project_id(), "team/app");
    }
}
