//! HTTP client for the model function server

use super::{ActionCall, ActionClient, ActionError};
use crate::stream_decoder::ByteStream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Connection settings for the function server
#[derive(Debug, Clone)]
pub struct ActionServerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Calls `POST {base}/call/{function}` and `POST {base}/stream/{function}`
/// with the arguments as a JSON object keyed by parameter name.
pub struct HttpActionClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpActionClient {
    pub fn new(config: &ActionServerConfig) -> Result<Self, ActionError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ActionError::transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, mode: &str, call: &ActionCall) -> RequestBuilder {
        let url = format!("{}/{mode}/{}", self.base_url, call.function);
        let builder = self.client.post(url).json(&Value::Object(call.named_args()));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, mode: &str, call: &ActionCall) -> Result<Response, ActionError> {
        let response = self
            .request(mode, call)
            .send()
            .await
            .map_err(|e| {
                ActionError::transport(format!("request to {} failed: {e}", call.function))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, &body))
    }
}

fn classify_error(status: StatusCode, body: &str) -> ActionError {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if value.is_object() {
            let err = ActionError::from_wire(&value);
            if err.kind == super::ActionErrorKind::Validation {
                return err;
            }
        }
    }

    if status.is_server_error() {
        ActionError::server(format!("HTTP {status}: {body}"))
    } else {
        ActionError::transport(format!("HTTP {status}: {body}"))
    }
}

#[async_trait]
impl ActionClient for HttpActionClient {
    async fn call(&self, call: &ActionCall) -> Result<Value, ActionError> {
        let response = self.send("call", call).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| ActionError::parse(format!("invalid {} response: {e}", call.function)))
    }

    async fn stream(&self, call: &ActionCall) -> Result<ByteStream, ActionError> {
        let response = self.send("stream", call).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| ActionError::transport(format!("stream read failed: {e}")))
            })
            .boxed())
    }
}
