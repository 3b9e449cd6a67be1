use crate::core::{Credential, FetchError, StatusSnapshot};
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait StatusApi: Send + Sync {
    async fn fetch_status(
        &self,
        entity_id: &str,
        credential: &Credential,
    ) -> Result<StatusSnapshot, FetchError>;
}

pub struct HttpStatusApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StatusApi for HttpStatusApi {
    async fn fetch_status(
        &self,
        entity_id: &str,
        credential: &Credential,
    ) -> Result<StatusSnapshot, FetchError> {
        let url = format!("{}/status/{}", self.base_url, entity_id);
        let response = self
            .client
            .get(&url)
            .query(&[("credential", credential.token())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Transport(response.status().as_u16()));
        }

        let body: Value = response.json().await?;
        parse_status_body(body)
    }
}

// A 2xx body can still carry an API-level error; otherwise the snapshot is
// the nested payload object when present, or the whole body.
pub fn parse_status_body(body: Value) -> Result<StatusSnapshot, FetchError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("unspecified API error")
            .to_string();
        return Err(FetchError::Remote(message));
    }

    if let Some(payload) = body.get("payload").and_then(Value::as_object) {
        return Ok(payload.clone());
    }

    match body {
        Value::Object(map) => Ok(map),
        _ => Err(FetchError::Remote("response body is not an object".into())),
    }
}
