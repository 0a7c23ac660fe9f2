use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use permsync_application::{TupleWrite, TupleWriter};
use permsync_core::{AppError, AppResult};
use permsync_domain::TupleKey;

/// Connection settings of the relationship engine HTTP API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTupleWriterConfig {
    /// Base URL, e.g. `http://openfga:8080`.
    pub api_url: String,
    /// Store receiving the tuples.
    pub store_id: String,
    /// Authorization model the tuples are validated against.
    pub authorization_model_id: String,
    /// Optional bearer token.
    pub api_token: Option<String>,
    /// Attempts per write, at least one.
    pub max_attempts: u8,
    /// Base delay between attempts, multiplied by the attempt number.
    pub retry_backoff_ms: u64,
}

/// Writes tuples through the OpenFGA-compatible `write` endpoint.
pub struct HttpTupleWriter {
    http_client: reqwest::Client,
    write_url: String,
    authorization_model_id: String,
    api_token: Option<String>,
    max_attempts: u8,
    retry_backoff_ms: u64,
}

impl HttpTupleWriter {
    /// Creates a writer for one store.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: HttpTupleWriterConfig) -> Self {
        Self {
            http_client,
            write_url: format!(
                "{}/stores/{}/write",
                config.api_url.trim_end_matches('/'),
                config.store_id
            ),
            authorization_model_id: config.authorization_model_id,
            api_token: config.api_token.filter(|token| !token.is_empty()),
            max_attempts: config.max_attempts.max(1),
            retry_backoff_ms: config.retry_backoff_ms.max(50),
        }
    }

    fn payload(&self, request: &TupleWrite) -> Value {
        let mut payload = json!({
            "authorization_model_id": self.authorization_model_id,
        });

        if !request.writes.is_empty() {
            payload["writes"] = json!({
                "tuple_keys": request.writes,
                "on_duplicate": "ignore",
            });
        }

        if !request.deletes.is_empty() {
            let tuple_keys: Vec<Value> = request.deletes.iter().map(delete_key).collect();
            payload["deletes"] = json!({
                "tuple_keys": tuple_keys,
                "on_missing": "ignore",
            });
        }

        payload
    }

    async fn write_with_retry(&self, payload: &Value) -> AppResult<()> {
        let mut attempt = 0_u8;
        let mut last_error: Option<String> = None;

        while attempt < self.max_attempts {
            attempt = attempt.saturating_add(1);

            let mut builder = self.http_client.post(self.write_url.as_str()).json(payload);
            if let Some(token) = &self.api_token {
                builder = builder.bearer_auth(token);
            }

            match builder.send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response)
                    if response.status().is_server_error()
                        || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS =>
                {
                    last_error = Some(format!(
                        "transient HTTP status {} from tuple write",
                        response.status()
                    ));
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<response body unavailable>".to_owned());
                    return Err(AppError::SyncWrite(format!(
                        "tuple write rejected with status {status}: {body}"
                    )));
                }
                Err(error) => {
                    last_error = Some(format!("tuple write transport error: {error}"));
                }
            }

            if attempt < self.max_attempts {
                warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    error = last_error.as_deref().unwrap_or_default(),
                    "retrying tuple write"
                );
                let delay = self.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(AppError::SyncWrite(last_error.unwrap_or_else(|| {
            "tuple write exhausted retries".to_owned()
        })))
    }
}

/// Retractions carry only the tuple identity.
fn delete_key(tuple: &TupleKey) -> Value {
    json!({
        "user": tuple.user,
        "relation": tuple.relation,
        "object": tuple.object,
    })
}

#[async_trait]
impl TupleWriter for HttpTupleWriter {
    async fn write(&self, request: TupleWrite) -> AppResult<()> {
        if request.is_empty() {
            return Ok(());
        }

        let payload = self.payload(&request);
        self.write_with_retry(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use permsync_application::{TupleWrite, TupleWriter};
    use permsync_core::AppError;
    use permsync_domain::{RelationshipCondition, TupleKey};
    use serde_json::json;

    use super::{HttpTupleWriter, HttpTupleWriterConfig};

    fn writer(api_url: &str, max_attempts: u8) -> HttpTupleWriter {
        HttpTupleWriter::new(
            reqwest::Client::new(),
            HttpTupleWriterConfig {
                api_url: api_url.to_owned(),
                store_id: "store-1".to_owned(),
                authorization_model_id: "model-1".to_owned(),
                api_token: Some(String::new()),
                max_attempts,
                retry_backoff_ms: 0,
            },
        )
    }

    #[test]
    fn write_url_is_joined_without_double_slash() {
        let writer = writer("http://openfga:8080/", 0);

        assert_eq!(writer.write_url, "http://openfga:8080/stores/store-1/write");
        assert_eq!(writer.max_attempts, 1);
        assert_eq!(writer.retry_backoff_ms, 50);
        assert!(writer.api_token.is_none());
    }

    #[test]
    fn payload_ignores_duplicates_and_missing_tuples() {
        let writer = writer("http://openfga:8080", 3);
        let mut conditional = TupleKey::new("role:ab12", "read", "dashboard:abc");
        conditional.condition = Some(RelationshipCondition {
            name: "not_expired".to_owned(),
            context: None,
        });

        let payload = writer.payload(&TupleWrite {
            writes: vec![TupleKey::assignee("user:7", "ab12")],
            deletes: vec![conditional],
        });

        assert_eq!(
            payload,
            json!({
                "authorization_model_id": "model-1",
                "writes": {
                    "tuple_keys": [
                        {"user": "user:7", "relation": "assignee", "object": "role:ab12"}
                    ],
                    "on_duplicate": "ignore",
                },
                "deletes": {
                    "tuple_keys": [
                        {"user": "role:ab12", "relation": "read", "object": "dashboard:abc"}
                    ],
                    "on_missing": "ignore",
                },
            })
        );
    }

    #[test]
    fn empty_sections_are_omitted() {
        let writer = writer("http://openfga:8080", 3);
        let payload = writer.payload(&TupleWrite {
            writes: vec![TupleKey::assignee("team:3", "ab12")],
            deletes: Vec::new(),
        });

        assert!(payload.get("writes").is_some());
        assert!(payload.get("deletes").is_none());
    }

    #[tokio::test]
    async fn empty_write_sends_nothing() {
        let writer = writer("http://127.0.0.1:9", 1);
        assert!(writer.write(TupleWrite::default()).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_engine_surfaces_sync_write_error() {
        let writer = writer("http://127.0.0.1:9", 2);
        let result = writer
            .write(TupleWrite {
                writes: vec![TupleKey::assignee("user:7", "ab12")],
                deletes: Vec::new(),
            })
            .await;

        assert!(matches!(result, Err(AppError::SyncWrite(_))));
    }
}
