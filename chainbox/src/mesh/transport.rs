//! Mesh transport (spec §4.10): pooled signed RPC with retries, honouring
//! the CircuitBreaker and marking the Planner's node health.

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{ChainboxError, ChainboxResult};
use crate::planner::Planner;
use crate::signer::{RequestSigner, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::types::{ExecutionResult, MeshBatchPayload, MeshPayload};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

pub const MAX_RETRIES: u32 = 3;
const RETRY_BASE_MS: u64 = 100;

pub struct MeshTransport {
    client: Client,
    signer: Arc<RequestSigner>,
    circuit_breaker: Arc<CircuitBreaker>,
    planner: Arc<Planner>,
}

impl MeshTransport {
    pub fn new(
        pool_connections: usize,
        signer: Arc<RequestSigner>,
        circuit_breaker: Arc<CircuitBreaker>,
        planner: Arc<Planner>,
    ) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(pool_connections)
            .build()
            .expect("reqwest client builder never fails with these options");
        Self {
            client,
            signer,
            circuit_breaker,
            planner,
        }
    }

    /// `call` per spec §4.10: consult the breaker, POST signed JSON to
    /// `/execute`, retry with exponential backoff, and mark health.
    pub async fn call(
        &self,
        node_id: &str,
        node_url: &str,
        payload: &MeshPayload,
        now_ms_fn: impl Fn() -> i64,
    ) -> ChainboxResult<ExecutionResult> {
        self.dispatch(node_id, node_url, "/execute", payload, now_ms_fn).await
    }

    pub async fn batch_call(
        &self,
        node_id: &str,
        node_url: &str,
        payload: &MeshBatchPayload,
        now_ms_fn: impl Fn() -> i64,
    ) -> ChainboxResult<Vec<ExecutionResult>> {
        #[derive(serde::Deserialize)]
        struct BatchResponse {
            results: Vec<ExecutionResult>,
        }
        let response: BatchResponse = self
            .dispatch(node_id, node_url, "/execute/batch", payload, now_ms_fn)
            .await?;
        Ok(response.results)
    }

    async fn dispatch<P: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        node_id: &str,
        node_url: &str,
        path: &str,
        payload: &P,
        now_ms_fn: impl Fn() -> i64,
    ) -> ChainboxResult<R> {
        if !self.circuit_breaker.is_allowed(node_id, now_ms_fn()) {
            return Err(ChainboxError::CircuitOpen {
                node_id: node_id.to_string(),
            });
        }

        let body = serde_json::to_value(payload)
            .map_err(|e| ChainboxError::Internal(format!("encoding mesh payload: {e}")))?;
        let url = format!("{}{}", node_url.trim_end_matches('/'), path);

        let mut delay = Duration::from_millis(RETRY_BASE_MS);
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 && !self.circuit_breaker.is_allowed(node_id, now_ms_fn()) {
                // circuit opened mid-attempt; skip remaining retries (spec §4.10 step 4)
                return Err(ChainboxError::CircuitOpen {
                    node_id: node_id.to_string(),
                });
            }

            let now_ms = now_ms_fn();
            let mut request = self.client.post(&url).json(&body);
            if let Some((ts, sig)) = self.signer.sign(&body, now_ms) {
                request = request
                    .header(SIGNATURE_HEADER, sig)
                    .header(TIMESTAMP_HEADER, ts.to_string());
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<R>().await {
                        Ok(decoded) => {
                            self.circuit_breaker.record_success(node_id, now_ms);
                            self.planner.mark_healthy(node_id, now_ms);
                            return Ok(decoded);
                        }
                        Err(e) => {
                            last_error = Some(format!("decoding response: {e}"));
                        }
                    }
                }
                Ok(response) => {
                    last_error = Some(format!("http status {}", response.status()));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }

            self.circuit_breaker.record_failure(node_id, now_ms);
            self.planner.mark_unhealthy(node_id, now_ms);

            if attempt < MAX_RETRIES {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(ChainboxError::MeshCallFailed {
            node_url: node_url.to_string(),
            message: last_error.unwrap_or_else(|| "unknown transport error".to_string()),
        })
    }
}
