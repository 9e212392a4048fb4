//! Decoder served by an HTTP model runtime.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Decoder;
use crate::config::DecodingConfig;
use crate::error::{PipelineError, Result};

#[derive(Debug, Serialize)]
struct DecodeRequest<'a> {
    model: &'a str,
    input_ids: &'a [u32],
    num_beams: usize,
    length_penalty: f32,
    max_length: usize,
    early_stopping: bool,
}

#[derive(Debug, Deserialize)]
struct DecodeResponse {
    output_ids: Vec<u32>,
}

/// Sends token ids to `POST {endpoint}/decode` and returns the output ids.
pub struct HttpDecoder {
    client: Client,
    base_url: Url,
    decode_url: Url,
    model_id: String,
}

impl HttpDecoder {
    pub fn new(endpoint: &str, model_id: &str) -> Result<Self> {
        let base_url = Url::parse(endpoint).map_err(|e| invalid_endpoint(endpoint, e))?;
        let decode_url = base_url
            .join("decode")
            .map_err(|e| invalid_endpoint(endpoint, e))?;

        Ok(Self {
            client: Client::new(),
            base_url,
            decode_url,
            model_id: model_id.to_string(),
        })
    }

    /// Build the decoder and wait for the runtime to confirm it serves
    /// `model_id`.
    pub async fn connect(endpoint: &str, model_id: &str) -> Result<Self> {
        let decoder = Self::new(endpoint, model_id)?;
        decoder.check_ready().await?;
        Ok(decoder)
    }

    /// `GET {endpoint}/health?model=<id>` must answer with a success status.
    pub async fn check_ready(&self) -> Result<()> {
        let health_url = self
            .base_url
            .join("health")
            .map_err(|e| invalid_endpoint(self.base_url.as_str(), e))?;

        self.client
            .get(health_url)
            .query(&[("model", self.model_id.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                PipelineError::model_load(format!(
                    "Decoder at {} is not ready for {}: {}",
                    self.base_url, self.model_id, e
                ))
            })?;

        debug!(endpoint = %self.base_url, model = %self.model_id, "Decoder ready");
        Ok(())
    }
}

fn invalid_endpoint(endpoint: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::model_load(format!("Invalid decoder endpoint {}: {}", endpoint, e))
}

#[async_trait]
impl Decoder for HttpDecoder {
    async fn decode(&self, input_ids: &[u32], config: &DecodingConfig) -> Result<Vec<u32>> {
        let request = DecodeRequest {
            model: &self.model_id,
            input_ids,
            num_beams: config.num_beams,
            length_penalty: config.length_penalty,
            max_length: config.max_output_length,
            early_stopping: config.early_stopping,
        };

        let response = self
            .client
            .post(self.decode_url.clone())
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::decode(format!("Decode request failed: {}", e)))?;

        let body: DecodeResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::decode(format!("Invalid decode response: {}", e)))?;

        Ok(body.output_ids)
    }
}
