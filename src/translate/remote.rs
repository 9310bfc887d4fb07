use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::TranslateConfig;
use crate::error::{Result, VerbaError};
use super::common::{GenerationParams, ModelHandle, ModelLoader, Seq2SeqModel, Seq2SeqTokenizer};

#[derive(Debug, Serialize)]
struct LoadRequest<'a> {
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoadResponse {
    /// Present only for model generations that expose a language id table
    #[serde(default)]
    lang_code_to_id: Option<HashMap<String, u32>>,
}

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    model: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    src_lang: Option<String>,
    max_length: usize,
}

#[derive(Debug, Serialize)]
struct TokenToIdRequest<'a> {
    model: &'a str,
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenToIdResponse {
    id: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    input_ids: &'a [u32],
    #[serde(flatten)]
    params: &'a GenerationParams,
}

#[derive(Debug, Serialize)]
struct DetokenizeRequest<'a> {
    model: &'a str,
    ids: &'a [u32],
    skip_special_tokens: bool,
}

#[derive(Debug, Deserialize)]
struct IdsResponse {
    ids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    text: String,
}

/// Thin JSON client for the local seq2seq model server.
#[derive(Debug, Clone)]
pub struct ModelServerClient {
    client: Client,
    endpoint: String,
}

impl ModelServerClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(VerbaError::Http)?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.endpoint, path);
        debug!("Sending model server request to: {}", url);

        let response = self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| VerbaError::Inference(format!("HTTP request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(VerbaError::Inference(format!(
                "Model server error {} on {}: {}", status, path, error_text
            )));
        }

        response.json().await
            .map_err(|e| VerbaError::Inference(format!("Failed to parse response from {}: {}", path, e)))
    }
}

/// Loads models into the model server and hands out handles bound to them.
pub struct RemoteModelLoader {
    client: ModelServerClient,
}

impl RemoteModelLoader {
    pub fn new(client: ModelServerClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &TranslateConfig) -> Result<Self> {
        let client = ModelServerClient::new(
            &config.endpoint,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ModelLoader for RemoteModelLoader {
    async fn load(&self, model: &str) -> Result<ModelHandle> {
        info!("Loading translation model: {}", model);

        let loaded: LoadResponse = self.client
            .post("/models/load", &LoadRequest { model })
            .await
            .map_err(|e| VerbaError::ModelLoad {
                model: model.to_string(),
                reason: match e {
                    VerbaError::Inference(reason) => reason,
                    other => other.to_string(),
                },
            })?;

        info!(
            "Translation model loaded: {} (language id table: {})",
            model,
            if loaded.lang_code_to_id.is_some() { "yes" } else { "no" }
        );

        Ok(ModelHandle {
            name: model.to_string(),
            tokenizer: Box::new(RemoteTokenizer {
                client: self.client.clone(),
                model: model.to_string(),
                lang_code_to_id: loaded.lang_code_to_id.unwrap_or_default(),
            }),
            model: Box::new(RemoteGenerator {
                client: self.client.clone(),
                model: model.to_string(),
            }),
        })
    }
}

pub struct RemoteTokenizer {
    client: ModelServerClient,
    model: String,
    lang_code_to_id: HashMap<String, u32>,
}

#[async_trait]
impl Seq2SeqTokenizer for RemoteTokenizer {
    async fn encode(&self, text: &str, source_tag: Option<String>, max_length: usize) -> Result<Vec<u32>> {
        let request = TokenizeRequest {
            model: &self.model,
            text,
            src_lang: source_tag,
            max_length,
        };
        let response: IdsResponse = self.client.post("/tokenize", &request).await?;
        Ok(response.ids)
    }

    async fn decode(&self, ids: &[u32]) -> Result<String> {
        let request = DetokenizeRequest {
            model: &self.model,
            ids,
            skip_special_tokens: true,
        };
        let response: TextResponse = self.client.post("/detokenize", &request).await?;
        Ok(response.text)
    }

    fn lang_id(&self, tag: &str) -> Option<u32> {
        self.lang_code_to_id.get(tag).copied()
    }

    async fn token_to_id(&self, token: &str) -> Result<Option<u32>> {
        let request = TokenToIdRequest {
            model: &self.model,
            token,
        };
        let response: TokenToIdResponse = self.client.post("/token_to_id", &request).await?;
        Ok(response.id)
    }
}

pub struct RemoteGenerator {
    client: ModelServerClient,
    model: String,
}

#[async_trait]
impl Seq2SeqModel for RemoteGenerator {
    async fn generate(&self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<u32>> {
        let request = GenerateRequest {
            model: &self.model,
            input_ids,
            params,
        };
        let response: IdsResponse = self.client.post("/generate", &request).await?;
        Ok(response.ids)
    }
}
