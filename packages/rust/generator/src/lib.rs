//! Client for the external text-generation service used to backfill product
//! descriptions.
//!
//! Speaks the OpenAI-compatible chat-completions protocol. Every clone of a
//! [`GeneratorClient`] shares one semaphore, so the outstanding-call limit is
//! global across all jobs holding a clone, not per job.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use catalogsync_shared::{
    CatalogSyncError, GeneratorConfig, Product, Result, RetryPolicy, resolve_api_key,
    retry_with_backoff,
};

/// The facts sent to the service about one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionRequest {
    pub name: String,
    pub description: String,
    pub category: String,
}

impl DescriptionRequest {
    pub fn from_product(product: &Product) -> Self {
        Self {
            name: product.data.name.clone(),
            description: product.data.description.clone().unwrap_or_default(),
            category: product.data.category_id.clone(),
        }
    }
}

/// Render the instruction sent for one product.
pub fn build_prompt(request: &DescriptionRequest) -> String {
    format!(
        "You are an expert in medical sales. Your specialty is medical consumables used by \
         hospitals on a daily basis. Your task is to enhance the description of a product \
         based on the information provided.\n\n\
         Product name: {}\n\
         Product description: {}\n\
         Category: {}\n\n\
         New Description:",
        request.name, request.description, request.category
    )
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// GeneratorClient
// ---------------------------------------------------------------------------

/// Rate-limited client for the generation service. Cheap to clone.
#[derive(Clone)]
pub struct GeneratorClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    limiter: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for GeneratorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("available_permits", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}

impl GeneratorClient {
    /// Build a client, reading the API key from the configured env var.
    pub fn from_config(config: &GeneratorConfig, retry: RetryPolicy) -> Result<Self> {
        let api_key = resolve_api_key(config)?;
        Self::new(config, api_key, retry)
    }

    /// Build a client with an explicit API key.
    pub fn new(config: &GeneratorConfig, api_key: String, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                CatalogSyncError::Enrichment(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            retry,
        })
    }

    /// Calls that may start right now without waiting for a permit.
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Ask the service for a replacement description.
    ///
    /// Retries per the client's policy; a permit is held only while a request
    /// is in flight, never during backoff.
    #[instrument(skip_all, fields(product = %request.name))]
    pub async fn generate_description(&self, request: &DescriptionRequest) -> Result<String> {
        let prompt = build_prompt(request);
        retry_with_backoff(&self.retry, "generate description", || self.call_once(&prompt)).await
    }

    async fn call_once(&self, prompt: &str) -> Result<String> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| CatalogSyncError::Enrichment("generator limiter closed".into()))?;

        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CatalogSyncError::Enrichment("generation request timed out".into())
                } else {
                    CatalogSyncError::Enrichment(format!("generation request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(CatalogSyncError::Enrichment(format!(
                "generation service returned {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            CatalogSyncError::Enrichment(format!("invalid generation response: {e}"))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                CatalogSyncError::Enrichment("generation response had no text".into())
            })?;

        debug!(chars = text.len(), "description generated");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> GeneratorConfig {
        GeneratorConfig {
            base_url: format!("{}/v1", server.uri()),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn request() -> DescriptionRequest {
        DescriptionRequest {
            name: "Nitrile Gloves".into(),
            description: String::new(),
            category: "C-1".into(),
        }
    }

    fn completion(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }]
        }))
    }

    #[tokio::test]
    async fn returns_trimmed_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_string_contains("Nitrile Gloves"))
            .respond_with(completion("  Powder-free nitrile exam gloves.\n"))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            GeneratorClient::new(&config(&server), "test-key".into(), RetryPolicy::none()).unwrap();
        let text = client.generate_description(&request()).await.unwrap();
        assert_eq!(text, "Powder-free nitrile exam gloves.");
    }

    #[tokio::test]
    async fn server_error_is_enrichment_error_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .expect(2)
            .mount(&server)
            .await;

        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
        };
        let client = GeneratorClient::new(&config(&server), "k".into(), retry).unwrap();
        let err = client.generate_description(&request()).await.unwrap_err();
        assert!(matches!(err, CatalogSyncError::Enrichment(ref m) if m.contains("500")));
    }

    #[tokio::test]
    async fn empty_choices_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let client = GeneratorClient::new(&config(&server), "k".into(), RetryPolicy::none()).unwrap();
        let err = client.generate_description(&request()).await.unwrap_err();
        assert!(err.to_string().contains("no text"));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(completion("late").set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let mut cfg = config(&server);
        cfg.timeout_secs = 1;
        let client = GeneratorClient::new(&cfg, "k".into(), RetryPolicy::none()).unwrap();
        let err = client.generate_description(&request()).await.unwrap_err();
        assert!(matches!(err, CatalogSyncError::Enrichment(_)));
    }

    #[tokio::test]
    async fn clones_share_one_concurrency_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(completion("ok").set_delay(Duration::from_millis(150)))
            .mount(&server)
            .await;

        let mut cfg = config(&server);
        cfg.max_concurrent_requests = 1;
        let client = GeneratorClient::new(&cfg, "k".into(), RetryPolicy::none()).unwrap();

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.generate_description(&request()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert!(start.elapsed() >= Duration::from_millis(450));
        assert_eq!(client.available_permits(), 1);
    }

    #[test]
    fn prompt_carries_product_facts() {
        let prompt = build_prompt(&DescriptionRequest {
            name: "Gauze".into(),
            description: "4x4 pads".into(),
            category: "Wound Care".into(),
        });
        assert!(prompt.contains("Product name: Gauze"));
        assert!(prompt.contains("Product description: 4x4 pads"));
        assert!(prompt.contains("Category: Wound Care"));
        assert!(prompt.ends_with("New Description:"));
    }
}
