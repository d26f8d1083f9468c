//! Text generation backends
//!
//! The QA bot renders its prompt and hands it to a [`TextGenerator`]. Three
//! implementations exist:
//!
//! * [`HubGenerator`] calls the HuggingFace text-generation inference API.
//! * [`OpenAiGenerator`] calls an OpenAI-compatible chat completions endpoint.
//! * [`ContextOnlyGenerator`] needs no model and answers with the retrieved
//!   context itself.

use crate::config::{GenerationConfig, GeneratorBackend};
use crate::error::{QaBotError, Result};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_openai::{Client, config::OpenAIConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const HUB_INFERENCE_URL: &str = "https://api-inference.huggingface.co/models";

/// Decoder-only completion task
pub const TEXT_GENERATION_TASK: &str = "text-generation";
/// Encoder-decoder task; the output never contains the prompt
pub const TEXT2TEXT_GENERATION_TASK: &str = "text2text-generation";

/// Reply used when retrieval produced nothing to answer from
pub const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant information in the knowledge base.";

/// Sampling parameters sent with every generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Pipeline task, `text-generation` or `text2text-generation`
    pub task: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Zero disables top-k sampling
    pub top_k: u32,
    pub max_new_tokens: u32,
    pub repetition_penalty: f32,
    /// Whether the service echoes the prompt before the answer
    pub return_full_text: bool,
}

impl GenerationParams {
    /// Preset for a model family, picked by substring of the model name
    pub fn for_model(model_name: &str) -> Self {
        let name = model_name.to_lowercase();
        let base = Self {
            task: TEXT_GENERATION_TASK.to_string(),
            temperature: 0.8,
            top_p: 0.8,
            top_k: 0,
            max_new_tokens: 128,
            repetition_penalty: 1.1,
            return_full_text: true,
        };

        if name.contains("flan") {
            Self {
                task: TEXT2TEXT_GENERATION_TASK.to_string(),
                top_k: 8,
                max_new_tokens: 60,
                return_full_text: false,
                ..base
            }
        } else if name.contains("lama-2-") {
            Self {
                max_new_tokens: 400,
                ..base
            }
        } else {
            base
        }
    }

    /// Whether a completion starts with the prompt and needs stripping
    pub fn echoes_prompt(&self) -> bool {
        self.task == TEXT_GENERATION_TASK && self.return_full_text
    }

    /// OpenAI-style frequency penalty equivalent to `repetition_penalty`
    pub fn frequency_penalty(&self) -> f32 {
        (self.repetition_penalty - 1.0).clamp(-2.0, 2.0)
    }
}

/// Everything a generator may use to produce one answer
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Fully rendered prompt
    pub prompt: String,
    pub question: String,
    /// Retrieved chunk texts in rank order
    pub context: Vec<String>,
}

/// Produces an answer for a rendered prompt
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest, params: &GenerationParams) -> Result<String>;
}

/// Build the generator described by `config`
pub fn build_generator(config: &GenerationConfig, credential: Option<String>) -> Result<Arc<dyn TextGenerator>> {
    log::info!("Building {:?} generator for {}", config.backend, config.model_name);
    match config.backend {
        GeneratorBackend::Hub => {
            let token = credential.ok_or_else(|| {
                QaBotError::Credential("The hub generator needs an access token".to_string())
            })?;
            Ok(Arc::new(HubGenerator::new(
                &config.model_name,
                config.endpoint.as_deref(),
                token,
            )))
        }
        GeneratorBackend::OpenAi => Ok(Arc::new(OpenAiGenerator::new(
            &config.model_name,
            config.endpoint.as_deref(),
            credential.as_deref().unwrap_or_default(),
        ))),
        GeneratorBackend::ContextOnly => Ok(Arc::new(ContextOnlyGenerator::default())),
    }
}

#[derive(Serialize)]
struct HubRequest<'a> {
    inputs: &'a str,
    parameters: HubParameters,
    options: HubOptions,
}

#[derive(Serialize)]
struct HubParameters {
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    max_new_tokens: u32,
    repetition_penalty: f32,
    /// Only meaningful for decoder-only `text-generation` models
    #[serde(skip_serializing_if = "Option::is_none")]
    return_full_text: Option<bool>,
}

impl HubParameters {
    fn from_params(params: &GenerationParams) -> Self {
        Self {
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: (params.top_k > 0).then_some(params.top_k),
            max_new_tokens: params.max_new_tokens,
            repetition_penalty: params.repetition_penalty,
            return_full_text: (params.task == TEXT_GENERATION_TASK).then_some(params.return_full_text),
        }
    }
}

#[derive(Serialize)]
struct HubOptions {
    wait_for_model: bool,
}

#[derive(Debug, Deserialize)]
struct HubOutput {
    generated_text: String,
}

/// HuggingFace text-generation inference API
pub struct HubGenerator {
    model_name: String,
    url: String,
    token: String,
    client: reqwest::Client,
}

impl HubGenerator {
    pub fn new(model_name: &str, endpoint: Option<&str>, token: String) -> Self {
        let url = endpoint
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/{}", HUB_INFERENCE_URL, model_name));
        Self {
            model_name: model_name.to_string(),
            url,
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TextGenerator for HubGenerator {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, request: &GenerationRequest, params: &GenerationParams) -> Result<String> {
        let body = HubRequest {
            inputs: &request.prompt,
            parameters: HubParameters::from_params(params),
            options: HubOptions { wait_for_model: true },
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(QaBotError::Generation(format!(
                "{} returned {}: {}",
                self.model_name, status, text
            )));
        }

        let outputs: Vec<HubOutput> = response.json().await?;
        let generated = outputs
            .into_iter()
            .next()
            .map(|o| o.generated_text)
            .ok_or_else(|| QaBotError::Generation("Empty generation response".to_string()))?;

        if params.echoes_prompt() {
            Ok(strip_echoed_prompt(&generated, &request.prompt))
        } else {
            Ok(generated.trim().to_string())
        }
    }
}

/// Remove the prompt from a full-text completion
pub fn strip_echoed_prompt(generated: &str, prompt: &str) -> String {
    generated
        .strip_prefix(prompt)
        .unwrap_or(generated)
        .trim()
        .to_string()
}

/// OpenAI-compatible chat completions endpoint
pub struct OpenAiGenerator {
    model_name: String,
    client: Client<OpenAIConfig>,
}

impl OpenAiGenerator {
    pub fn new(model_name: &str, base_url: Option<&str>, api_key: &str) -> Self {
        let config = match base_url {
            Some(base_url) => OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(base_url),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            model_name: model_name.to_string(),
            client: Client::with_config(config),
        }
    }

    /// Chat request carrying the prompt as a single user message.
    ///
    /// Chat endpoints have no top-k or repetition penalty; the penalty is
    /// mapped onto `frequency_penalty` and top-k is dropped.
    pub fn chat_request(&self, prompt: &str, params: &GenerationParams) -> Result<CreateChatCompletionRequest> {
        if params.top_k > 0 {
            log::debug!(
                "{} does not support top_k, ignoring top_k={}",
                self.model_name,
                params.top_k
            );
        }

        let messages = vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                name: None,
            },
        )];

        CreateChatCompletionRequestArgs::default()
            .model(self.model_name.as_str())
            .messages(messages)
            .max_tokens(params.max_new_tokens)
            .temperature(params.temperature)
            .top_p(params.top_p)
            .frequency_penalty(params.frequency_penalty())
            .build()
            .map_err(|e| QaBotError::Generation(format!("Invalid chat request: {}", e)))
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, request: &GenerationRequest, params: &GenerationParams) -> Result<String> {
        let chat_request = self.chat_request(&request.prompt, params)?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| QaBotError::Generation(format!("Chat completion failed: {}", e)))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or_else(|| {
                log::error!("No content in chat response: {:?}", response);
                QaBotError::Generation("No content in response".to_string())
            })?;

        Ok(content.trim().to_string())
    }
}

/// Answers with the top retrieved chunks instead of a model completion
#[derive(Debug, Clone)]
pub struct ContextOnlyGenerator {
    /// Number of chunks quoted
    pub max_chunks: usize,
    /// Characters kept from each chunk
    pub preview_chars: usize,
}

impl Default for ContextOnlyGenerator {
    fn default() -> Self {
        Self {
            max_chunks: 3,
            preview_chars: 200,
        }
    }
}

#[async_trait]
impl TextGenerator for ContextOnlyGenerator {
    fn name(&self) -> &str {
        "context-only"
    }

    async fn generate(&self, request: &GenerationRequest, _params: &GenerationParams) -> Result<String> {
        if request.context.is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let mut response = "Based on the knowledge base, here's what I found:\n\n".to_string();
        for (i, chunk) in request.context.iter().take(self.max_chunks).enumerate() {
            let preview = if chunk.chars().count() > self.preview_chars {
                let cut: String = chunk.chars().take(self.preview_chars).collect();
                format!("{}...", cut)
            } else {
                chunk.clone()
            };
            response.push_str(&format!("{}. {}\n\n", i + 1, preview));
        }

        Ok(response.trim().to_string())
    }
}
