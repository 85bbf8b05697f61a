//! Local (Ollama) and cloud (Groq) language model calls.
//!
//! The crate only forwards prompts; it keeps no model state. Which provider
//! answers a chat request, and with what URL, model and key, comes from the
//! stored settings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::models::{non_blank, ApiResponse, LlmProvider, Settings};
use crate::AppState;

/// Characters of document context forwarded with a chat question.
pub const MAX_CONTEXT_CHARS: usize = 20_000;
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.1-8b-instant";
const CHAT_TEMPERATURE: f32 = 0.1;
const TEST_PROMPT: &str = "Reply with exactly: Test successful";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaStatus {
    pub running: bool,
    pub url: String,
    pub models: Vec<OllamaModel>,
}

/// A completed generation from either provider.
#[derive(Debug, Clone, Serialize)]
pub struct Generation {
    pub response: String,
    pub model: String,
    pub provider: LlmProvider,
    pub token_count: u64,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Question prompt, with the document text prepended when given. Context
/// beyond [`MAX_CONTEXT_CHARS`] is cut and marked with an ellipsis.
pub fn build_prompt(message: &str, context: Option<&str>) -> String {
    match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(text) => {
            let mut excerpt: String = text.chars().take(MAX_CONTEXT_CHARS).collect();
            if text.chars().count() > MAX_CONTEXT_CHARS {
                excerpt.push_str(" ...");
            }
            format!(
                "You are an assistant specialised in analysing scientific research papers.\n\n\
                 CONTEXT - the content of the paper:\n\n{}\n\n\
                 USER QUESTION:\n{}\n\n\
                 INSTRUCTIONS:\n\
                 - Base your answer on the paper above\n\
                 - Be precise and factual\n\
                 - Say clearly when the paper does not contain the answer\n\n\
                 ANSWER:",
                excerpt, message
            )
        }
        None => format!(
            "You are an assistant for analysing scientific papers. Answer this question: {}",
            message
        ),
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    ollama_url: String,
    groq_url: String,
}

impl LlmClient {
    pub fn new(ollama_url: &str, groq_url: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            http,
            ollama_url: crate::config::trim_base_url(ollama_url),
            groq_url: crate::config::trim_base_url(groq_url),
        })
    }

    /// Ollama base URL: the one in settings, else the configured default.
    pub fn ollama_base(&self, settings: &Settings) -> String {
        settings
            .ollama_url
            .as_deref()
            .map(crate::config::trim_base_url)
            .unwrap_or_else(|| self.ollama_url.clone())
    }

    pub async fn installed_models(&self, base: &str) -> AppResult<Vec<OllamaModel>> {
        let response = self.http.get(format!("{}/api/tags", base)).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "Ollama returned {}",
                response.status()
            )));
        }
        let body: Value = response.json().await?;
        let models = body.get("models").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(models)?)
    }

    /// Never fails: an unreachable server is reported as not running.
    pub async fn ollama_status(&self, base: &str) -> OllamaStatus {
        match self.installed_models(base).await {
            Ok(models) => OllamaStatus {
                running: true,
                url: base.to_string(),
                models,
            },
            Err(e) => {
                tracing::debug!(url = %base, error = %e, "Ollama not reachable");
                OllamaStatus {
                    running: false,
                    url: base.to_string(),
                    models: Vec::new(),
                }
            }
        }
    }

    pub async fn ollama_generate(
        &self,
        base: &str,
        model: &str,
        prompt: &str,
        temperature: Option<f32>,
    ) -> AppResult<Generation> {
        let mut body = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });
        if let Some(t) = temperature {
            body["options"] = json!({ "temperature": t, "top_p": 0.9, "top_k": 40 });
        }

        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/api/generate", base))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "Ollama returned {} for model {}",
                response.status(),
                model
            )));
        }
        let data: Value = response.json().await?;

        Ok(Generation {
            response: data
                .get("response")
                .and_then(|r| r.as_str())
                .unwrap_or_default()
                .to_string(),
            model: model.to_string(),
            provider: LlmProvider::Ollama,
            token_count: data.get("eval_count").and_then(|c| c.as_u64()).unwrap_or(0),
            processing_time_ms: data
                .get("eval_duration")
                .and_then(|d| d.as_u64())
                .map(|ns| ns / 1_000_000)
                .unwrap_or_else(|| started.elapsed().as_millis() as u64),
            timestamp: Utc::now(),
        })
    }

    /// OpenAI-compatible chat completion against Groq.
    pub async fn groq_complete(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        temperature: Option<f32>,
    ) -> AppResult<Generation> {
        let mut body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(t) = temperature {
            body["temperature"] = json!(t);
        }

        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/chat/completions", self.groq_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::UNAUTHORIZED => {
                return Err(AppError::Validation("Invalid Groq API key".to_string()))
            }
            s => return Err(AppError::Upstream(format!("Groq returned {}", s))),
        }
        let data: Value = response.json().await?;

        Ok(Generation {
            response: data
                .pointer("/choices/0/message/content")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string(),
            model: model.to_string(),
            provider: LlmProvider::Groq,
            token_count: data
                .pointer("/usage/completion_tokens")
                .and_then(|c| c.as_u64())
                .unwrap_or(0),
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ModelTestRequest {
    #[serde(alias = "modelName")]
    pub model_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroqTestRequest {
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatContext {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub context: Option<ChatContext>,
    #[serde(alias = "modelName")]
    pub model_name: Option<String>,
    pub provider: Option<LlmProvider>,
}

#[derive(Debug, Deserialize)]
pub struct PdfTextRequest {
    #[serde(alias = "paperId")]
    pub paper_id: u64,
}

#[derive(Debug, Serialize)]
pub struct PdfText {
    pub paper_id: u64,
    pub text: String,
    pub pages: usize,
    pub folder: Option<String>,
    pub pdf_file: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

pub async fn ollama_status(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let base = state.llm.ollama_base(&state.store.settings()?);
    Ok(ApiResponse::ok(state.llm.ollama_status(&base).await))
}

pub async fn installed_models(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let base = state.llm.ollama_base(&state.store.settings()?);
    Ok(ApiResponse::ok(state.llm.installed_models(&base).await?))
}

pub async fn test_ollama(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ModelTestRequest>,
) -> AppResult<impl IntoResponse> {
    let model = body
        .model_name
        .as_deref()
        .and_then(non_blank)
        .ok_or_else(|| AppError::Validation("Model name is required".to_string()))?;
    let base = state.llm.ollama_base(&state.store.settings()?);
    let generation = state.llm.ollama_generate(&base, &model, TEST_PROMPT, None).await?;
    Ok(ApiResponse::with_message(generation, "Model test successful"))
}

/// Test a Groq key: the one in the body, else the stored one.
pub async fn test_groq(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GroqTestRequest>,
) -> AppResult<impl IntoResponse> {
    let settings = state.store.settings()?;
    let api_key = body
        .api_key
        .as_deref()
        .and_then(non_blank)
        .filter(|k| !k.starts_with("••••••"))
        .or(settings.groq_api_key.clone())
        .ok_or_else(|| AppError::Validation("Groq API key is required".to_string()))?;
    let model = body
        .model
        .as_deref()
        .and_then(non_blank)
        .or(settings.groq_model.clone())
        .unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string());

    let generation = state
        .llm
        .groq_complete(&api_key, &model, TEST_PROMPT, None)
        .await?;
    Ok(ApiResponse::with_message(generation, "Groq connection successful"))
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatRequest>,
) -> AppResult<impl IntoResponse> {
    let message = non_blank(&body.message)
        .ok_or_else(|| AppError::Validation("Message is required".to_string()))?;
    let settings = state.store.settings()?;
    let prompt = build_prompt(&message, body.context.as_ref().map(|c| c.text.as_str()));
    let model_override = body.model_name.as_deref().and_then(non_blank);

    let generation = match body.provider.unwrap_or(settings.llm_provider) {
        LlmProvider::Groq => {
            let api_key = settings
                .groq_api_key
                .clone()
                .ok_or_else(|| AppError::Validation("Groq API key is not configured".to_string()))?;
            let model = model_override
                .or(settings.groq_model.clone())
                .unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string());
            state
                .llm
                .groq_complete(&api_key, &model, &prompt, Some(CHAT_TEMPERATURE))
                .await?
        }
        LlmProvider::Ollama | LlmProvider::None => {
            let model = model_override
                .or(settings.ollama_model.clone())
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string());
            let base = state.llm.ollama_base(&settings);
            state
                .llm
                .ollama_generate(&base, &model, &prompt, Some(CHAT_TEMPERATURE))
                .await?
        }
    };

    tracing::info!(
        provider = ?generation.provider,
        model = %generation.model,
        tokens = generation.token_count,
        "Chat answered"
    );
    Ok(ApiResponse::ok(generation))
}

/// Full text of a paper's PDF, for use as chat context.
pub async fn extract_paper_text(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PdfTextRequest>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(body.paper_id)?;
    let library = state.library.clone();

    let result = tokio::task::spawn_blocking(move || -> AppResult<PdfText> {
        let path = library
            .pdf_path(&paper)
            .ok_or_else(|| AppError::NotFound(format!("PDF of paper {}", paper.id)))?;
        let bytes = std::fs::read(&path)?;
        let (text, pages) = crate::pdf::full_text(&bytes)?;
        let name_of = |p: &std::path::Path| {
            p.file_name().map(|n| n.to_string_lossy().to_string())
        };
        Ok(PdfText {
            paper_id: paper.id,
            text,
            pages,
            folder: path.parent().and_then(name_of),
            pdf_file: name_of(&path),
            extracted_at: Utc::now(),
        })
    })
    .await??;

    Ok(ApiResponse::ok(result))
}
