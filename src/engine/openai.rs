use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::market_data::MarketDataClient;
use super::{render_prompt, strip_reasoning, AnalysisEngine, AnalysisRequest, EngineResponse};
use crate::config::Config;
use crate::error::{AppError, Result};

const BACKOFF_BASE_MS: u64 = 500;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions engine.
///
/// The prompt version is the system message; the kline context (when a kline
/// endpoint is configured) is the user message.
pub struct OpenAiEngine {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    models: Vec<String>,
    max_retries: u32,
    market: MarketDataClient,
}

impl OpenAiEngine {
    pub fn new(cfg: &Config) -> Result<Self> {
        // No client-level timeout: the pipeline bounds the whole call.
        let client = reqwest::Client::builder().build()?;
        let models = cfg.model_candidates();
        if models.is_empty() {
            return Err(AppError::Config("OPENAI_MODEL must name at least one model".to_string()));
        }
        Ok(Self {
            client,
            base_url: cfg.openai_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.openai_api_key.clone(),
            models,
            max_retries: cfg.engine_max_retries,
            market: MarketDataClient::new(cfg)?,
        })
    }

    async fn complete(&self, api_key: &str, model: &str, system: &str, user: &str) -> Result<String> {
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
        };
        let resp: ChatResponse = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        // Returned untouched: the audit record keeps reasoning and whitespace.
        if strip_reasoning(&text).is_empty() {
            return Err(AppError::Engine(format!("model {model} returned an empty reply")));
        }
        Ok(text)
    }
}

#[async_trait]
impl AnalysisEngine for OpenAiEngine {
    async fn analyze(&self, req: &AnalysisRequest) -> Result<EngineResponse> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AppError::Engine("OPENAI_API_KEY is not configured".to_string()));
        };

        let system = render_prompt(&req.prompt, &req.symbol, req.cycle);
        let user = match self.market.fetch_context(&req.symbol, req.asset_type).await? {
            Some(context) => format!(
                "Latest kline data for {}:\n```json\n{}\n```",
                req.symbol,
                serde_json::to_string_pretty(&context)?
            ),
            None => format!("Analyze {} on the {} cycle.", req.symbol, req.cycle),
        };

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            let model = model_for_attempt(&self.models, attempt);
            info!(model, attempt, symbol = %req.symbol, "Sending chat completion request");
            match self.complete(api_key, model, &system, &user).await {
                Ok(raw_text) => {
                    debug!(chars = raw_text.len(), "Engine reply received");
                    return Ok(EngineResponse { raw_text });
                }
                Err(e) => {
                    warn!(model, attempt, error = %e, "Chat completion failed");
                    last_err = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                }
            }
        }

        Err(match last_err {
            Some(AppError::Engine(msg)) => AppError::Engine(msg),
            Some(e) => AppError::Engine(format!("all attempts failed: {e}")),
            None => AppError::Engine("no attempt was made".to_string()),
        })
    }
}

/// First model on the first attempt, then rotate through the list.
fn model_for_attempt(models: &[String], attempt: u32) -> &str {
    &models[attempt as usize % models.len()]
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(1 << attempt.min(10)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetType, Cycle};

    #[test]
    fn models_rotate_starting_with_first() {
        let models = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let picked: Vec<&str> = (0..5).map(|i| model_for_attempt(&models, i)).collect();
        assert_eq!(picked, vec!["a", "b", "c", "a", "b"]);
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(0), Duration::from_millis(500));
        assert_eq!(backoff(1), Duration::from_millis(1000));
        assert_eq!(backoff(3), Duration::from_millis(4000));
    }

    #[test]
    fn empty_model_list_is_config_error() {
        let mut cfg = Config::for_tests();
        cfg.openai_model = " , ".to_string();
        assert!(matches!(OpenAiEngine::new(&cfg), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_network() {
        let engine = OpenAiEngine::new(&Config::for_tests()).unwrap();
        let req = AnalysisRequest {
            symbol: "BTCUSDT".to_string(),
            asset_type: AssetType::Spot,
            cycle: Cycle::H1,
            prompt: "Analyze {symbol}".to_string(),
        };
        assert!(matches!(engine.analyze(&req).await, Err(AppError::Engine(_))));
    }

    #[test]
    fn chat_response_tolerates_missing_content() {
        let resp: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#).unwrap();
        assert!(resp.choices[0].message.content.is_none());
    }
}
