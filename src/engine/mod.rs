pub mod market_data;
pub mod openai;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AssetType, Cycle};

pub use openai::OpenAiEngine;

/// Everything the engine needs for one pass.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub symbol: String,
    pub asset_type: AssetType,
    pub cycle: Cycle,
    /// Prompt version content, placeholders not yet filled.
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct EngineResponse {
    /// Model content exactly as received.
    pub raw_text: String,
}

/// External analysis engine. The pipeline only sees this trait.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(&self, req: &AnalysisRequest) -> Result<EngineResponse>;
}

/// Fill `{symbol}` and `{cycle}` placeholders in prompt content.
pub fn render_prompt(template: &str, symbol: &str, cycle: Cycle) -> String {
    template
        .replace("{symbol}", symbol)
        .replace("{cycle}", cycle.as_str())
}

/// Drop a leading `<think>…</think>` reasoning block some models emit.
pub fn strip_reasoning(text: &str) -> &str {
    let text = text.trim();
    if text.contains("<think>") {
        if let Some(end) = text.rfind("</think>") {
            return text[end + "</think>".len()..].trim();
        }
    }
    text
}

/// Locate the JSON object in a free-form reply: a fenced ```json block if
/// present, else the span between the first `{` and the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].trim())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_prefers_fenced_block() {
        let text = "Here you go {not this}\n```json\n{\"a\": 1}\n```\ntrailing }";
        assert_eq!(extract_json(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn extract_falls_back_to_outer_braces() {
        assert_eq!(
            extract_json("verdict: {\"a\": {\"b\": 2}} done"),
            Some("{\"a\": {\"b\": 2}}")
        );
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn strips_reasoning_preamble() {
        assert_eq!(strip_reasoning("<think>hmm\n</think>\n{\"x\":1}"), "{\"x\":1}");
        assert_eq!(strip_reasoning("  {\"x\":1} "), "{\"x\":1}");
    }

    #[test]
    fn prompt_placeholders_filled() {
        assert_eq!(
            render_prompt("Analyze {symbol} on {cycle}; {symbol} only", "BTCUSDT", Cycle::H4),
            "Analyze BTCUSDT on 4h; BTCUSDT only"
        );
    }
}
