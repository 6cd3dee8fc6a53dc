use serde_json::Value;

use crate::engine::{extract_json, strip_reasoning};
use crate::error::{AppError, Result};
use crate::plans::PlanLevels;
use crate::types::{Conclusion, Direction};

/// Engine reply reduced to the fields the core persists.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub trend: Option<String>,
    pub confidence: Option<f64>,
    pub conclusion: Conclusion,
    pub direction: Option<Direction>,
    pub summary: Option<String>,
    pub rationale: Option<String>,
    pub risk_reward_ratio: Option<f64>,
    pub entry_point: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit_1: Option<f64>,
    pub take_profit_2: Option<f64>,
    pub waves: WaveAnalysis,
    /// Present only for OPEN_POSITION.
    pub levels: Option<PlanLevels>,
}

/// Per-timeframe wave status from `analysis.waveAnalysis`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaveAnalysis {
    pub h4: Option<String>,
    pub h1: Option<String>,
    pub m15: Option<String>,
}

/// Parse and normalize a raw engine reply.
///
/// Reads `tradePlan.{conclusion,direction,confidence,riskRewardRatio}`,
/// `levels.*` and `analysis.{summary,trend,rationale,waveAnalysis}`, with
/// top-level fallbacks. A missing or unknown conclusion, or an OPEN_POSITION
/// without direction, entry, stop loss and first take-profit, is malformed.
/// Levels are kept on every verdict; only OPEN_POSITION turns them into a plan.
pub fn normalize(raw: &str) -> Result<Verdict> {
    let json = extract_json(strip_reasoning(raw)).ok_or_else(|| malformed("no JSON object in reply"))?;
    let doc: Value = serde_json::from_str(json).map_err(|e| malformed(&format!("invalid JSON: {e}")))?;

    let plan = doc.get("tradePlan");
    let analysis = doc.get("analysis");
    let levels = doc.get("levels");

    let conclusion = field(plan, &doc, "conclusion")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing conclusion"))?
        .parse::<Conclusion>()
        .map_err(|e| malformed(&e))?;

    let direction = field(plan, &doc, "direction")
        .and_then(Value::as_str)
        .and_then(|d| d.parse::<Direction>().ok());

    let confidence = field(plan, &doc, "confidence").and_then(number).map(|c| c.clamp(0.0, 1.0));
    let risk_reward_ratio = field(plan, &doc, "riskRewardRatio").and_then(number);

    let trend = field(analysis, &doc, "trend").and_then(text);
    let summary = analysis.and_then(|a| a.get("summary")).and_then(text);
    let rationale = analysis.and_then(|a| a.get("rationale")).and_then(text);
    let waves = analysis
        .and_then(|a| a.get("waveAnalysis"))
        .map(wave_analysis)
        .unwrap_or_default();

    let tp = levels.and_then(|l| l.get("takeProfit"));
    let entry_point = levels.and_then(|l| l.get("entryPoint")).and_then(number);
    let stop_loss = levels.and_then(|l| l.get("stopLoss")).and_then(number);
    let take_profit_1 = tp.and_then(|t| t.get("tp1")).and_then(number);
    let take_profit_2 = tp.and_then(|t| t.get("tp2")).and_then(number);

    let plan_levels = match conclusion {
        Conclusion::OpenPosition => Some(PlanLevels {
            direction: direction.ok_or_else(|| malformed("OPEN_POSITION without direction"))?,
            entry_price: required(entry_point, "entryPoint")?,
            stop_loss: required(stop_loss, "stopLoss")?,
            take_profit_1: required(take_profit_1, "takeProfit.tp1")?,
            take_profit_2,
        }),
        _ => None,
    };

    Ok(Verdict {
        trend,
        confidence,
        conclusion,
        direction,
        summary,
        rationale,
        risk_reward_ratio,
        entry_point,
        stop_loss,
        take_profit_1,
        take_profit_2,
        waves,
        levels: plan_levels,
    })
}

fn malformed(msg: &str) -> AppError {
    AppError::Engine(format!("malformed verdict: {msg}"))
}

/// `section.key`, falling back to the same key at top level.
fn field<'a>(section: Option<&'a Value>, doc: &'a Value, key: &str) -> Option<&'a Value> {
    section.and_then(|s| s.get(key)).or_else(|| doc.get(key))
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn text(v: &Value) -> Option<String> {
    v.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn required(v: Option<f64>, name: &str) -> Result<f64> {
    v.ok_or_else(|| malformed(&format!("OPEN_POSITION without {name}")))
}

/// `[{"timeframe": "4H", "status": "..."}, ...]`. Unknown timeframes are ignored.
fn wave_analysis(v: &Value) -> WaveAnalysis {
    let mut waves = WaveAnalysis::default();
    for item in v.as_array().into_iter().flatten() {
        let Some(timeframe) = item.get("timeframe").and_then(Value::as_str) else {
            continue;
        };
        let status = match item.get("status") {
            Some(Value::Null) | None => None,
            Some(Value::String(_)) => item.get("status").and_then(text),
            Some(other) => Some(other.to_string()),
        };
        match timeframe.trim().to_ascii_uppercase().as_str() {
            "4H" => waves.h4 = status,
            "1H" => waves.h1 = status,
            "15M" => waves.m15 = status,
            _ => {}
        }
    }
    waves
}
