//! Structured response schemas and defensive parsing.
//!
//! Model output is never trusted as control input until it parses into one
//! of these types and passes range checks.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::errors::{RemediateError, RemediateResult};
use crate::session::{Analysis, DataRequest, IssueStatus, RemediationAction};

/// One investigation step as proposed by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationResponse {
    #[serde(default, alias = "analysis", alias = "reasoning")]
    pub rationale: String,
    #[serde(default)]
    pub data_requests: Vec<DataRequest>,
    #[serde(default, alias = "investigationComplete")]
    pub complete: bool,
    #[serde(default)]
    pub confidence: f64,
}

impl InvestigationResponse {
    fn check(self) -> RemediateResult<Self> {
        check_confidence(self.confidence)?;
        if !self.complete && self.data_requests.is_empty() {
            return Err(malformed(
                "investigation is not complete but no dataRequests were proposed",
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemediationPlan {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    actions: Vec<RemediationAction>,
}

/// Final analysis as returned by the model, before normalization.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResponse {
    #[serde(default)]
    issue_status: IssueStatus,
    root_cause: String,
    confidence: f64,
    #[serde(default, alias = "supportingFactors")]
    factors: Vec<String>,
    #[serde(default)]
    remediation: Option<RemediationPlan>,
    #[serde(default)]
    validation_intent: Option<String>,
}

/// Parse an investigation step.
pub fn parse_investigation(text: &str) -> RemediateResult<InvestigationResponse> {
    parse_model_json::<InvestigationResponse>(text)?.check()
}

/// Parse and normalize a final analysis. Risk is recomputed from the actions.
pub fn parse_analysis(text: &str) -> RemediateResult<Analysis> {
    let raw: AnalysisResponse = parse_model_json(text)?;
    check_confidence(raw.confidence)?;
    if raw.root_cause.trim().is_empty() {
        return Err(malformed("rootCause is empty"));
    }

    let plan = raw.remediation.unwrap_or(RemediationPlan {
        summary: String::new(),
        actions: Vec::new(),
    });
    for (index, action) in plan.actions.iter().enumerate() {
        if action.command.trim().is_empty() {
            return Err(malformed(&format!("remediation action {index} has no command")));
        }
    }
    // resolved or nonexistent issues carry no actions
    let actions: Vec<RemediationAction> = if raw.issue_status.needs_remediation() {
        plan.actions
            .into_iter()
            .map(|mut a| {
                a.dry_run = None;
                a
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(Analysis {
        root_cause: raw.root_cause.trim().to_string(),
        confidence: raw.confidence,
        supporting_factors: raw.factors,
        summary: plan.summary,
        risk: Analysis::max_risk(&actions),
        remediation_actions: actions,
        issue_status: raw.issue_status,
        validation_intent: raw
            .validation_intent
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    })
}

/// Deserialize JSON from model text, tolerating code fences and prose.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> RemediateResult<T> {
    let json_text = extract_json(text)
        .ok_or_else(|| malformed(&format!("no JSON object found in response: {}", preview(text))))?;
    serde_json::from_str(json_text).map_err(|e| {
        malformed(&format!(
            "failed to parse response as JSON: {e}. Response: {}",
            preview(text)
        ))
    })
}

fn extract_json(text: &str) -> Option<&str> {
    let text = text.trim();

    // Sometimes the AI wraps JSON in markdown code blocks
    let unfenced = if let Some(rest) = text.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = text.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        text
    };

    if unfenced.starts_with('{') && unfenced.ends_with('}') {
        return Some(unfenced);
    }
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    (end > start).then(|| &unfenced[start..=end])
}

fn check_confidence(confidence: f64) -> RemediateResult<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(malformed(&format!(
            "confidence {confidence} is outside [0, 1]"
        )))
    }
}

fn malformed(reason: &str) -> RemediateError {
    RemediateError::ModelResponseMalformed {
        reason: reason.to_string(),
    }
}

fn preview(text: &str) -> String {
    crate::session::types::truncate_chars(text.trim(), 300)
}
