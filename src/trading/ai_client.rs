use super::symbol_name;
use crate::registry::ModelConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(default)]
    text: String,
}

/// Raw trading decision as returned by the model
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeDecision {
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub target_portion_of_balance: f64,
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "No reason provided".to_string()
}

/// A decision that passed validation
#[derive(Debug, Clone, PartialEq)]
pub enum TradeAction {
    Buy { symbol: String, portion: f64 },
    Sell { symbol: String, portion: f64 },
    Hold,
}

#[derive(Error, Debug, PartialEq)]
pub enum DecisionError {
    #[error("invalid operation '{0}'")]
    InvalidOperation(String),

    #[error("invalid symbol '{0}'")]
    UnsupportedSymbol(String),

    #[error("invalid target portion {0}")]
    InvalidPortion(f64),
}

impl TradeDecision {
    pub fn validate(&self) -> Result<TradeAction, DecisionError> {
        let operation = self.operation.trim().to_lowercase();
        let symbol = self.symbol.trim().to_uppercase();

        match operation.as_str() {
            "hold" => return Ok(TradeAction::Hold),
            "buy" | "sell" => {}
            _ => return Err(DecisionError::InvalidOperation(self.operation.clone())),
        }

        if symbol_name(&symbol).is_none() {
            return Err(DecisionError::UnsupportedSymbol(self.symbol.clone()));
        }

        let portion = self.target_portion_of_balance;
        if !(portion > 0.0 && portion <= 1.0) {
            return Err(DecisionError::InvalidPortion(portion));
        }

        Ok(if operation == "buy" {
            TradeAction::Buy { symbol, portion }
        } else {
            TradeAction::Sell { symbol, portion }
        })
    }
}

/// Strip a surrounding markdown code fence (```json ... ``` or ``` ... ```)
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();

    let body = if let Some((_, rest)) = text.split_once("```json") {
        rest
    } else if let Some((_, rest)) = text.split_once("```") {
        rest
    } else {
        return text;
    };

    body.split("```").next().unwrap_or(body).trim()
}

/// Parse the model's text answer into a decision
pub fn parse_decision(text: &str) -> Result<TradeDecision> {
    serde_json::from_str(strip_code_fences(text))
        .context("Failed to parse AI response as JSON")
}

/// HTTP client for the `/responses` endpoint of a configured model
#[derive(Clone)]
pub struct AiClient {
    client: reqwest::Client,
}

impl AiClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Ask a model for a trading decision
    pub async fn request_decision(&self, model: &ModelConfig, prompt: &str) -> Result<TradeDecision> {
        let request = ResponsesRequest {
            model: &model.model,
            input: prompt,
            response_format: "text",
        };

        let response = self
            .client
            .post(format!("{}/responses", model.base_url))
            .bearer_auth(model.secret())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("AI API request to {} failed", model.display_name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("AI API returned status {}: {}", status, body);
        }

        let body: ResponsesResponse = response
            .json()
            .await
            .context("Unexpected AI response format")?;

        let text = body
            .output
            .first()
            .and_then(|item| item.content.first())
            .map(|content| content.text.as_str())
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("AI response contained no text output"))?;

        parse_decision(text)
    }
}
