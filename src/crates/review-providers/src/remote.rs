//! Remote reflection and risk-signal providers
//!
//! Thin JSON-over-HTTP clients behind the engine's capability traits. The
//! engine absorbs every error these return, so the mapping here only needs
//! to classify failures, not recover from them.

use crate::config::RemoteProviderConfig;
use async_trait::async_trait;
use review_checkpoint::DocumentInput;
use review_core::{
    CapabilityError, ReflectionProvider, RiskSignal, RiskSignalAnalyzer, SignalSeverity,
    TopicSection,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

fn build_client(config: &RemoteProviderConfig) -> Result<Client, CapabilityError> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| CapabilityError::Unavailable(e.to_string()))
}

fn classify(e: reqwest::Error) -> CapabilityError {
    if e.is_timeout() {
        CapabilityError::Timeout
    } else if e.is_connect() {
        CapabilityError::Unavailable(e.to_string())
    } else {
        CapabilityError::Remote(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CapabilityError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(CapabilityError::Remote(format!("{status}: {body}")))
}

/// Reflection text generation over a chat-completions style endpoint
#[derive(Clone)]
pub struct RemoteReflectionProvider {
    config: RemoteProviderConfig,
    client: Client,
}

impl RemoteReflectionProvider {
    pub fn new(config: RemoteProviderConfig) -> Result<Self, CapabilityError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<CompletionMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CompletionMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[async_trait]
impl ReflectionProvider for RemoteReflectionProvider {
    async fn run(&self, payload: &Value, prompt: &str) -> Result<String, CapabilityError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = CompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                CompletionMessage {
                    role: "system".to_string(),
                    content: prompt.to_string(),
                },
                CompletionMessage {
                    role: "user".to_string(),
                    content: payload.to_string(),
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(classify)?;
        let response = check_status(response).await?;

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CapabilityError::Malformed("response has no choices".to_string()))?;
        debug!(model = %self.config.model, "reflection response received");
        Ok(text)
    }
}

/// Risk-signal analysis over a dedicated scoring endpoint
#[derive(Clone)]
pub struct RemoteRiskAnalyzer {
    config: RemoteProviderConfig,
    client: Client,
}

impl RemoteRiskAnalyzer {
    pub fn new(config: RemoteProviderConfig) -> Result<Self, CapabilityError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }
}

#[derive(Debug, Deserialize)]
struct RemoteSignal {
    severity: String,
    label: String,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    signals: Vec<RemoteSignal>,
}

fn parse_severity(raw: &str) -> Result<SignalSeverity, CapabilityError> {
    match raw {
        "high" => Ok(SignalSeverity::High),
        "medium" => Ok(SignalSeverity::Medium),
        "low" => Ok(SignalSeverity::Low),
        other => Err(CapabilityError::Malformed(format!(
            "unknown severity '{other}'"
        ))),
    }
}

#[async_trait]
impl RiskSignalAnalyzer for RemoteRiskAnalyzer {
    async fn analyze(
        &self,
        sections: &[TopicSection],
        documents: &[DocumentInput],
    ) -> Result<Vec<RiskSignal>, CapabilityError> {
        let url = format!("{}/risk/analyze", self.config.base_url);
        let body = json!({
            "model": self.config.model,
            "sections": sections,
            "documents": documents.iter().map(|d| json!({
                "id": d.id,
                "filename": d.filename,
                "text": d.text,
            })).collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(classify)?;
        let response = check_status(response).await?;

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()))?;

        let mut signals = Vec::with_capacity(parsed.signals.len());
        for signal in parsed.signals {
            signals.push(RiskSignal {
                severity: parse_severity(&signal.severity)?,
                label: signal.label,
                rationale: signal.rationale,
            });
        }
        debug!(count = signals.len(), "risk signals received");
        Ok(signals)
    }
}
