//! Ollama-backed generation and judging.
//!
//! Talks to a local Ollama server over HTTP (`/api/generate`,
//! non-streaming). `generator_for` probes the server and falls back to the
//! deterministic scripted backend when it is unreachable, so the pipeline
//! stays runnable offline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::OllamaConfig;

use super::scripted::ScriptedGenerator;
use super::{Generator, Judge, Verdict};

/// Generator backed by an Ollama server.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &OllamaConfig) -> Self {
        Self::new(&config.base_url, &config.model)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, context: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&json!({
                "model": self.model,
                "prompt": context,
                "stream": false,
            }))
            .send()
            .await
            .with_context(|| format!("failed to reach Ollama at {}", self.base_url))?
            .error_for_status()
            .context("Ollama generate request failed")?;

        let body: serde_json::Value = response
            .json()
            .await
            .context("Ollama returned a non-JSON response")?;

        body.get("response")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .context("Ollama response is missing the 'response' field")
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .with_context(|| format!("Ollama unreachable at {}", self.base_url))?
            .error_for_status()
            .context("Ollama health check failed")?;
        Ok(())
    }
}

/// Pick a generator backend: Ollama when the server answers, scripted
/// fallback otherwise.
pub async fn generator_for(config: &OllamaConfig) -> Arc<dyn Generator> {
    let ollama = OllamaGenerator::from_config(config);
    match ollama.health_check().await {
        Ok(()) => {
            info!(base_url = %config.base_url, model = %config.model, "using Ollama backend");
            Arc::new(ollama)
        }
        Err(e) => {
            warn!(error = %e, "Ollama unreachable, using scripted fallback backend");
            Arc::new(ScriptedGenerator::fallback())
        }
    }
}

const JUDGE_PROMPT: &str = "You are a strict validator for a SOC analysis pipeline. \
Inspect the content below and answer on the first line with exactly VALID, or \
INVALID: <one sentence of corrective feedback>. Do not answer anything else.";

/// Judge that delegates the verdict to a generator with a strict validator
/// prompt and parses the `VALID` / `INVALID: ...` reply.
pub struct LlmJudge {
    generator: Arc<dyn Generator>,
}

impl LlmJudge {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, content: &str) -> Result<Verdict> {
        let prompt = format!("{JUDGE_PROMPT}\n\nContent:\n{content}");
        let reply = self.generator.generate(&prompt).await?;
        let line = reply.lines().next().unwrap_or("").trim();

        if line.starts_with("VALID") {
            return Ok(Verdict::accept());
        }

        let feedback = line
            .strip_prefix("INVALID")
            .map(|rest| rest.trim_start_matches([':', ' ']).to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| reply.trim().to_string());
        Ok(Verdict::reject(feedback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_judge_parses_valid_reply() {
        let judge = LlmJudge::new(Arc::new(ScriptedGenerator::new(vec!["VALID".to_string()])));
        let verdict = judge.judge("some output").await.unwrap();
        assert!(verdict.valid);
        assert!(verdict.feedback.is_none());
    }

    #[tokio::test]
    async fn test_judge_parses_invalid_reply_with_feedback() {
        let judge = LlmJudge::new(Arc::new(ScriptedGenerator::new(vec![
            "INVALID: missing severity assessment".to_string(),
        ])));
        let verdict = judge.judge("some output").await.unwrap();
        assert!(!verdict.valid);
        assert_eq!(
            verdict.feedback.as_deref(),
            Some("missing severity assessment")
        );
    }

    #[tokio::test]
    async fn test_judge_keeps_whole_reply_when_unparseable() {
        let judge = LlmJudge::new(Arc::new(ScriptedGenerator::new(vec![
            "that does not look right".to_string(),
        ])));
        let verdict = judge.judge("some output").await.unwrap();
        assert!(!verdict.valid);
        assert_eq!(verdict.feedback.as_deref(), Some("that does not look right"));
    }
}
