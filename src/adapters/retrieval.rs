//! Enrichment retrievers: domain knowledge rules and incident history.
//!
//! Both return structured JSON context for a finding description. Retrieval
//! is keyword-scored; vector-store mechanics are out of scope and live
//! behind the same trait boundary if they ever arrive.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::sink::JsonlSink;
use super::Retriever;

/// How many history excerpts to attach per query
const MAX_INCIDENTS: usize = 3;

/// Characters of a past report kept in an excerpt
const EXCERPT_LEN: usize = 240;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

/// One rule in the domain knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRule {
    pub name: String,
    pub keywords: Vec<String>,
    pub guidance: String,
}

/// Keyword-scored lookup over a YAML rule knowledge base.
pub struct RuleRetriever {
    rules: Vec<KnowledgeRule>,
}

impl RuleRetriever {
    pub fn new(rules: Vec<KnowledgeRule>) -> Self {
        Self { rules }
    }

    /// Load rules from a YAML file (a list of `KnowledgeRule` entries)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read knowledge base: {}", path.display()))?;
        let rules: Vec<KnowledgeRule> =
            serde_yaml::from_str(&content).context("failed to parse knowledge base YAML")?;
        Ok(Self::new(rules))
    }

    /// Load from a file when configured, otherwise fall back to the
    /// built-in rule set.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::new(builtin_rules())),
        }
    }

    fn best_match(&self, query: &str) -> Option<(&KnowledgeRule, Vec<String>)> {
        let query_tokens = tokenize(query);

        self.rules
            .iter()
            .filter_map(|rule| {
                let matched: Vec<String> = rule
                    .keywords
                    .iter()
                    .filter(|kw| query_tokens.contains(&kw.to_lowercase()))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    None
                } else {
                    Some((rule, matched))
                }
            })
            .max_by_key(|(_, matched)| matched.len())
    }
}

#[async_trait]
impl Retriever for RuleRetriever {
    async fn retrieve(&self, query: &str) -> Result<Value> {
        match self.best_match(query) {
            Some((rule, matched)) => {
                debug!(rule = %rule.name, "knowledge rule matched");
                Ok(json!({
                    "rule": rule.name,
                    "guidance": rule.guidance,
                    "matched_terms": matched,
                }))
            }
            None => Ok(json!({
                "rule": Value::Null,
                "guidance": "no matching detection rule in the knowledge base",
                "matched_terms": [],
            })),
        }
    }
}

/// Default rule set used when no knowledge base file is configured.
pub fn builtin_rules() -> Vec<KnowledgeRule> {
    vec![
        KnowledgeRule {
            name: "volumetric-threshold".to_string(),
            keywords: vec![
                "threshold".to_string(),
                "bytes".to_string(),
                "volume".to_string(),
                "exfiltration".to_string(),
            ],
            guidance: "Compare against the cell's baseline byte rate; sustained excess \
                       toward a single external endpoint suggests exfiltration or an \
                       unthrottled backup job."
                .to_string(),
        },
        KnowledgeRule {
            name: "port-scan".to_string(),
            keywords: vec![
                "scanning".to_string(),
                "scan".to_string(),
                "ports".to_string(),
                "horizontal".to_string(),
            ],
            guidance: "Horizontal scans usually precede lateral movement; check whether \
                       the source host recently authenticated to new internal services."
                .to_string(),
        },
        KnowledgeRule {
            name: "dns-abuse".to_string(),
            keywords: vec![
                "dns".to_string(),
                "nxdomain".to_string(),
                "burst".to_string(),
            ],
            guidance: "DNS bursts and NXDOMAIN spikes indicate DGA malware or tunneling; \
                       capture query names for entropy analysis."
                .to_string(),
        },
        KnowledgeRule {
            name: "beaconing".to_string(),
            keywords: vec![
                "beaconing".to_string(),
                "periodic".to_string(),
                "c2".to_string(),
            ],
            guidance: "Periodic small flows to a fixed endpoint match C2 beaconing; \
                       inspect the destination's reputation and TLS certificate chain."
                .to_string(),
        },
    ]
}

/// Scans previously committed reports for incidents similar to the query.
pub struct HistoryRetriever {
    pool: JsonlSink,
}

impl HistoryRetriever {
    pub fn new(pool_path: PathBuf) -> Self {
        Self {
            pool: JsonlSink::new(pool_path),
        }
    }
}

#[async_trait]
impl Retriever for HistoryRetriever {
    async fn retrieve(&self, query: &str) -> Result<Value> {
        let reports = self.pool.read_all().await?;
        let query_tokens = tokenize(query);

        let mut scored: Vec<(usize, &_)> = reports
            .iter()
            .filter_map(|r| {
                let report_tokens = tokenize(&r.report);
                let overlap = query_tokens
                    .iter()
                    .filter(|t| report_tokens.contains(t))
                    .count();
                if overlap == 0 {
                    None
                } else {
                    Some((overlap, r))
                }
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let incidents: Vec<Value> = scored
            .into_iter()
            .take(MAX_INCIDENTS)
            .map(|(_, r)| {
                let excerpt: String = r.report.chars().take(EXCERPT_LEN).collect();
                json!({
                    "trace_id": r.trace_id,
                    "committed_at": r.committed_at,
                    "excerpt": excerpt,
                })
            })
            .collect();

        debug!(matches = incidents.len(), "history lookup complete");
        Ok(json!({ "incidents": incidents }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Sink;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_rule_retriever_picks_best_keyword_overlap() {
        let retriever = RuleRetriever::new(builtin_rules());
        let ctx = retriever
            .retrieve("Threshold of bytes per second exceeded")
            .await
            .unwrap();

        assert_eq!(ctx["rule"], "volumetric-threshold");
        assert!(ctx["matched_terms"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t == "threshold"));
    }

    #[tokio::test]
    async fn test_rule_retriever_reports_no_match() {
        let retriever = RuleRetriever::new(builtin_rules());
        let ctx = retriever.retrieve("completely unrelated text").await.unwrap();
        assert!(ctx["rule"].is_null());
    }

    #[tokio::test]
    async fn test_history_retriever_finds_similar_incidents() {
        let temp = TempDir::new().unwrap();
        let pool_path = temp.path().join("pool.jsonl");

        let sink = JsonlSink::new(pool_path.clone());
        sink.append(Uuid::new_v4(), "Beaconing behavior toward a C2 endpoint was confirmed")
            .await
            .unwrap();
        sink.append(Uuid::new_v4(), "Benign DHCP churn, closed as false positive")
            .await
            .unwrap();

        let retriever = HistoryRetriever::new(pool_path);
        let ctx = retriever.retrieve("periodic beaconing behavior").await.unwrap();

        let incidents = ctx["incidents"].as_array().unwrap();
        assert_eq!(incidents.len(), 1);
        assert!(incidents[0]["excerpt"].as_str().unwrap().contains("Beaconing"));
    }

    #[tokio::test]
    async fn test_history_retriever_with_missing_pool() {
        let temp = TempDir::new().unwrap();
        let retriever = HistoryRetriever::new(temp.path().join("absent.jsonl"));
        let ctx = retriever.retrieve("anything").await.unwrap();
        assert!(ctx["incidents"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_knowledge_base_yaml_parsing() {
        let yaml = r#"
- name: test-rule
  keywords: [alpha, beta]
  guidance: do the thing
"#;
        let rules: Vec<KnowledgeRule> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules[0].name, "test-rule");
        assert_eq!(rules[0].keywords.len(), 2);
    }
}
