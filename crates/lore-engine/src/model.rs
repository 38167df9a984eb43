//! Model-backed extractor for unstructured text.
//!
//! Calls a Messages-style HTTP completion API and parses the reply as a JSON
//! array of candidate entities. The call is explicitly non-deterministic; the
//! engine records model, temperature, and the prompt fingerprint on the run
//! so every invocation stays auditable. The HTTP client timeout is the only
//! bound on the call; retry-after-timeout belongs to an operational layer
//! outside this crate.

use std::time::Duration;

use async_trait::async_trait;
use lore_core::{run::ExtractorKind, source::Source};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::extract::{Candidate, ExtractError, Extractor};

const SYSTEM_PROMPT: &str = "\
You extract structured facts from a document. Reply with a JSON array only, \
no prose. Each element is {\"entity_type\": <string>, \"fields\": <object of \
scalar values>}. Prefer the entity types person, organization, account, and \
event; use short snake_case field names. Dates are YYYY-MM-DD, instants are \
RFC 3339. Emit one element per distinct real-world entity mentioned.";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Connection settings for the model extractor, usually deserialised from
/// the server's `[model]` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
  pub api_key:      String,
  pub model:        String,
  #[serde(default = "default_base_url")]
  pub base_url:     String,
  #[serde(default = "default_temperature")]
  pub temperature:  f64,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_base_url() -> String {
  "https://api.anthropic.com".to_string()
}

fn default_temperature() -> f64 {
  0.2
}

fn default_timeout_secs() -> u64 {
  60
}

pub struct ModelExtractor {
  client:      reqwest::Client,
  config:      ModelConfig,
  fingerprint: String,
}

impl ModelExtractor {
  pub fn new(config: ModelConfig) -> Self {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      // Builder only fails on TLS backend misconfiguration.
      .unwrap_or_default();
    Self {
      client,
      config,
      fingerprint: prompt_fingerprint(SYSTEM_PROMPT),
    }
  }
}

/// SHA-256 over the prompt template, lowercase hex.
fn prompt_fingerprint(prompt: &str) -> String {
  hex::encode(Sha256::digest(prompt.as_bytes()))
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessagesResponse {
  content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
  #[serde(default)]
  text: String,
}

#[derive(Deserialize)]
struct WireCandidate {
  entity_type: String,
  fields:      std::collections::BTreeMap<String, serde_json::Value>,
}

// ─── Extractor impl ──────────────────────────────────────────────────────────

#[async_trait]
impl Extractor for ModelExtractor {
  fn kind(&self) -> ExtractorKind {
    ExtractorKind::Model
  }

  fn model(&self) -> Option<String> {
    Some(self.config.model.clone())
  }

  fn temperature(&self) -> Option<f64> {
    Some(self.config.temperature)
  }

  fn prompt_fingerprint(&self) -> Option<String> {
    Some(self.fingerprint.clone())
  }

  async fn extract(
    &self,
    _source: &Source,
    bytes: &[u8],
  ) -> Result<Vec<Candidate>, ExtractError> {
    let text = std::str::from_utf8(bytes)
      .map_err(|_| ExtractError::new("input is not valid UTF-8"))?;

    let body = serde_json::json!({
      "model":       self.config.model,
      "max_tokens":  MAX_TOKENS,
      "temperature": self.config.temperature,
      "system":      SYSTEM_PROMPT,
      "messages":    [{ "role": "user", "content": text }],
    });

    let response = self
      .client
      .post(format!("{}/v1/messages", self.config.base_url))
      .header("x-api-key", &self.config.api_key)
      .header("anthropic-version", ANTHROPIC_VERSION)
      .json(&body)
      .send()
      .await
      .map_err(|e| ExtractError::new(format!("model request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
      let detail = response.text().await.unwrap_or_default();
      return Err(ExtractError::new(format!(
        "model returned {status}: {detail}"
      )));
    }

    let reply: MessagesResponse = response
      .json()
      .await
      .map_err(|e| ExtractError::new(format!("malformed model response: {e}")))?;

    let reply_text = reply
      .content
      .first()
      .map(|block| block.text.as_str())
      .unwrap_or_default();

    parse_reply(reply_text)
  }
}

/// Parse the model's reply into candidates. Tolerates a fenced code block
/// around the JSON but nothing else.
fn parse_reply(reply: &str) -> Result<Vec<Candidate>, ExtractError> {
  let trimmed = reply
    .trim()
    .trim_start_matches("```json")
    .trim_start_matches("```")
    .trim_end_matches("```")
    .trim();

  let wire: Vec<WireCandidate> = serde_json::from_str(trimmed).map_err(|e| {
    ExtractError::new(format!("model reply is not a candidate array: {e}"))
  })?;

  if wire.is_empty() {
    return Err(ExtractError::new("model found no entities in input"));
  }

  Ok(
    wire
      .into_iter()
      .map(|c| Candidate { entity_type: c.entity_type, fields: c.fields })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn reply_parses_with_and_without_fences() {
    let plain = json!([
      { "entity_type": "person", "fields": { "name": "Alice" } }
    ])
    .to_string();

    let candidates = parse_reply(&plain).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].entity_type, "person");

    let fenced = format!("```json\n{plain}\n```");
    assert_eq!(parse_reply(&fenced).unwrap(), candidates);
  }

  #[test]
  fn empty_or_malformed_replies_fail() {
    assert!(parse_reply("[]").is_err());
    assert!(parse_reply("Sure! Here are the entities:").is_err());
  }

  #[test]
  fn fingerprint_is_stable_hex() {
    let a = prompt_fingerprint(SYSTEM_PROMPT);
    let b = prompt_fingerprint(SYSTEM_PROMPT);
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
  }
}
