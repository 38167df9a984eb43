//! Deterministic rule-based extractor for pre-structured inputs.
//!
//! Understands two shapes:
//!
//! - JSON (`application/json`): a single record object or an array of them.
//!   A record object carries `"entity_type"` (or `"type"`) and `"fields"`;
//!   a plain object without those keys is treated as the fields of one
//!   `record` entity.
//! - Line-oriented text: blocks separated by blank lines, one `key: value`
//!   pair per line. A `type` (or `entity_type`) line names the block's
//!   entity type; everything else becomes a string-valued field.
//!
//! Values stay untyped here; typing and coercion are the schema registry's
//! job during validation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use lore_core::{run::ExtractorKind, source::Source};

use crate::extract::{Candidate, ExtractError, Extractor};

/// Entity type assumed when the input does not name one.
const DEFAULT_ENTITY_TYPE: &str = "record";

#[derive(Debug, Clone, Copy, Default)]
pub struct RulesExtractor;

#[async_trait]
impl Extractor for RulesExtractor {
  fn kind(&self) -> ExtractorKind {
    ExtractorKind::Rules
  }

  async fn extract(
    &self,
    source: &Source,
    bytes: &[u8],
  ) -> Result<Vec<Candidate>, ExtractError> {
    let candidates = if source.mime_type == "application/json"
      || source.mime_type.ends_with("+json")
    {
      parse_json(bytes)?
    } else {
      let text = std::str::from_utf8(bytes)
        .map_err(|_| ExtractError::new("input is not valid UTF-8"))?;
      parse_records(text)
    };

    if candidates.is_empty() {
      return Err(ExtractError::new("no structured records found in input"));
    }
    Ok(candidates)
  }
}

// ─── JSON inputs ─────────────────────────────────────────────────────────────

fn parse_json(bytes: &[u8]) -> Result<Vec<Candidate>, ExtractError> {
  let value: serde_json::Value = serde_json::from_slice(bytes)
    .map_err(|e| ExtractError::new(format!("invalid JSON: {e}")))?;

  match value {
    serde_json::Value::Array(items) => {
      items.into_iter().map(candidate_from_json).collect()
    }
    object @ serde_json::Value::Object(_) => {
      Ok(vec![candidate_from_json(object)?])
    }
    other => Err(ExtractError::new(format!(
      "expected a JSON object or array of objects, got {other}"
    ))),
  }
}

fn candidate_from_json(
  value: serde_json::Value,
) -> Result<Candidate, ExtractError> {
  let serde_json::Value::Object(mut map) = value else {
    return Err(ExtractError::new(format!(
      "expected a JSON object, got {value}"
    )));
  };

  let entity_type = map
    .remove("entity_type")
    .or_else(|| map.remove("type"))
    .map(|v| match v {
      serde_json::Value::String(s) => Ok(s),
      other => {
        Err(ExtractError::new(format!("entity type must be a string, got {other}")))
      }
    })
    .transpose()?;

  let fields: BTreeMap<String, serde_json::Value> = match map.remove("fields") {
    Some(serde_json::Value::Object(fields)) => fields.into_iter().collect(),
    Some(other) => {
      return Err(ExtractError::new(format!(
        "\"fields\" must be an object, got {other}"
      )));
    }
    // No explicit fields key: the remaining object IS the field map.
    None => map.into_iter().collect(),
  };

  if fields.is_empty() {
    return Err(ExtractError::new("record has no fields"));
  }

  Ok(Candidate {
    entity_type: entity_type
      .unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string()),
    fields,
  })
}

// ─── Line-oriented inputs ────────────────────────────────────────────────────

/// Parse blank-line-separated `key: value` blocks. Lines without a colon and
/// `#` comments are skipped; blocks that yield no fields are dropped.
fn parse_records(text: &str) -> Vec<Candidate> {
  let mut candidates = Vec::new();

  for block in text.split("\n\n") {
    let mut entity_type = None;
    let mut fields = BTreeMap::new();

    for line in block.lines() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let Some((key, value)) = line.split_once(':') else {
        continue;
      };
      let key = normalise_key(key);
      let value = value.trim();
      if key.is_empty() || value.is_empty() {
        continue;
      }
      if key == "type" || key == "entity_type" {
        entity_type = Some(value.to_lowercase());
      } else {
        fields.insert(key, serde_json::Value::String(value.to_string()));
      }
    }

    if !fields.is_empty() {
      candidates.push(Candidate {
        entity_type: entity_type
          .unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string()),
        fields,
      });
    }
  }

  candidates
}

/// `Full Name` and `full-name` both become `full_name`.
fn normalise_key(key: &str) -> String {
  key
    .trim()
    .to_lowercase()
    .split(|c: char| c.is_whitespace() || c == '-')
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("_")
}
