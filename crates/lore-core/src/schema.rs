//! Versioned schema registry — the catalog of valid entity types and fields.
//!
//! The registry is an explicit configuration object handed into every
//! validation call, never ambient global state, so multiple versions can
//! coexist during a migration window. Each version names a generic fallback
//! entity type: inputs claiming an unknown type validate against it instead
//! of being discarded. That fallback is a visibility mechanism, not a
//! substitute for proper schema modeling.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─── Field schemas ───────────────────────────────────────────────────────────

/// Value type a field accepts. `Any` disables type checking for the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
  Text,
  Integer,
  Number,
  Boolean,
  /// Calendar date, normalised to `YYYY-MM-DD`.
  Date,
  /// Instant in time, normalised to RFC 3339 UTC.
  Timestamp,
  /// Arbitrary JSON accepted verbatim.
  Json,
  Any,
}

/// Declaration of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
  #[serde(rename = "type")]
  pub field_type: FieldType,
  /// Upper bound on text length, where the type carries text.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_len:    Option<usize>,
}

impl FieldSchema {
  pub fn of(field_type: FieldType) -> Self {
    Self { field_type, max_len: None }
  }
}

/// Declaration of one entity type within a schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
  pub fields:         BTreeMap<String, FieldSchema>,
  /// Field the interpretation engine's resolution heuristic matches on.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub identity_field: Option<String>,
  /// An open type accepts undeclared fields as [`FieldType::Any`] instead of
  /// rejecting them. Used by the generic fallback type.
  #[serde(default)]
  pub open:           bool,
}

/// One complete version of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
  pub entity_types:  BTreeMap<String, EntitySchema>,
  /// Entity type unknown type names validate against. Must exist in
  /// `entity_types` and be open.
  pub fallback_type: String,
}

// ─── Validation outcome ──────────────────────────────────────────────────────

/// Result of validating a single candidate field value.
///
/// Rejection is data, not an error: the interpretation engine turns it into a
/// RawFragment while the correction service turns it into
/// [`Error::SchemaViolation`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldCheck {
  Accepted {
    /// The value to persist. May differ from the input when an explicit
    /// coercion applied (trimming, numeric strings, date normalisation).
    value:   serde_json::Value,
    coerced: bool,
  },
  Rejected { reason: String },
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Versioned catalog of entity types. Construct via [`SchemaRegistry::builtin`]
/// or [`SchemaRegistry::from_json`]; invariants are checked on construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRegistry {
  versions: BTreeMap<u32, SchemaVersion>,
  active:   u32,
}

impl SchemaRegistry {
  pub fn new(versions: BTreeMap<u32, SchemaVersion>, active: u32) -> Result<Self> {
    let registry = Self { versions, active };
    registry.check_invariants()?;
    Ok(registry)
  }

  /// Deserialise a registry from operator-supplied JSON and validate it.
  pub fn from_json(json: &str) -> Result<Self> {
    let registry: Self = serde_json::from_str(json)
      .map_err(|e| Error::Validation(format!("malformed schema registry: {e}")))?;
    registry.check_invariants()?;
    Ok(registry)
  }

  fn check_invariants(&self) -> Result<()> {
    if !self.versions.contains_key(&self.active) {
      return Err(Error::Validation(format!(
        "active schema version {} is not defined",
        self.active
      )));
    }
    for (version, def) in &self.versions {
      let Some(fallback) = def.entity_types.get(&def.fallback_type) else {
        return Err(Error::Validation(format!(
          "schema version {version}: fallback type {:?} is not defined",
          def.fallback_type
        )));
      };
      if !fallback.open {
        return Err(Error::Validation(format!(
          "schema version {version}: fallback type {:?} must be open",
          def.fallback_type
        )));
      }
    }
    Ok(())
  }

  pub fn active_version(&self) -> u32 {
    self.active
  }

  pub fn version(&self, version: u32) -> Result<&SchemaVersion> {
    self.versions.get(&version).ok_or_else(|| {
      Error::Validation(format!("unknown schema version {version}"))
    })
  }

  /// Look up the schema for `entity_type`, falling back to the version's
  /// generic type for unknown names. The second value is `true` when the
  /// fallback was used.
  pub fn entity_schema(
    &self,
    version: u32,
    entity_type: &str,
  ) -> Result<(&EntitySchema, bool)> {
    let def = self.version(version)?;
    match def.entity_types.get(entity_type) {
      Some(schema) => Ok((schema, false)),
      None => match def.entity_types.get(&def.fallback_type) {
        Some(fallback) => Ok((fallback, true)),
        // Unreachable for registries built through `new`/`from_json`.
        None => Err(Error::Validation(format!(
          "schema version {version} has no fallback type"
        ))),
      },
    }
  }

  /// Identity field of `entity_type` at `version`, if it declares one.
  pub fn identity_field(&self, version: u32, entity_type: &str) -> Option<&str> {
    let def = self.versions.get(&version)?;
    def
      .entity_types
      .get(entity_type)
      .and_then(|schema| schema.identity_field.as_deref())
  }

  /// Validate one candidate field value against `entity_type` at `version`.
  ///
  /// Returns `Err` only for an unknown schema version; a value that does not
  /// fit the schema comes back as [`FieldCheck::Rejected`].
  pub fn validate_field(
    &self,
    version: u32,
    entity_type: &str,
    field: &str,
    value: &serde_json::Value,
  ) -> Result<FieldCheck> {
    let (schema, _) = self.entity_schema(version, entity_type)?;

    let Some(decl) = schema.fields.get(field) else {
      if schema.open {
        return Ok(FieldCheck::Accepted { value: value.clone(), coerced: false });
      }
      return Ok(FieldCheck::Rejected {
        reason: format!("unknown field {field:?} for entity type {entity_type:?}"),
      });
    };

    Ok(check_value(decl, value))
  }

  /// Built-in version 1 catalog.
  pub fn builtin() -> Self {
    let mut entity_types = BTreeMap::new();

    entity_types.insert("person".to_string(), EntitySchema {
      fields:         fields([
        ("name", FieldSchema { field_type: FieldType::Text, max_len: Some(512) }),
        ("email", FieldSchema::of(FieldType::Text)),
        ("phone", FieldSchema::of(FieldType::Text)),
        ("birthday", FieldSchema::of(FieldType::Date)),
        ("employer", FieldSchema::of(FieldType::Text)),
        ("title", FieldSchema::of(FieldType::Text)),
        ("notes", FieldSchema { field_type: FieldType::Text, max_len: Some(8192) }),
      ]),
      identity_field: Some("name".to_string()),
      open:           false,
    });

    entity_types.insert("organization".to_string(), EntitySchema {
      fields:         fields([
        ("name", FieldSchema { field_type: FieldType::Text, max_len: Some(512) }),
        ("domain", FieldSchema::of(FieldType::Text)),
        ("industry", FieldSchema::of(FieldType::Text)),
        ("notes", FieldSchema { field_type: FieldType::Text, max_len: Some(8192) }),
      ]),
      identity_field: Some("name".to_string()),
      open:           false,
    });

    entity_types.insert("account".to_string(), EntitySchema {
      fields:         fields([
        ("provider", FieldSchema::of(FieldType::Text)),
        ("username", FieldSchema::of(FieldType::Text)),
        ("url", FieldSchema::of(FieldType::Text)),
        ("opened_on", FieldSchema::of(FieldType::Date)),
        ("balance", FieldSchema::of(FieldType::Number)),
      ]),
      identity_field: Some("provider".to_string()),
      open:           false,
    });

    entity_types.insert("event".to_string(), EntitySchema {
      fields:         fields([
        ("title", FieldSchema { field_type: FieldType::Text, max_len: Some(512) }),
        ("occurred_at", FieldSchema::of(FieldType::Timestamp)),
        ("location", FieldSchema::of(FieldType::Text)),
        ("amount", FieldSchema::of(FieldType::Number)),
        ("confirmed", FieldSchema::of(FieldType::Boolean)),
        ("notes", FieldSchema { field_type: FieldType::Text, max_len: Some(8192) }),
      ]),
      identity_field: Some("title".to_string()),
      open:           false,
    });

    // Generic fallback: everything lands, nothing is typed.
    entity_types.insert("record".to_string(), EntitySchema {
      fields:         BTreeMap::new(),
      identity_field: None,
      open:           true,
    });

    let version = SchemaVersion {
      entity_types,
      fallback_type: "record".to_string(),
    };

    // Hand-assembled, so invariants hold without the runtime check. A unit
    // test asserts this stays true.
    Self { versions: BTreeMap::from([(1, version)]), active: 1 }
  }
}

fn fields<const N: usize>(
  decls: [(&str, FieldSchema); N],
) -> BTreeMap<String, FieldSchema> {
  decls
    .into_iter()
    .map(|(name, schema)| (name.to_string(), schema))
    .collect()
}

// ─── Value checking ──────────────────────────────────────────────────────────

/// Check one value against one declaration. Coercions are deliberate and
/// visible in the outcome: trimmed text, numeric strings, vCard-style
/// `YYYYMMDD` dates, RFC 3339 timestamps renormalised to UTC.
fn check_value(decl: &FieldSchema, value: &serde_json::Value) -> FieldCheck {
  use serde_json::Value;

  let rejected = |reason: String| FieldCheck::Rejected { reason };

  match decl.field_type {
    FieldType::Any | FieldType::Json => {
      FieldCheck::Accepted { value: value.clone(), coerced: false }
    }

    FieldType::Text => match value {
      Value::String(s) => {
        let trimmed = s.trim();
        if let Some(max) = decl.max_len
          && trimmed.chars().count() > max
        {
          return rejected(format!("text exceeds max length {max}"));
        }
        FieldCheck::Accepted {
          value:   Value::String(trimmed.to_string()),
          coerced: trimmed != s,
        }
      }
      other => rejected(format!("expected text, got {}", type_name(other))),
    },

    FieldType::Integer => match value {
      Value::Number(n) if n.is_i64() || n.is_u64() => {
        FieldCheck::Accepted { value: value.clone(), coerced: false }
      }
      Value::Number(_) => rejected("expected integer, got fractional number".to_string()),
      Value::String(s) => match s.trim().parse::<i64>() {
        Ok(n) => FieldCheck::Accepted { value: Value::from(n), coerced: true },
        Err(_) => rejected(format!("expected integer, got string {s:?}")),
      },
      other => rejected(format!("expected integer, got {}", type_name(other))),
    },

    FieldType::Number => match value {
      Value::Number(_) => FieldCheck::Accepted { value: value.clone(), coerced: false },
      Value::String(s) => match s.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => match serde_json::Number::from_f64(n) {
          Some(num) => {
            FieldCheck::Accepted { value: Value::Number(num), coerced: true }
          }
          None => rejected(format!("non-finite number {s:?}")),
        },
        _ => rejected(format!("expected number, got string {s:?}")),
      },
      other => rejected(format!("expected number, got {}", type_name(other))),
    },

    FieldType::Boolean => match value {
      Value::Bool(_) => FieldCheck::Accepted { value: value.clone(), coerced: false },
      Value::String(s) => match s.trim() {
        "true" => FieldCheck::Accepted { value: Value::Bool(true), coerced: true },
        "false" => {
          FieldCheck::Accepted { value: Value::Bool(false), coerced: true }
        }
        _ => rejected(format!("expected boolean, got string {s:?}")),
      },
      other => rejected(format!("expected boolean, got {}", type_name(other))),
    },

    FieldType::Date => match value {
      Value::String(s) => {
        let trimmed = s.trim();
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
          let normalised = date.format("%Y-%m-%d").to_string();
          FieldCheck::Accepted {
            coerced: normalised != *s,
            value:   Value::String(normalised),
          }
        } else if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
          FieldCheck::Accepted {
            value:   Value::String(date.format("%Y-%m-%d").to_string()),
            coerced: true,
          }
        } else {
          rejected(format!("expected YYYY-MM-DD date, got {s:?}"))
        }
      }
      other => rejected(format!("expected date string, got {}", type_name(other))),
    },

    FieldType::Timestamp => match value {
      Value::String(s) => match DateTime::parse_from_rfc3339(s.trim()) {
        Ok(dt) => {
          let normalised = dt.with_timezone(&Utc).to_rfc3339();
          FieldCheck::Accepted {
            coerced: normalised != *s,
            value:   Value::String(normalised),
          }
        }
        Err(_) => rejected(format!("expected RFC 3339 timestamp, got {s:?}")),
      },
      other => {
        rejected(format!("expected timestamp string, got {}", type_name(other)))
      }
    },
  }
}

fn type_name(value: &serde_json::Value) -> &'static str {
  use serde_json::Value;
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn registry() -> SchemaRegistry {
    SchemaRegistry::builtin()
  }

  #[test]
  fn builtin_is_well_formed() {
    let r = registry();
    r.check_invariants().expect("builtin passes its own invariants");
    assert_eq!(r.active_version(), 1);
    let (schema, fallback) = r.entity_schema(1, "person").unwrap();
    assert!(!fallback);
    assert_eq!(schema.identity_field.as_deref(), Some("name"));
  }

  #[test]
  fn unknown_entity_type_resolves_to_fallback() {
    let r = registry();
    let (schema, fallback) = r.entity_schema(1, "starship").unwrap();
    assert!(fallback);
    assert!(schema.open);

    // Anything validates on the fallback type.
    let check = r
      .validate_field(1, "starship", "warp_factor", &json!(9.6))
      .unwrap();
    assert!(matches!(check, FieldCheck::Accepted { coerced: false, .. }));
  }

  #[test]
  fn unknown_field_on_known_type_is_rejected() {
    let r = registry();
    let check = r
      .validate_field(1, "person", "shoe_size", &json!(43))
      .unwrap();
    assert!(matches!(check, FieldCheck::Rejected { .. }));
  }

  #[test]
  fn unknown_version_is_an_error() {
    let r = registry();
    let err = r
      .validate_field(9, "person", "name", &json!("Alice"))
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[test]
  fn text_is_trimmed_and_marked_coerced() {
    let r = registry();
    let check = r
      .validate_field(1, "person", "name", &json!("  Alice Liddell "))
      .unwrap();
    let FieldCheck::Accepted { value, coerced } = check else {
      panic!("rejected")
    };
    assert_eq!(value, json!("Alice Liddell"));
    assert!(coerced);
  }

  #[test]
  fn text_over_max_len_is_rejected() {
    let r = registry();
    let long = "x".repeat(513);
    let check = r.validate_field(1, "person", "name", &json!(long)).unwrap();
    assert!(matches!(check, FieldCheck::Rejected { .. }));
  }

  #[test]
  fn integer_accepts_numeric_string_as_coercion() {
    let decl = FieldSchema::of(FieldType::Integer);
    let check = check_value(&decl, &json!("42"));
    assert_eq!(check, FieldCheck::Accepted { value: json!(42), coerced: true });

    let check = check_value(&decl, &json!(42));
    assert_eq!(check, FieldCheck::Accepted { value: json!(42), coerced: false });
  }

  #[test]
  fn integer_rejects_fractional_number() {
    let decl = FieldSchema::of(FieldType::Integer);
    assert!(matches!(
      check_value(&decl, &json!(1.5)),
      FieldCheck::Rejected { .. }
    ));
  }

  #[test]
  fn number_accepts_numeric_string() {
    let decl = FieldSchema::of(FieldType::Number);
    let check = check_value(&decl, &json!("19.99"));
    assert!(matches!(check, FieldCheck::Accepted { coerced: true, .. }));
  }

  #[test]
  fn boolean_accepts_literal_strings_only() {
    let decl = FieldSchema::of(FieldType::Boolean);
    assert!(matches!(
      check_value(&decl, &json!("true")),
      FieldCheck::Accepted { coerced: true, .. }
    ));
    assert!(matches!(
      check_value(&decl, &json!("yes")),
      FieldCheck::Rejected { .. }
    ));
  }

  #[test]
  fn date_accepts_compact_form_as_coercion() {
    let decl = FieldSchema::of(FieldType::Date);
    let check = check_value(&decl, &json!("19520301"));
    assert_eq!(
      check,
      FieldCheck::Accepted { value: json!("1952-03-01"), coerced: true }
    );

    assert!(matches!(
      check_value(&decl, &json!("March 1st")),
      FieldCheck::Rejected { .. }
    ));
  }

  #[test]
  fn timestamp_renormalises_to_utc() {
    let decl = FieldSchema::of(FieldType::Timestamp);
    let check = check_value(&decl, &json!("2026-01-15T10:00:00+02:00"));
    let FieldCheck::Accepted { value, coerced } = check else {
      panic!("rejected")
    };
    assert_eq!(value, json!("2026-01-15T08:00:00+00:00"));
    assert!(coerced);
  }

  #[test]
  fn registry_json_round_trip() {
    let r = registry();
    let json = serde_json::to_string(&r).unwrap();
    let back = SchemaRegistry::from_json(&json).unwrap();
    assert_eq!(back.active_version(), 1);
    assert!(back.identity_field(1, "person").is_some());
  }

  #[test]
  fn from_json_rejects_missing_fallback() {
    let bad = r#"{
      "active": 1,
      "versions": {
        "1": { "entity_types": {}, "fallback_type": "record" }
      }
    }"#;
    assert!(SchemaRegistry::from_json(bad).is_err());
  }
}
