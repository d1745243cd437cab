//! Metadata field coercion and schema validation.
//!
//! A project's `metadata.fields[]` config declares a schema of typed,
//! optionally-constrained fields; this crate turns raw string
//! input into typed [`MetadataValue`]s and checks both raw and
//! already-typed metadata against that schema. Regex patterns are
//! compiled once per pattern string and cached, since the same field
//! schema is applied to every consignment in a batch.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use regex::Regex;

use shipyard_types::{FieldType, ListItemType, Metadata, MetadataField, MetadataValue};

/// Errors surfaced while coercing or validating metadata.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum MetadataError {
    #[error("field {field:?} is required but was not provided")]
    MissingRequiredField { field: String },
    #[error("field {field:?} is required and cannot be empty")]
    CannotBeEmpty { field: String },
    #[error("field {field:?} expected type {expected:?}, got {got:?}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        got: String,
    },
    #[error("field {field:?} value {value:?} does not match pattern {pattern:?}")]
    PatternMismatch {
        field: String,
        pattern: String,
        value: String,
    },
    #[error("field {field:?} pattern {pattern:?} does not compile: {reason}")]
    InvalidPattern {
        field: String,
        pattern: String,
        reason: String,
    },
    #[error("field {field:?} has length {actual}, below minimum {min}")]
    TooShort {
        field: String,
        min: usize,
        actual: usize,
    },
    #[error("field {field:?} has length {actual}, above maximum {max}")]
    TooLong {
        field: String,
        max: usize,
        actual: usize,
    },
    #[error("field {field:?} value {value:?} is not one of the allowed values {allowed:?}")]
    NotAllowed {
        field: String,
        value: String,
        allowed: Vec<String>,
    },
    #[error("field {field:?} value {actual} is below minimum {min}")]
    BelowMin { field: String, min: i64, actual: i64 },
    #[error("field {field:?} value {actual} is above maximum {max}")]
    AboveMax { field: String, max: i64, actual: i64 },
    #[error("field {field:?} has {actual} items, below minimum {min}")]
    TooFewItems {
        field: String,
        min: usize,
        actual: usize,
    },
    #[error("field {field:?} has {actual} items, above maximum {max}")]
    TooManyItems {
        field: String,
        max: usize,
        actual: usize,
    },
}

/// Compiles and caches field patterns, so a schema applied to a whole
/// batch of consignments compiles each distinct pattern exactly once.
#[derive(Default)]
pub struct PatternCache {
    inner: RwLock<BTreeMap<String, Arc<Regex>>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_compile(&self, field: &str, pattern: &str) -> Result<Arc<Regex>, MetadataError> {
        if let Some(re) = self.inner.read().expect("pattern cache lock poisoned").get(pattern) {
            return Ok(re.clone());
        }
        let compiled = Regex::new(pattern).map_err(|e| MetadataError::InvalidPattern {
            field: field.to_string(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let compiled = Arc::new(compiled);
        self.inner
            .write()
            .expect("pattern cache lock poisoned")
            .insert(pattern.to_string(), compiled.clone());
        Ok(compiled)
    }
}

/// Coerces a raw string (e.g. CLI input) into the value shape `field`
/// declares. Lists split on commas and trim whitespace around each item;
/// maps split on commas then `=` for each `key=value` pair.
pub fn coerce(field: &MetadataField, raw: &str) -> Result<MetadataValue, MetadataError> {
    match field.field_type {
        FieldType::String => Ok(MetadataValue::String(raw.to_string())),
        FieldType::Int => raw
            .trim()
            .parse::<i64>()
            .map(MetadataValue::Int)
            .map_err(|_| MetadataError::TypeMismatch {
                field: field.name.clone(),
                expected: FieldType::Int,
                got: raw.to_string(),
            }),
        FieldType::List => {
            if raw.trim().is_empty() {
                return Ok(MetadataValue::List(Vec::new()));
            }
            raw.split(',')
                .map(str::trim)
                .map(|item| coerce_list_item(field, item))
                .collect::<Result<Vec<_>, _>>()
                .map(MetadataValue::List)
        }
        FieldType::Map => {
            let mut map = BTreeMap::new();
            if raw.trim().is_empty() {
                return Ok(MetadataValue::Map(map));
            }
            for pair in raw.split(',') {
                let (key, value) = pair.trim().split_once('=').ok_or_else(|| {
                    MetadataError::TypeMismatch {
                        field: field.name.clone(),
                        expected: FieldType::Map,
                        got: raw.to_string(),
                    }
                })?;
                map.insert(key.trim().to_string(), MetadataValue::String(value.trim().to_string()));
            }
            Ok(MetadataValue::Map(map))
        }
    }
}

fn coerce_list_item(field: &MetadataField, raw: &str) -> Result<MetadataValue, MetadataError> {
    match field.item_type {
        ListItemType::String => Ok(MetadataValue::String(raw.to_string())),
        ListItemType::Int => raw
            .parse::<i64>()
            .map(MetadataValue::Int)
            .map_err(|_| MetadataError::TypeMismatch {
                field: field.name.clone(),
                expected: FieldType::Int,
                got: raw.to_string(),
            }),
    }
}

/// Validates one already-typed value against `field`'s constraints.
/// Accumulates every violation rather than stopping at the first.
pub fn validate_field(
    field: &MetadataField,
    value: &MetadataValue,
    patterns: &PatternCache,
) -> Vec<MetadataError> {
    match (field.field_type, value) {
        (FieldType::String, MetadataValue::String(s)) => validate_string(field, s, patterns),
        (FieldType::Int, MetadataValue::Int(i)) => validate_int(field, *i),
        (FieldType::List, MetadataValue::List(items)) => validate_list(field, items),
        (FieldType::Map, MetadataValue::Map(_)) => Vec::new(),
        (expected, got) => vec![MetadataError::TypeMismatch {
            field: field.name.clone(),
            expected,
            got: got.to_string(),
        }],
    }
}

fn validate_string(field: &MetadataField, value: &str, patterns: &PatternCache) -> Vec<MetadataError> {
    let mut errors = Vec::new();
    let len = value.chars().count();
    if let Some(min) = field.min_length {
        if len < min {
            errors.push(MetadataError::TooShort {
                field: field.name.clone(),
                min,
                actual: len,
            });
        }
    }
    if let Some(max) = field.max_length {
        if len > max {
            errors.push(MetadataError::TooLong {
                field: field.name.clone(),
                max,
                actual: len,
            });
        }
    }
    if let Some(allowed) = &field.allowed_values {
        if !allowed.iter().any(|a| a == value) {
            errors.push(MetadataError::NotAllowed {
                field: field.name.clone(),
                value: value.to_string(),
                allowed: allowed.clone(),
            });
        }
    }
    if let Some(pattern) = &field.pattern {
        match patterns.get_or_compile(&field.name, pattern) {
            Ok(re) => {
                if !re.is_match(value) {
                    errors.push(MetadataError::PatternMismatch {
                        field: field.name.clone(),
                        pattern: pattern.clone(),
                        value: value.to_string(),
                    });
                }
            }
            Err(e) => errors.push(e),
        }
    }
    errors
}

fn validate_int(field: &MetadataField, value: i64) -> Vec<MetadataError> {
    let mut errors = Vec::new();
    if let Some(min) = field.min {
        if value < min {
            errors.push(MetadataError::BelowMin {
                field: field.name.clone(),
                min,
                actual: value,
            });
        }
    }
    if let Some(max) = field.max {
        if value > max {
            errors.push(MetadataError::AboveMax {
                field: field.name.clone(),
                max,
                actual: value,
            });
        }
    }
    errors
}

fn validate_list(field: &MetadataField, items: &[MetadataValue]) -> Vec<MetadataError> {
    let mut errors = Vec::new();
    let count = items.len();
    if let Some(min) = field.min_items {
        if count < min {
            errors.push(MetadataError::TooFewItems {
                field: field.name.clone(),
                min,
                actual: count,
            });
        }
    }
    if let Some(max) = field.max_items {
        if count > max {
            errors.push(MetadataError::TooManyItems {
                field: field.name.clone(),
                max,
                actual: count,
            });
        }
    }
    errors
}

/// A required value that is present but empty fails validation the
/// same as an absent one: an empty string, an empty list, or an
/// empty map.
fn is_empty(value: &MetadataValue) -> bool {
    match value {
        MetadataValue::String(s) => s.is_empty(),
        MetadataValue::List(items) => items.is_empty(),
        MetadataValue::Map(map) => map.is_empty(),
        MetadataValue::Int(_) | MetadataValue::Float(_) | MetadataValue::Bool(_) => false,
    }
}

/// Validates a whole metadata bag against a field schema: fills in
/// declared defaults for missing optional fields, errors on missing
/// required fields, and runs every field's constraints. On success,
/// returns the metadata with defaults filled in; on failure, every
/// violation found across every field.
pub fn validate_all(
    fields: &[MetadataField],
    metadata: &Metadata,
    patterns: &PatternCache,
) -> Result<Metadata, Vec<MetadataError>> {
    let mut errors = Vec::new();
    let mut filled = metadata.clone();

    for field in fields {
        match metadata.get(&field.name) {
            Some(value) => {
                if field.required && is_empty(value) {
                    errors.push(MetadataError::CannotBeEmpty {
                        field: field.name.clone(),
                    });
                } else {
                    errors.extend(validate_field(field, value, patterns));
                }
            }
            None => {
                if field.required {
                    errors.push(MetadataError::MissingRequiredField {
                        field: field.name.clone(),
                    });
                } else if let Some(default) = &field.default {
                    match coerce(field, default) {
                        Ok(value) => {
                            filled.insert(field.name.clone(), value);
                        }
                        Err(e) => errors.push(e),
                    }
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(filled)
    } else {
        Err(errors)
    }
}
