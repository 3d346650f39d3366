//! Schema Validator
//!
//! Structural conformance of a data message against its channel's schema:
//! required fields are present, primitive types are correct and enumerated
//! values are members of their domain.
//!
//! Schemas are JSON documents under `schemas/`, one per channel. The
//! built-in set is compiled in; a directory can override any of them.
//!
//! # Schema Format
//!
//! ```json
//! {
//!   "channel": "trade",
//!   "fields": {
//!     "type": { "type": "string", "enum": ["snapshot", "update"] },
//!     "data": { "type": "array", "items": { "side": { "type": "string", "enum": ["buy", "sell"] } } }
//!   }
//! }
//! ```
//!
//! Fields are required unless marked `"required": false`. A JSON `null`
//! counts as missing.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::domain::market::Channel;

const BUILTIN_TICKER: &str = include_str!("../../../schemas/ticker.json");
const BUILTIN_BOOK: &str = include_str!("../../../schemas/book.json");
const BUILTIN_OHLC: &str = include_str!("../../../schemas/ohlc.json");
const BUILTIN_TRADE: &str = include_str!("../../../schemas/trade.json");

// =============================================================================
// Schema Documents
// =============================================================================

/// Primitive type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// JSON string.
    String,
    /// Any JSON number.
    Number,
    /// JSON number without fractional part.
    Integer,
    /// JSON boolean.
    Boolean,
    /// JSON array (elements checked against `items` when given).
    Array,
}

impl FieldType {
    /// Schema name of the type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn required_by_default() -> bool {
    true
}

/// Declaration of one field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldSchema {
    /// Expected type.
    #[serde(rename = "type")]
    pub kind: FieldType,
    /// Whether the field must be present.
    #[serde(default = "required_by_default")]
    pub required: bool,
    /// Allowed string values (empty means unrestricted).
    #[serde(default, rename = "enum")]
    pub allowed: Vec<String>,
    /// Fields of each array element (arrays of objects only).
    #[serde(default)]
    pub items: BTreeMap<String, FieldSchema>,
}

/// Structural schema for one channel's messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelSchema {
    /// Channel the schema describes.
    pub channel: Channel,
    /// Top-level message fields.
    pub fields: BTreeMap<String, FieldSchema>,
}

// =============================================================================
// Violations
// =============================================================================

/// What is wrong with a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    /// Required field absent or null.
    Missing,
    /// Value has the wrong primitive type.
    WrongType {
        /// Declared type.
        expected: FieldType,
        /// JSON type observed.
        found: &'static str,
    },
    /// Value where an object was expected.
    NotAnObject {
        /// JSON type observed.
        found: &'static str,
    },
    /// Value outside the enumerated domain.
    NotInEnum {
        /// Observed value.
        value: String,
        /// Allowed values.
        allowed: Vec<String>,
    },
}

/// One structural error, located by a path such as `data[0].bids[3].price`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Location of the field.
    pub path: String,
    /// Problem found.
    pub problem: FieldProblem,
}

impl FieldError {
    /// A missing-field error.
    #[must_use]
    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            problem: FieldProblem::Missing,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            FieldProblem::Missing => write!(f, "{}: missing", self.path),
            FieldProblem::WrongType { expected, found } => {
                write!(f, "{}: expected {expected}, found {found}", self.path)
            }
            FieldProblem::NotAnObject { found } => {
                write!(f, "{}: expected object, found {found}", self.path)
            }
            FieldProblem::NotInEnum { value, allowed } => {
                write!(f, "{}: {value:?} not in {allowed:?}", self.path)
            }
        }
    }
}

/// Structural nonconformance of a message: every field error found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    errors: Vec<FieldError>,
}

impl SchemaViolation {
    /// Wrap a list of field errors.
    #[must_use]
    pub const fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    /// The field errors.
    #[must_use]
    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Whether an error was reported at the given path.
    #[must_use]
    pub fn has_error_at(&self, path: &str) -> bool {
        self.errors.iter().any(|e| e.path == path)
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} field error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaViolation {}

/// Errors loading schema documents.
#[derive(Debug, thiserror::Error)]
pub enum SchemaLoadError {
    /// Schema file could not be read.
    #[error("failed to read schema {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Schema document is not valid.
    #[error("invalid schema {name}: {source}")]
    Parse {
        /// File path or built-in name.
        name: String,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Document declares a different channel than its file name.
    #[error("schema {name} declares channel {found}, expected {expected}")]
    ChannelMismatch {
        /// File path or built-in name.
        name: String,
        /// Channel implied by the file name.
        expected: Channel,
        /// Channel declared in the document.
        found: Channel,
    },
}

// =============================================================================
// Registry
// =============================================================================

/// Per-channel schema set.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<Channel, ChannelSchema>,
}

impl SchemaRegistry {
    /// Load the built-in schemas.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in document does not parse.
    pub fn builtin() -> Result<Self, SchemaLoadError> {
        let mut schemas = HashMap::new();
        for (channel, text) in [
            (Channel::Ticker, BUILTIN_TICKER),
            (Channel::Book, BUILTIN_BOOK),
            (Channel::Candles, BUILTIN_OHLC),
            (Channel::Trade, BUILTIN_TRADE),
        ] {
            let name = format!("builtin:{channel}");
            schemas.insert(channel, parse_schema(&name, channel, text)?);
        }
        Ok(Self { schemas })
    }

    /// Load the built-in schemas, replacing each with `<dir>/<channel>.json`
    /// when that file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an override file cannot be read or parsed.
    pub fn from_dir(dir: &Path) -> Result<Self, SchemaLoadError> {
        let mut registry = Self::builtin()?;
        for channel in Channel::all() {
            let path = dir.join(format!("{}.json", channel.as_str()));
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|source| SchemaLoadError::Io {
                path: path.clone(),
                source,
            })?;
            let schema = parse_schema(&path.display().to_string(), *channel, &text)?;
            tracing::info!(channel = %channel, path = %path.display(), "Loaded schema override");
            registry.schemas.insert(*channel, schema);
        }
        Ok(registry)
    }

    /// Schema for a channel.
    #[must_use]
    pub fn schema(&self, channel: Channel) -> Option<&ChannelSchema> {
        self.schemas.get(&channel)
    }

    /// Validate a full message frame against its channel's schema.
    ///
    /// Every error is collected; validation does not stop at the first.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaViolation`] listing all field errors.
    pub fn validate_schema(&self, channel: Channel, message: &Value) -> Result<(), SchemaViolation> {
        let Some(schema) = self.schemas.get(&channel) else {
            return Ok(());
        };

        let mut errors = Vec::new();
        validate_object(message, &schema.fields, "", &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaViolation::new(errors))
        }
    }
}

fn parse_schema(name: &str, channel: Channel, text: &str) -> Result<ChannelSchema, SchemaLoadError> {
    let schema: ChannelSchema = serde_json::from_str(text).map_err(|source| SchemaLoadError::Parse {
        name: name.to_string(),
        source,
    })?;
    if schema.channel != channel {
        return Err(SchemaLoadError::ChannelMismatch {
            name: name.to_string(),
            expected: channel,
            found: schema.channel,
        });
    }
    Ok(schema)
}

fn validate_object(
    value: &Value,
    fields: &BTreeMap<String, FieldSchema>,
    path: &str,
    errors: &mut Vec<FieldError>,
) {
    let Some(object) = value.as_object() else {
        errors.push(FieldError {
            path: if path.is_empty() { "$".to_string() } else { path.to_string() },
            problem: FieldProblem::NotAnObject {
                found: json_type(value),
            },
        });
        return;
    };

    for (name, field) in fields {
        let field_path = if path.is_empty() {
            name.clone()
        } else {
            format!("{path}.{name}")
        };

        match object.get(name) {
            None | Some(Value::Null) => {
                if field.required {
                    errors.push(FieldError::missing(field_path));
                }
            }
            Some(value) => validate_field(value, field, &field_path, errors),
        }
    }
}

fn validate_field(value: &Value, field: &FieldSchema, path: &str, errors: &mut Vec<FieldError>) {
    if !field.kind.matches(value) {
        errors.push(FieldError {
            path: path.to_string(),
            problem: FieldProblem::WrongType {
                expected: field.kind,
                found: json_type(value),
            },
        });
        return;
    }

    if let Some(text) = value.as_str() {
        if !field.allowed.is_empty() && !field.allowed.iter().any(|a| a == text) {
            errors.push(FieldError {
                path: path.to_string(),
                problem: FieldProblem::NotInEnum {
                    value: text.to_string(),
                    allowed: field.allowed.clone(),
                },
            });
        }
    }

    if let (Some(elements), false) = (value.as_array(), field.items.is_empty()) {
        for (index, element) in elements.iter().enumerate() {
            validate_object(element, &field.items, &format!("{path}[{index}]"), errors);
        }
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
