//! Instance Payloads
//!
//! Each instance node in the coordination store carries a JSON document
//! describing one running endpoint:
//!
//! ```json
//! {"host": "10.0.0.1", "port": 8080, "name": "checkout-1", "weight": 2}
//! ```
//!
//! `host` and `port` are required. `name` defaults to empty and a missing
//! `weight` marks the instance as unweighted. Unknown keys are ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Validated configuration of a single service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

/// Reasons an instance payload is rejected
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed document: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("document is not an object")]
    NotAnObject,
    #[error("missing required key `{0}`")]
    MissingKey(&'static str),
    #[error("invalid `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

impl InstanceConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            name: String::new(),
            weight: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// `host:port` form of the endpoint
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse and validate a raw instance payload.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let document: Value = serde_json::from_slice(bytes)?;
        let Value::Object(fields) = document else {
            return Err(ParseError::NotAnObject);
        };

        let host = match fields.get("host") {
            None | Some(Value::Null) => return Err(ParseError::MissingKey("host")),
            Some(Value::String(host)) if host.is_empty() => {
                return Err(invalid("host", "must not be empty"))
            }
            Some(Value::String(host)) => host.clone(),
            Some(other) => return Err(invalid("host", format!("expected a string, got {other}"))),
        };

        let port = match fields.get("port") {
            None | Some(Value::Null) => return Err(ParseError::MissingKey("port")),
            Some(value) => integer_field("port", value)
                .and_then(|port| {
                    u16::try_from(port).map_err(|_| invalid("port", format!("{port} is out of range")))
                })?,
        };

        let name = match fields.get("name") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(name)) => name.clone(),
            Some(other) => return Err(invalid("name", format!("expected a string, got {other}"))),
        };

        let weight = optional_weight(&fields)?;

        Ok(Self {
            host,
            port,
            name,
            weight,
        })
    }
}

fn optional_weight(fields: &Map<String, Value>) -> Result<Option<u32>, ParseError> {
    match fields.get("weight") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let weight = integer_field("weight", value)?;
            u32::try_from(weight)
                .map(Some)
                .map_err(|_| invalid("weight", format!("{weight} is not a non-negative 32-bit integer")))
        }
    }
}

/// Accepts integer-valued JSON numbers (`8080` or `8080.0`) and strings
/// holding an integer.
fn integer_field(field: &'static str, value: &Value) -> Result<i64, ParseError> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| invalid(field, format!("{number} is not an integer"))),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(field, format!("{text:?} is not an integer"))),
        other => Err(invalid(field, format!("expected an integer, got {other}"))),
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidField {
        field,
        reason: reason.into(),
    }
}
