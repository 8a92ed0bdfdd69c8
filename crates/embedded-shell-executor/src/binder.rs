//! Argument binding.
//!
//! Turns the option tokens of a command line into typed values for every
//! parameter a [`CommandDescriptor`] declares:
//!
//! - `-a 5` / `--add1 5` / `--add1=5` bind one option;
//! - collections come from one comma-separated token (`-l 1,2,3`);
//! - maps take `key=value` pairs (`-m a=1,b=2`);
//! - a boolean option with no value binds `true`;
//! - bean parameters gather their fields from their own options.

use std::collections::{BTreeMap, HashMap};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{CommandDescriptor, ParamKind, ParamSpec, ScalarType, ValueType};

/// Binding failure. The invocation never starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("missing required argument: {0}")]
    MissingArgument(String),
    #[error("invalid value for {param}: '{token}' ({reason})")]
    ArgumentFormat {
        param: String,
        token: String,
        reason: String,
    },
    #[error("unknown option or unexpected token: {0}")]
    UnknownOption(String),
}

/// Error reading a bound argument inside a handler.
#[derive(Debug, Error)]
pub enum ArgAccessError {
    #[error("argument not bound: {0}")]
    Missing(String),
    #[error("argument {name} is not a {expected}")]
    Type { name: String, expected: &'static str },
    #[error("argument {name} cannot be converted: {source}")]
    Convert {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A bound argument value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Set(Vec<ArgValue>),
    List(Vec<ArgValue>),
    Map(BTreeMap<String, ArgValue>),
    Bean(BTreeMap<String, ArgValue>),
}

impl ArgValue {
    /// Convert into a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Bound arguments keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    values: HashMap<String, ArgValue>,
}

impl BoundArgs {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// # Errors
    /// Returns error if unbound or not an integer.
    pub fn int(&self, name: &str) -> Result<i64, ArgAccessError> {
        match self.require(name)? {
            ArgValue::Integer(v) => Ok(*v),
            _ => Err(type_error(name, "integer")),
        }
    }

    /// # Errors
    /// Returns error if unbound or not numeric.
    #[allow(clippy::cast_precision_loss)]
    pub fn float(&self, name: &str) -> Result<f64, ArgAccessError> {
        match self.require(name)? {
            ArgValue::Float(v) => Ok(*v),
            ArgValue::Integer(v) => Ok(*v as f64),
            _ => Err(type_error(name, "float")),
        }
    }

    /// # Errors
    /// Returns error if unbound or not a boolean.
    pub fn boolean(&self, name: &str) -> Result<bool, ArgAccessError> {
        match self.require(name)? {
            ArgValue::Boolean(v) => Ok(*v),
            _ => Err(type_error(name, "boolean")),
        }
    }

    /// # Errors
    /// Returns error if unbound or not a string.
    pub fn string(&self, name: &str) -> Result<&str, ArgAccessError> {
        match self.require(name)? {
            ArgValue::String(v) => Ok(v),
            _ => Err(type_error(name, "string")),
        }
    }

    /// Deserialize a bound value (typically a bean or collection) into `T`.
    ///
    /// # Errors
    /// Returns error if unbound or the shape does not match `T`.
    pub fn extract<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArgAccessError> {
        let value = self.require(name)?.to_json();
        serde_json::from_value(value).map_err(|source| ArgAccessError::Convert {
            name: name.to_string(),
            source,
        })
    }

    fn require(&self, name: &str) -> Result<&ArgValue, ArgAccessError> {
        self.values
            .get(name)
            .ok_or_else(|| ArgAccessError::Missing(name.to_string()))
    }

    fn insert(&mut self, name: &str, value: ArgValue) {
        self.values.insert(name.to_string(), value);
    }
}

impl FromIterator<(String, ArgValue)> for BoundArgs {
    fn from_iter<I: IntoIterator<Item = (String, ArgValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn type_error(name: &str, expected: &'static str) -> ArgAccessError {
    ArgAccessError::Type {
        name: name.to_string(),
        expected,
    }
}

/// Location of an option inside a descriptor: a top-level parameter or a bean field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Slot {
    param: usize,
    field: Option<usize>,
}

/// Binds raw tokens against a descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgumentBinder;

impl ArgumentBinder {
    /// Bind `tokens` (everything after the command key).
    ///
    /// # Errors
    /// Returns the first missing, malformed or unknown argument.
    pub fn bind(descriptor: &CommandDescriptor, tokens: &[String]) -> Result<BoundArgs, BindError> {
        let options = option_table(descriptor);
        let raw = collect_raw(descriptor, &options, tokens)?;

        let mut bound = BoundArgs::default();
        for (index, param) in descriptor.params.iter().enumerate() {
            match &param.kind {
                ParamKind::Context(_) => {}
                ParamKind::Value(ty) => {
                    let slot = Slot {
                        param: index,
                        field: None,
                    };
                    if let Some(value) = resolve(param, *ty, raw.get(&slot))? {
                        bound.insert(&param.name, value);
                    }
                }
                ParamKind::Bean(fields) => {
                    let mut bean = BTreeMap::new();
                    for (field_index, field) in fields.iter().enumerate() {
                        let ParamKind::Value(ty) = field.kind else {
                            continue;
                        };
                        let slot = Slot {
                            param: index,
                            field: Some(field_index),
                        };
                        if let Some(value) = resolve(field, ty, raw.get(&slot))? {
                            bean.insert(field.name.clone(), value);
                        }
                    }
                    if param.required && bean.is_empty() {
                        return Err(BindError::MissingArgument(param.name.clone()));
                    }
                    bound.insert(&param.name, ArgValue::Bean(bean));
                }
            }
        }
        Ok(bound)
    }
}

fn option_table<'a>(descriptor: &'a CommandDescriptor) -> HashMap<&'a str, (Slot, &'a ParamSpec)> {
    let mut table = HashMap::new();
    let mut add = |spec: &'a ParamSpec, slot: Slot| {
        for name in spec.short.iter().chain(spec.long.iter()) {
            table.insert(name.as_str(), (slot, spec));
        }
    };
    for (index, param) in descriptor.params.iter().enumerate() {
        match &param.kind {
            ParamKind::Value(_) => add(
                param,
                Slot {
                    param: index,
                    field: None,
                },
            ),
            ParamKind::Bean(fields) => {
                for (field_index, field) in fields.iter().enumerate() {
                    add(
                        field,
                        Slot {
                            param: index,
                            field: Some(field_index),
                        },
                    );
                }
            }
            ParamKind::Context(_) => {}
        }
    }
    table
}

fn collect_raw(
    descriptor: &CommandDescriptor,
    options: &HashMap<&str, (Slot, &ParamSpec)>,
    tokens: &[String],
) -> Result<HashMap<Slot, String>, BindError> {
    let mut raw = HashMap::new();
    let mut iter = tokens.iter().peekable();

    while let Some(token) = iter.next() {
        let Some(stripped) = token
            .strip_prefix("--")
            .or_else(|| token.strip_prefix('-'))
            .filter(|s| !s.is_empty())
        else {
            return Err(BindError::UnknownOption(token.clone()));
        };

        let (name, inline_value) = match stripped.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (stripped, None),
        };
        let Some(&(slot, spec)) = options.get(name) else {
            return Err(BindError::UnknownOption(token.clone()));
        };

        let value = match inline_value {
            Some(value) => value,
            None if is_boolean(spec) => match iter.peek() {
                Some(next) if parse_bool(next).is_some() => iter.next().cloned().unwrap_or_default(),
                _ => "true".to_string(),
            },
            None => match iter.next() {
                Some(next) => next.clone(),
                None => {
                    return Err(BindError::ArgumentFormat {
                        param: spec.name.clone(),
                        token: token.clone(),
                        reason: "option requires a value".to_string(),
                    });
                }
            },
        };

        if raw.insert(slot, value).is_some() {
            tracing::debug!(command = %descriptor.key, option = name, "repeated option, last value wins");
        }
    }
    Ok(raw)
}

const fn is_boolean(spec: &ParamSpec) -> bool {
    matches!(spec.kind, ParamKind::Value(ValueType::Scalar(ScalarType::Boolean)))
}

fn resolve(
    spec: &ParamSpec,
    ty: ValueType,
    raw: Option<&String>,
) -> Result<Option<ArgValue>, BindError> {
    // Defaults only fill in optional parameters.
    let token = match (raw, &spec.default) {
        (Some(token), _) => token,
        (None, _) if spec.required => {
            return Err(BindError::MissingArgument(spec.name.clone()));
        }
        (None, Some(token)) => token,
        (None, None) => return Ok(None),
    };
    parse_value(ty, token)
        .map(Some)
        .map_err(|reason| BindError::ArgumentFormat {
            param: spec.name.clone(),
            token: token.clone(),
            reason,
        })
}

fn parse_value(ty: ValueType, token: &str) -> Result<ArgValue, String> {
    match ty {
        ValueType::Scalar(scalar) => parse_scalar(scalar, token),
        ValueType::List(scalar) => split_items(token)
            .map(|item| parse_scalar(scalar, item))
            .collect::<Result<Vec<_>, _>>()
            .map(ArgValue::List),
        ValueType::Set(scalar) => {
            let mut items: Vec<ArgValue> = Vec::new();
            for item in split_items(token) {
                let value = parse_scalar(scalar, item)?;
                if !items.contains(&value) {
                    items.push(value);
                }
            }
            Ok(ArgValue::Set(items))
        }
        ValueType::Map(scalar) => {
            let mut map = BTreeMap::new();
            for item in split_items(token) {
                let (key, value) = item
                    .split_once('=')
                    .ok_or_else(|| format!("expected key=value, got '{item}'"))?;
                map.insert(key.trim().to_string(), parse_scalar(scalar, value.trim())?);
            }
            Ok(ArgValue::Map(map))
        }
    }
}

fn split_items(token: &str) -> impl Iterator<Item = &str> {
    token.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_scalar(scalar: ScalarType, token: &str) -> Result<ArgValue, String> {
    match scalar {
        ScalarType::Integer => token
            .trim()
            .parse::<i64>()
            .map(ArgValue::Integer)
            .map_err(|e| format!("expected integer: {e}")),
        ScalarType::Float => token
            .trim()
            .parse::<f64>()
            .map(ArgValue::Float)
            .map_err(|e| format!("expected float: {e}")),
        ScalarType::Boolean => parse_bool(token)
            .map(ArgValue::Boolean)
            .ok_or_else(|| "expected boolean".to_string()),
        ScalarType::String => Ok(ArgValue::String(token.to_string())),
    }
}

fn parse_bool(token: &str) -> Option<bool> {
    match token.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}
