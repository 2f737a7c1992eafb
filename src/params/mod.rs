//! Parameter schema and validation for pipeline steps.
//!
//! Each step kind declares the parameters it accepts as a list of
//! [`ParameterDef`]s. Persisted configuration arrives as a raw
//! string-to-string map; [`validate`] turns it into a [`ValidatedParams`]
//! set or a list of per-key errors. Validation never short-circuits: an
//! operator sees every misconfigured key in one pass.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Separator for multi-valued choice parameters in their persisted form.
pub const MULTI_CHOICE_SEPARATOR: char = ',';

/// Type (and constraints) of one step parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ParameterType {
    String,
    Int { min: i64, max: i64 },
    Decimal { min: f64, max: f64 },
    Bool,
    Choice(Vec<String>),
    MultiChoice(Vec<String>),
}

/// One configurable input of a step kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    pub key: String,
    pub name: String,
    pub description: String,
    pub param_type: ParameterType,
    pub required: bool,
    pub default: Option<String>,
    pub group: Option<String>,
}

impl ParameterDef {
    pub fn new(key: &str, name: &str, description: &str, param_type: ParameterType) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            param_type,
            required: false,
            default: None,
            group: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }
}

/// A validated parameter value. Only ever constructed by [`validate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Decimal(f64),
    Bool(bool),
    Choice(String),
    MultiChoice(Vec<String>),
}

/// A validation error for a single parameter key.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamError {
    pub key: String,
    pub message: String,
}

impl ParamError {
    fn new(key: &str, message: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Validated parameters for one step instance.
///
/// Contains every required key and only keys declared in the schema.
/// Accessors fall back to a caller-supplied default when a key is absent,
/// so optional parameters without declared defaults stay cheap to read.
#[derive(Debug, Clone, Default)]
pub struct ValidatedParams {
    values: HashMap<String, ParamValue>,
}

impl ValidatedParams {
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn str_or(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(ParamValue::Str(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(ParamValue::Int(i)) => *i,
            _ => default,
        }
    }

    pub fn decimal_or(&self, key: &str, default: f64) -> f64 {
        match self.values.get(key) {
            Some(ParamValue::Decimal(d)) => *d,
            _ => default,
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(ParamValue::Bool(b)) => *b,
            _ => default,
        }
    }

    pub fn choice_or(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(ParamValue::Choice(c)) => c.clone(),
            _ => default.to_string(),
        }
    }

    pub fn choices(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(ParamValue::MultiChoice(cs)) => cs.clone(),
            _ => Vec::new(),
        }
    }
}

/// Validate a raw string map against a parameter schema.
///
/// All errors across all parameters are collected before returning; the
/// output never contains keys outside the schema.
pub fn validate(
    schema: &[ParameterDef],
    raw: &HashMap<String, String>,
) -> Result<ValidatedParams, Vec<ParamError>> {
    let mut values = HashMap::new();
    let mut errors = Vec::new();

    for def in schema {
        let raw_value = raw.get(&def.key);

        match raw_value {
            Some(value) => match parse_value(def, value) {
                Ok(parsed) => {
                    values.insert(def.key.clone(), parsed);
                }
                Err(err) => errors.push(err),
            },
            None if def.required => {
                errors.push(ParamError::new(&def.key, "required parameter is missing"));
            }
            None => {
                // Optional and absent: substitute the declared default, or
                // omit the key entirely when there is none.
                if let Some(default) = &def.default {
                    match parse_value(def, default) {
                        Ok(parsed) => {
                            values.insert(def.key.clone(), parsed);
                        }
                        Err(err) => errors.push(ParamError::new(
                            &def.key,
                            format!("invalid default value: {}", err.message),
                        )),
                    }
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(ValidatedParams { values })
    } else {
        Err(errors)
    }
}

fn parse_value(def: &ParameterDef, raw: &str) -> Result<ParamValue, ParamError> {
    match &def.param_type {
        ParameterType::String => Ok(ParamValue::Str(raw.to_string())),

        ParameterType::Int { min, max } => {
            let value: i64 = raw
                .trim()
                .parse()
                .map_err(|_| ParamError::new(&def.key, format!("'{}' is not an integer", raw)))?;
            if value < *min || value > *max {
                return Err(ParamError::new(
                    &def.key,
                    format!("{} is outside the range [{}, {}]", value, min, max),
                ));
            }
            Ok(ParamValue::Int(value))
        }

        ParameterType::Decimal { min, max } => {
            let value: f64 = raw
                .trim()
                .parse()
                .map_err(|_| ParamError::new(&def.key, format!("'{}' is not a number", raw)))?;
            if value < *min || value > *max {
                return Err(ParamError::new(
                    &def.key,
                    format!("{} is outside the range [{}, {}]", value, min, max),
                ));
            }
            Ok(ParamValue::Decimal(value))
        }

        ParameterType::Bool => match raw {
            "true" => Ok(ParamValue::Bool(true)),
            "false" => Ok(ParamValue::Bool(false)),
            other => Err(ParamError::new(
                &def.key,
                format!("'{}' is not 'true' or 'false'", other),
            )),
        },

        ParameterType::Choice(options) => {
            if options.iter().any(|o| o == raw) {
                Ok(ParamValue::Choice(raw.to_string()))
            } else {
                Err(ParamError::new(
                    &def.key,
                    format!("'{}' is not one of: {}", raw, options.join(", ")),
                ))
            }
        }

        ParameterType::MultiChoice(options) => {
            // Unrecognized entries are dropped silently; the field only
            // fails when nothing valid remains.
            let selected: Vec<String> = raw
                .split(MULTI_CHOICE_SEPARATOR)
                .map(str::trim)
                .filter(|entry| options.iter().any(|o| o == entry))
                .map(str::to_string)
                .collect();

            if selected.is_empty() {
                Err(ParamError::new(
                    &def.key,
                    format!("no valid selection in '{}'; options: {}", raw, options.join(", ")),
                ))
            } else {
                Ok(ParamValue::MultiChoice(selected))
            }
        }
    }
}
