//! Parsing of `terraform output -json`

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use thiserror::Error;

/// Placeholder surfaced in place of values the tool marks sensitive
pub const SENSITIVE_PLACEHOLDER: &str = "(sensitive)";

/// One entry of the output document
#[derive(Debug, Clone, Deserialize)]
pub struct OutputValue {
    pub value: serde_json::Value,
    #[serde(default, rename = "type")]
    pub value_type: Option<serde_json::Value>,
    #[serde(default)]
    pub sensitive: bool,
}

/// The tool's output document could not be used
#[derive(Error, Debug)]
pub enum OutputParseError {
    #[error("output is not a JSON object of {{value}} entries: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse the `key -> {value, type, sensitive}` document and flatten it to
/// `key -> string`.
///
/// Strings are kept verbatim, other values become compact JSON.
pub fn parse_outputs(raw: &str) -> Result<BTreeMap<String, String>, OutputParseError> {
    let document: HashMap<String, OutputValue> = serde_json::from_str(raw.trim())?;
    Ok(document
        .into_iter()
        .map(|(name, output)| (name, flatten(&output)))
        .collect())
}

fn flatten(output: &OutputValue) -> String {
    if output.sensitive {
        return SENSITIVE_PLACEHOLDER.to_string();
    }
    match &output.value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
