use crate::types::Run;
use crate::{Error, Result};
use itertools::Itertools;
use log::info;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::path::Path;

/// Reads a configuration file: an optional top-level `defaults` mapping is
/// deep-merged into every entry of the required `runs` sequence, then each
/// merged record is validated into a [`Run`].
pub fn runs_from_config(path: &Path) -> Result<Vec<Run>> {
    info!("reading config: {}", path.display());
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::ConfigInvalid(format!("cannot read {}: {e}", path.display())))?;
    runs_from_str(&text)
}

pub fn runs_from_str(text: &str) -> Result<Vec<Run>> {
    let doc: Value = serde_yaml::from_str(text)
        .map_err(|e| Error::ConfigInvalid(format!("invalid yaml: {e}")))?;
    let Value::Mapping(mapping) = doc else {
        return Err(Error::ConfigInvalid(
            "the top level must be a mapping with a runs sequence".into(),
        ));
    };
    for key in mapping.keys() {
        match key.as_str() {
            Some("defaults") | Some("runs") => {}
            other => {
                return Err(Error::ConfigInvalid(format!(
                    "unknown top-level field: {}",
                    other.unwrap_or("<non-string>")
                )))
            }
        }
    }
    let defaults = mapping
        .get("defaults")
        .cloned()
        .unwrap_or(Value::Mapping(Mapping::new()));
    let entries = match mapping.get("runs") {
        Some(Value::Sequence(entries)) if !entries.is_empty() => entries.clone(),
        _ => {
            return Err(Error::ConfigInvalid(
                "runs must be a non-empty sequence".into(),
            ))
        }
    };

    let mut runs = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let merged = deep_merge(&defaults, entry);
        let run: Run = serde_yaml::from_value(merged).map_err(|e| {
            Error::ConfigInvalid(format!("error in run #{} config: {e}", index + 1))
        })?;
        run.validate()?;
        runs.push(run);
    }

    let mut seen = HashSet::new();
    if runs.iter().any(|run| !seen.insert(run.id)) {
        return Err(Error::ConfigInvalid(format!(
            "the run ids are not unique: {}",
            runs.iter().map(|r| r.id).join(", ")
        )));
    }
    Ok(runs)
}

/// Mapping-wise recursive merge; the run's own value wins over the default.
fn deep_merge(base: &Value, over: &Value) -> Value {
    match (base, over) {
        (Value::Mapping(base), Value::Mapping(over)) => {
            let mut merged = base.clone();
            for (key, value) in over {
                let value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Mapping(merged)
        }
        _ => over.clone(),
    }
}
