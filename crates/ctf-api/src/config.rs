use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use ctf_core::CtfValue;
use ctf_runtime::{ExecutorOptions, VariableStore, DEFAULT_POLL_PERIOD, DEFAULT_VERIFY_TIMEOUT};
use serde::{Deserialize, Serialize};

use crate::CtfApiError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeManagerKind {
    #[default]
    Os,
    Stepped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Plugin names that are not registered.
    pub disabled_plugins: Vec<String>,
    pub ctf_verification_poll_period: f64,
    #[serde(alias = "verify_timeout")]
    pub ctf_verification_timeout: f64,
    pub end_test_on_fail: bool,
    pub ignored_instructions: Vec<String>,
    pub delay_between_scripts: f64,
    pub time_manager: TimeManagerKind,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            disabled_plugins: Vec::new(),
            ctf_verification_poll_period: DEFAULT_POLL_PERIOD,
            ctf_verification_timeout: DEFAULT_VERIFY_TIMEOUT,
            end_test_on_fail: false,
            ignored_instructions: Vec::new(),
            delay_between_scripts: 0.0,
            time_manager: TimeManagerKind::Os,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub results_output_dir: Option<PathBuf>,
    pub json_results: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CtfConfig {
    pub core: CoreConfig,
    /// Seed values for the variable store. Kept raw until validation so that
    /// non-scalar entries can be reported by name.
    pub test_variable: BTreeMap<String, serde_json::Value>,
    pub logging: LoggingConfig,
}

impl CtfConfig {
    pub fn from_json_str(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn load(path: &Path) -> Result<Self, CtfApiError> {
        let raw = fs::read_to_string(path).map_err(|source| CtfApiError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&raw).map_err(|source| CtfApiError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        log::info!("Loaded config {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CtfApiError> {
        let core = &self.core;
        if !core.ctf_verification_poll_period.is_finite() || core.ctf_verification_poll_period <= 0.0
        {
            return Err(CtfApiError::invalid_config(
                "core.ctf_verification_poll_period",
                format!("must be positive, got {}", core.ctf_verification_poll_period),
            ));
        }
        for (field, value) in [
            ("core.ctf_verification_timeout", core.ctf_verification_timeout),
            ("core.delay_between_scripts", core.delay_between_scripts),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CtfApiError::invalid_config(
                    field,
                    format!("must not be negative, got {}", value),
                ));
            }
        }
        self.seed_variables().map(|_| ())
    }

    /// Builds the initial variable store from `test_variable`. String values
    /// that read as numbers or booleans are stored with that type.
    pub fn seed_variables(&self) -> Result<VariableStore, CtfApiError> {
        let mut store = VariableStore::new();
        for (name, raw) in &self.test_variable {
            let value = match raw {
                serde_json::Value::Bool(flag) => CtfValue::Bool(*flag),
                serde_json::Value::Number(number) => match number.as_i64() {
                    Some(int) => CtfValue::Int(int),
                    None => CtfValue::Float(number.as_f64().unwrap_or(f64::NAN)),
                },
                serde_json::Value::String(text) => CtfValue::from_literal(text),
                other => {
                    return Err(CtfApiError::invalid_config(
                        format!("test_variable.{}", name),
                        format!("must be an int, float, string or boolean, got {}", other),
                    ))
                }
            };
            store.insert(name.clone(), value);
        }
        Ok(store)
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            verify_timeout: self.core.ctf_verification_timeout,
            end_test_on_fail: self.core.end_test_on_fail,
            ignored_instructions: self
                .core
                .ignored_instructions
                .iter()
                .cloned()
                .collect::<BTreeSet<_>>(),
        }
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    fn parse(source: &str) -> CtfConfig {
        CtfConfig::from_json_str(source).expect("config should parse")
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("{}");
        assert_eq!(config.core.ctf_verification_poll_period, 0.5);
        assert_eq!(config.core.ctf_verification_timeout, 4.0);
        assert_eq!(config.core.time_manager, TimeManagerKind::Os);
        assert!(!config.logging.json_results);
        config.validate().expect("defaults should be valid");
        assert_eq!(config.executor_options(), ExecutorOptions::default());
    }

    #[test]
    fn core_section_and_timeout_alias() {
        let config = parse(
            r#"{
  "core": {
    "disabled_plugins": ["UserIOPlugin"],
    "ctf_verification_poll_period": 0.1,
    "verify_timeout": 2,
    "end_test_on_fail": true,
    "ignored_instructions": ["InsertUserComment"],
    "time_manager": "stepped"
  }
}"#,
        );
        assert_eq!(config.core.disabled_plugins, vec!["UserIOPlugin"]);
        assert_eq!(config.core.time_manager, TimeManagerKind::Stepped);
        let options = config.executor_options();
        assert_eq!(options.verify_timeout, 2.0);
        assert!(options.end_test_on_fail);
        assert!(options.ignored_instructions.contains("InsertUserComment"));
    }

    #[test]
    fn non_positive_poll_period_is_rejected() {
        let config = parse(r#"{"core": {"ctf_verification_poll_period": 0}}"#);
        let error = config.validate().expect_err("zero poll period");
        assert!(matches!(
            error,
            CtfApiError::InvalidConfig { ref field, .. } if field == "core.ctf_verification_poll_period"
        ));
    }

    #[test]
    fn seed_variables_parse_literals() {
        let config = parse(
            r#"{"test_variable": {"a": 10, "b": 1.5, "c": "0x10", "d": "true", "e": "hello", "f": false}}"#,
        );
        let store = config.seed_variables().expect("seeds should load");
        assert_eq!(store.get("a"), Some(&CtfValue::Int(10)));
        assert_eq!(store.get("b"), Some(&CtfValue::Float(1.5)));
        assert_eq!(store.get("c"), Some(&CtfValue::Int(16)));
        assert_eq!(store.get("d"), Some(&CtfValue::Bool(true)));
        assert_eq!(store.get("e"), Some(&CtfValue::from("hello")));
        assert_eq!(store.get("f"), Some(&CtfValue::Bool(false)));
    }

    #[test]
    fn non_scalar_seed_is_rejected() {
        let config = parse(r#"{"test_variable": {"list": [1, 2]}}"#);
        let error = config.validate().expect_err("list seed");
        assert!(error.to_string().contains("test_variable.list"));

        let config = parse(r#"{"test_variable": {"nothing": null}}"#);
        assert!(config.seed_variables().is_err());
    }
}
