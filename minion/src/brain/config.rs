//! Brain configuration: model registry, worker defaults, check/improve
//! budgets, interpreter knobs.
//!
//! Resolution order: explicit constructor arguments win over the project
//! config file, which wins over the user (XDG) config file, which wins over
//! plain environment defaults. `.env` files listed in `env_file` are applied
//! first, in declared order (later files override earlier ones), and every
//! string value supports `${VAR}` interpolation from the process
//! environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::MinionError;
use crate::interpreter::InterpreterConfig;
use crate::worker::{Aggregation, EnsembleMember};

/// One model alias entry: how to reach a backend.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    pub api_type: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Check/improve loop budgets.
#[derive(Clone, Debug)]
pub struct CheckConfig {
    pub enabled: bool,
    pub acceptance_threshold: f64,
    pub max_improve_rounds: usize,
    /// Numeric comparison tolerance for test-based checkers.
    pub tolerance: f64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            acceptance_threshold: 0.8,
            max_improve_rounds: 3,
            tolerance: 1e-6,
        }
    }
}

/// Process-wide brain configuration.
#[derive(Clone, Debug)]
pub struct BrainConfig {
    /// Model alias → provider descriptor.
    pub models: HashMap<String, ModelDescriptor>,
    pub default_model: Option<String>,
    /// Route used when the caller specifies none and no ensemble is set.
    pub default_route: Option<String>,
    /// Template for the `native` worker; `{query}` is replaced.
    pub native_template: String,
    /// Samples for the self-consistency (`dcot`) worker.
    pub dcot_samples: usize,
    /// Retry rounds for the code/python workers.
    pub max_code_rounds: usize,
    /// Sub-worker route for plan tasks without an explicit one.
    pub plan_default_route: String,
    /// Ensemble membership; empty means the moderator routes instead.
    pub ensemble: Vec<EnsembleMember>,
    pub ensemble_aggregation: Aggregation,
    pub check: CheckConfig,
    pub interpreter: InterpreterConfig,
    pub temperature: Option<f32>,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            models: HashMap::new(),
            default_model: None,
            default_route: None,
            native_template: "{query}".to_string(),
            dcot_samples: 5,
            max_code_rounds: 3,
            plan_default_route: "raw".to_string(),
            ensemble: Vec::new(),
            ensemble_aggregation: Aggregation::Majority,
            check: CheckConfig::default(),
            interpreter: InterpreterConfig::default(),
            temperature: None,
        }
    }
}

/// On-disk shape of a config file.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    models: HashMap<String, ModelDescriptor>,
    /// Ordered `.env` list; later files override earlier ones.
    #[serde(default)]
    env_file: Vec<PathBuf>,
    #[serde(default)]
    defaults: ConfigDefaults,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDefaults {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    route: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    acceptance_threshold: Option<f64>,
    #[serde(default)]
    max_improve_rounds: Option<usize>,
}

impl BrainConfig {
    /// Loads configuration: user (XDG) config first, then the project file
    /// overriding it, then `${VAR}` interpolation on all string values.
    pub fn load(project_file: Option<&Path>) -> Result<Self, MinionError> {
        let mut merged = ConfigFile::default();

        if let Some(user_file) = user_config_path() {
            if user_file.is_file() {
                merge(&mut merged, read_config(&user_file)?);
            }
        }
        if let Some(path) = project_file {
            if path.is_file() {
                merge(&mut merged, read_config(path)?);
            } else {
                return Err(MinionError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
        }

        // .env files in declared order, later overriding earlier; existing
        // process env still wins
        let env_refs: Vec<&Path> = merged.env_file.iter().map(PathBuf::as_path).collect();
        let file_env = env_config::load_env_files(&env_refs)
            .map_err(|e| MinionError::Config(e.to_string()))?;
        for (key, value) in file_env {
            if std::env::var(&key).is_err() {
                std::env::set_var(key, value);
            }
        }

        let mut config = BrainConfig {
            default_model: merged.defaults.model,
            default_route: merged.defaults.route,
            temperature: merged.defaults.temperature,
            ..Default::default()
        };
        if let Some(t) = merged.defaults.acceptance_threshold {
            config.check.acceptance_threshold = t;
        }
        if let Some(r) = merged.defaults.max_improve_rounds {
            config.check.max_improve_rounds = r;
        }
        for (alias, mut descriptor) in merged.models {
            descriptor.model = env_config::interpolate(&descriptor.model);
            descriptor.base_url = descriptor.base_url.map(|s| env_config::interpolate(&s));
            descriptor.api_key = descriptor.api_key.map(|s| env_config::interpolate(&s));
            config.models.insert(alias, descriptor);
        }
        debug!(models = config.models.len(), "brain config loaded");
        Ok(config)
    }
}

fn user_config_path() -> Option<PathBuf> {
    let config_dir = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs_config_dir()?,
    };
    Some(config_dir.join("minion").join("config.toml"))
}

fn dirs_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
}

fn read_config(path: &Path) -> Result<ConfigFile, MinionError> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| MinionError::Config(format!("{}: {e}", path.display())))
}

fn merge(base: &mut ConfigFile, overlay: ConfigFile) {
    base.models.extend(overlay.models);
    base.env_file.extend(overlay.env_file);
    if overlay.defaults.model.is_some() {
        base.defaults.model = overlay.defaults.model;
    }
    if overlay.defaults.route.is_some() {
        base.defaults.route = overlay.defaults.route;
    }
    if overlay.defaults.temperature.is_some() {
        base.defaults.temperature = overlay.defaults.temperature;
    }
    if overlay.defaults.acceptance_threshold.is_some() {
        base.defaults.acceptance_threshold = overlay.defaults.acceptance_threshold;
    }
    if overlay.defaults.max_improve_rounds.is_some() {
        base.defaults.max_improve_rounds = overlay.defaults.max_improve_rounds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_config_parses_models_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minion.toml");
        std::fs::write(
            &path,
            r#"
[defaults]
model = "main"
route = "code"

[models.main]
api_type = "openai"
model = "gpt-4o-mini"
api_key = "${MINION_TEST_KEY_XYZ}"
"#,
        )
        .unwrap();
        std::env::set_var("MINION_TEST_KEY_XYZ", "sk-test");
        let config = BrainConfig::load(Some(&path)).unwrap();
        std::env::remove_var("MINION_TEST_KEY_XYZ");

        assert_eq!(config.default_model.as_deref(), Some("main"));
        assert_eq!(config.default_route.as_deref(), Some("code"));
        let model = &config.models["main"];
        assert_eq!(model.model, "gpt-4o-mini");
        assert_eq!(model.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn unknown_interpolation_is_left_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minion.toml");
        std::fs::write(
            &path,
            "[models.m]\napi_type = \"openai\"\nmodel = \"${MINION_UNSET_VAR_123}\"\n",
        )
        .unwrap();
        let config = BrainConfig::load(Some(&path)).unwrap();
        assert_eq!(config.models["m"].model, "${MINION_UNSET_VAR_123}");
    }

    #[test]
    fn missing_project_file_is_an_error() {
        let err = BrainConfig::load(Some(Path::new("/nonexistent/minion.toml"))).unwrap_err();
        assert!(matches!(err, MinionError::Config(_)));
    }

    #[test]
    fn env_files_apply_in_order_without_clobbering_env() {
        let dir = tempfile::tempdir().unwrap();
        let env1 = dir.path().join("a.env");
        let env2 = dir.path().join("b.env");
        std::fs::write(&env1, "MINION_CFG_ORDER=first\n").unwrap();
        std::fs::write(&env2, "MINION_CFG_ORDER=second\n").unwrap();
        let path = dir.path().join("minion.toml");
        std::fs::write(
            &path,
            format!(
                "env_file = [{:?}, {:?}]\n",
                env1.display().to_string(),
                env2.display().to_string()
            ),
        )
        .unwrap();
        std::env::remove_var("MINION_CFG_ORDER");
        BrainConfig::load(Some(&path)).unwrap();
        assert_eq!(std::env::var("MINION_CFG_ORDER").as_deref(), Ok("second"));
        std::env::remove_var("MINION_CFG_ORDER");
    }
}
