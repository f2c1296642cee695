//! Per-workspace configuration: provider catalog, model selection, options.
//!
//! A workspace's config is the global config file deep-merged with the
//! nearest `crush.json` / `.crush.json` found walking upward from the
//! workspace path. Config is a plain value threaded through constructors;
//! nothing here is process-global.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crush_shared::instance::ModelSummary;

pub const CONFIG_FILE: &str = "crush.json";
pub const HIDDEN_CONFIG_FILE: &str = ".crush.json";
pub const DATA_DIR_NAME: &str = ".crush";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub context_window: i64,
    #[serde(default)]
    pub default_max_tokens: i64,
    #[serde(default)]
    pub can_reason: bool,
    #[serde(default)]
    pub cost_per_1m_in: f64,
    #[serde(default)]
    pub cost_per_1m_out: f64,
}

impl ModelConfig {
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            context_window: self.context_window,
            default_max_tokens: self.default_max_tokens,
            can_reason: self.can_reason,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra_params: HashMap<String, String>,
    #[serde(default)]
    pub disable_cache: bool,
    #[serde(default)]
    pub disable_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl ProviderConfig {
    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// Which provider/model the agent uses for a given role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectedModel {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

/// The two model roles the agent drives: `large` for the conversation,
/// `small` for titles and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Large,
    Small,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSelection {
    #[serde(default)]
    pub large: SelectedModel,
    #[serde(default)]
    pub small: SelectedModel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub data_dir: String,
    #[serde(default)]
    pub debug: bool,
    /// The workspace root. Filled in at load time, not read from config files.
    #[serde(default)]
    pub workspace: String,
    /// Project context files (conventions, instructions) the `context` tool
    /// loads on demand, relative to the workspace root.
    #[serde(default)]
    pub context_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub skip_requests: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub models: ModelSelection,
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub permissions: Permissions,
}

impl Config {
    /// Loads the configuration for a workspace: global config merged with the
    /// nearest workspace `crush.json`/`.crush.json` walking upward from
    /// `path`. `$VAR` references in provider credentials resolve against
    /// `env` ("KEY=VALUE" pairs) first, then the process environment.
    pub fn load(path: &Path, data_dir: Option<&str>, debug: bool, env: &[String]) -> Result<Config> {
        let mut merged = global_config_value()?;

        if let Some(workspace) = find_workspace_config(path) {
            let raw = std::fs::read_to_string(&workspace)
                .with_context(|| format!("failed to read {}", workspace.display()))?;
            let value: Value = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", workspace.display()))?;
            merge_values(&mut merged, value);
        }

        let mut cfg: Config = serde_json::from_value(merged).context("invalid configuration")?;

        for (id, provider) in cfg.providers.iter_mut() {
            if provider.id.is_empty() {
                provider.id = id.clone();
            }
            if let Some(key) = provider.api_key.take() {
                provider.api_key = Some(resolve_env_value(&key, env));
            }
            for value in provider.extra_headers.values_mut() {
                *value = resolve_env_value(value, env);
            }
        }

        cfg.options.debug = cfg.options.debug || debug;
        cfg.options.workspace = path.to_string_lossy().to_string();
        cfg.options.data_dir = match data_dir {
            Some(dir) if !dir.is_empty() => dir.to_string(),
            _ if !cfg.options.data_dir.is_empty() => cfg.options.data_dir.clone(),
            _ => path.join(DATA_DIR_NAME).to_string_lossy().to_string(),
        };

        Ok(cfg)
    }

    /// Fatal-at-create validation: every selected model must resolve to a
    /// configured provider and a model it declares.
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            bail!("no providers configured");
        }
        for (role, selected) in [("large", &self.models.large), ("small", &self.models.small)] {
            let provider = self.providers.get(&selected.provider).with_context(|| {
                format!(
                    "{role} model references unknown provider {:?}",
                    selected.provider
                )
            })?;
            if provider.model(&selected.model).is_none() {
                bail!(
                    "{role} model {:?} not found in provider {:?}",
                    selected.model,
                    selected.provider
                );
            }
        }
        Ok(())
    }

    pub fn selected(&self, role: ModelRole) -> &SelectedModel {
        match role {
            ModelRole::Large => &self.models.large,
            ModelRole::Small => &self.models.small,
        }
    }

    pub fn resolve(&self, role: ModelRole) -> Result<(&ProviderConfig, &ModelConfig)> {
        let selected = self.selected(role);
        let provider = self
            .providers
            .get(&selected.provider)
            .with_context(|| format!("unknown provider {:?}", selected.provider))?;
        let model = provider
            .model(&selected.model)
            .with_context(|| format!("unknown model {:?}", selected.model))?;
        Ok((provider, model))
    }

    pub fn data_dir(&self) -> &Path {
        Path::new(&self.options.data_dir)
    }
}

/// Creates the workspace data directory (0700) with a `.gitignore` so the
/// database never ends up in version control.
pub fn ensure_data_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
    }

    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, "*\n")
            .with_context(|| format!("failed to create {}", gitignore.display()))?;
    }
    Ok(())
}

/// The server-global configuration as raw JSON (what `GET /v1/config`
/// returns).
pub fn global_config() -> Result<Value> {
    global_config_value()
}

fn global_config_value() -> Result<Value> {
    let path = match std::env::var("CRUSH_GLOBAL_CONFIG") {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => {
            let Ok(home) = std::env::var("HOME") else {
                return Ok(Value::Object(Default::default()));
            };
            Path::new(&home).join(".config").join("crush").join(CONFIG_FILE)
        }
    };

    if !path.exists() {
        return Ok(Value::Object(Default::default()));
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Walks from `start` upward and returns the nearest config file.
fn find_workspace_config(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in [CONFIG_FILE, HIDDEN_CONFIG_FILE] {
            let candidate = current.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        dir = current.parent();
    }
    None
}

/// Deep merge: objects merge key-wise, everything else is replaced by the
/// overriding value.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay) => *base_slot = overlay,
    }
}

/// Resolves `$VAR` values against the instance env, then the process env.
/// Non-`$` values pass through unchanged.
fn resolve_env_value(value: &str, env: &[String]) -> String {
    let Some(name) = value.strip_prefix('$') else {
        return value.to_string();
    };
    for entry in env {
        if let Some((key, val)) = entry.split_once('=') {
            if key == name {
                return val.to_string();
            }
        }
    }
    std::env::var(name).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_config(dir: &Path, name: &str, value: &Value) {
        std::fs::write(dir.join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn mock_provider_value() -> Value {
        json!({
            "providers": {
                "mock": {
                    "type": "mock",
                    "models": [{"id": "test", "context_window": 8192, "default_max_tokens": 1024}]
                }
            },
            "models": {
                "large": {"provider": "mock", "model": "test"},
                "small": {"provider": "mock", "model": "test"}
            }
        })
    }

    #[test]
    fn walks_upward_for_workspace_config() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), CONFIG_FILE, &mock_provider_value());
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let cfg = Config::load(&nested, None, false, &[]).unwrap();
        assert!(cfg.providers.contains_key("mock"));
        assert_eq!(cfg.models.large.model, "test");
        cfg.validate().unwrap();
    }

    #[test]
    fn hidden_config_file_is_found() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), HIDDEN_CONFIG_FILE, &mock_provider_value());
        let cfg = Config::load(tmp.path(), None, false, &[]).unwrap();
        assert!(cfg.providers.contains_key("mock"));
    }

    #[test]
    fn data_dir_defaults_under_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), CONFIG_FILE, &mock_provider_value());
        let cfg = Config::load(tmp.path(), None, false, &[]).unwrap();
        assert!(cfg.options.data_dir.ends_with(DATA_DIR_NAME));

        let cfg = Config::load(tmp.path(), Some("/tmp/elsewhere"), false, &[]).unwrap();
        assert_eq!(cfg.options.data_dir, "/tmp/elsewhere");
    }

    #[test]
    fn env_references_resolve_from_instance_env() {
        let tmp = tempfile::tempdir().unwrap();
        let mut value = mock_provider_value();
        value["providers"]["mock"]["api_key"] = json!("$MOCK_KEY");
        write_config(tmp.path(), CONFIG_FILE, &value);

        let cfg = Config::load(tmp.path(), None, false, &["MOCK_KEY=sekrit".into()]).unwrap();
        assert_eq!(cfg.providers["mock"].api_key.as_deref(), Some("sekrit"));
    }

    #[test]
    fn validation_rejects_unknown_selection() {
        let tmp = tempfile::tempdir().unwrap();
        let mut value = mock_provider_value();
        value["models"]["large"]["model"] = json!("missing");
        write_config(tmp.path(), CONFIG_FILE, &value);

        let cfg = Config::load(tmp.path(), None, false, &[]).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn deep_merge_prefers_overlay_scalars() {
        let mut base = json!({"options": {"debug": false}, "keep": 1});
        merge_values(&mut base, json!({"options": {"debug": true}}));
        assert_eq!(base["options"]["debug"], true);
        assert_eq!(base["keep"], 1);
    }

    #[test]
    fn ensure_data_dir_writes_gitignore() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(DATA_DIR_NAME);
        ensure_data_dir(&dir).unwrap();
        assert_eq!(std::fs::read_to_string(dir.join(".gitignore")).unwrap(), "*\n");
    }
}
