//! Configuration types and loading logic.

use std::path::{Path, PathBuf};

use figment::providers::{Format, Yaml};
use figment::Figment;
use serde::Deserialize;
use serde_json::json;

use crate::providers::{builtin_providers, ProviderPattern};

/// Raw schema of `weaverun.config.yaml`.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    providers: Vec<ProviderEntry>,
    #[serde(default)]
    capture_all_requests: bool,
    #[serde(default)]
    disable_providers: Vec<String>,
    #[serde(default)]
    debug: bool,
}

#[derive(Debug, Deserialize)]
struct ProviderEntry {
    #[serde(default = "default_provider_name")]
    name: String,
    #[serde(default)]
    path_patterns: Vec<String>,
    #[serde(default)]
    host_patterns: Vec<String>,
    #[serde(default = "default_true")]
    is_regex: bool,
}

fn default_provider_name() -> String {
    "custom".to_string()
}

fn default_true() -> bool {
    true
}

/// Effective configuration: custom providers first, then built-ins.
/// Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub providers: Vec<ProviderPattern>,
    pub capture_all_requests: bool,
    pub debug: bool,
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Classify a request. Returns the provider name when the request should
    /// be captured; `capture_all_requests` short-circuits to "custom".
    pub fn is_capturable(&self, path: &str, host: &str) -> Option<String> {
        if self.capture_all_requests {
            return Some("custom".to_string());
        }

        self.providers
            .iter()
            .find(|p| p.matches_path(path) && p.matches_host(host))
            .map(|p| p.name.clone())
    }

    /// Safe-to-expose snapshot for the dashboard config endpoint.
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "capture_all_requests": self.capture_all_requests,
            "debug": self.debug,
            "config_path": self.config_path,
            "providers": self.providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: builtin_providers(),
            capture_all_requests: false,
            debug: false,
            config_path: None,
        }
    }
}

/// Load configuration.
///
/// Config file search order:
/// 1. `WEAVERUN_CONFIG` env var
/// 2. `./weaverun.config.yaml`
/// 3. `~/.weaverun.config.yaml`
///
/// A missing or malformed file is non-fatal; built-ins still apply.
/// `WEAVERUN_DEBUG=1|true|yes` forces debug mode on.
pub fn load_config() -> Config {
    let mut config = match find_config_file() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            load_from_file(&path)
        }
        None => Config::default(),
    };

    if debug_env_enabled() {
        config.debug = true;
    }

    config
}

fn find_config_file() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("WEAVERUN_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Some(path);
        }
    }

    let local = PathBuf::from("weaverun.config.yaml");
    if local.exists() {
        return Some(local);
    }

    let home = dirs::home_dir().map(|h| h.join(".weaverun.config.yaml"));
    home.filter(|p| p.exists())
}

fn load_from_file(path: &Path) -> Config {
    let file: ConfigFile = match Figment::new().merge(Yaml::file(path)).extract() {
        Ok(file) => file,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "failed to load config");
            return Config::default();
        }
    };

    build_config(file, Some(path.to_path_buf()))
}

fn build_config(file: ConfigFile, config_path: Option<PathBuf>) -> Config {
    // Custom providers are prepended so they take priority over built-ins.
    let mut providers: Vec<ProviderPattern> = file
        .providers
        .iter()
        .filter(|entry| !entry.path_patterns.is_empty())
        .map(|entry| {
            let paths: Vec<&str> = entry.path_patterns.iter().map(String::as_str).collect();
            let hosts: Vec<&str> = entry.host_patterns.iter().map(String::as_str).collect();
            ProviderPattern::new(&entry.name, &paths, &hosts, entry.is_regex)
        })
        .collect();
    providers.extend(builtin_providers());

    if !file.disable_providers.is_empty() {
        providers.retain(|p| !file.disable_providers.contains(&p.name));
    }

    Config {
        providers,
        capture_all_requests: file.capture_all_requests,
        debug: file.debug,
        config_path,
    }
}

fn debug_env_enabled() -> bool {
    std::env::var("WEAVERUN_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, paths: &[&str]) -> ProviderEntry {
        ProviderEntry {
            name: name.to_string(),
            path_patterns: paths.iter().map(|p| p.to_string()).collect(),
            host_patterns: Vec::new(),
            is_regex: true,
        }
    }

    #[test]
    fn builtin_classification() {
        let config = Config::default();
        assert_eq!(
            config.is_capturable("/v1/chat/completions", "api.openai.com"),
            Some("openai".to_string())
        );
        assert_eq!(
            config.is_capturable("/v1/messages", "api.anthropic.com"),
            Some("anthropic".to_string())
        );
        assert_eq!(
            config.is_capturable("/api/chat", "localhost:11434"),
            Some("ollama".to_string())
        );
        assert_eq!(config.is_capturable("/healthz", "example.com"), None);
    }

    #[test]
    fn first_match_wins() {
        // The openai entry carries a wildcard host, so it shadows later
        // providers that share /v1/chat/completions.
        let config = Config::default();
        assert_eq!(
            config.is_capturable("/v1/chat/completions", "api.groq.com"),
            Some("openai".to_string())
        );
    }

    #[test]
    fn capture_all_short_circuits() {
        let config = Config {
            capture_all_requests: true,
            ..Config::default()
        };
        assert_eq!(
            config.is_capturable("/anything", "anywhere"),
            Some("custom".to_string())
        );
    }

    #[test]
    fn custom_providers_take_priority() {
        let file = ConfigFile {
            providers: vec![entry("mine", &["/v1/chat/completions"])],
            ..ConfigFile::default()
        };
        let config = build_config(file, None);
        assert_eq!(
            config.is_capturable("/v1/chat/completions", "api.openai.com"),
            Some("mine".to_string())
        );
    }

    #[test]
    fn disable_providers_removes_builtins() {
        let file = ConfigFile {
            disable_providers: vec!["openai".to_string()],
            ..ConfigFile::default()
        };
        let config = build_config(file, None);
        assert_eq!(config.is_capturable("/v1/chat/completions", "api.openai.com"), None);
        // Unrelated providers survive.
        assert_eq!(
            config.is_capturable("/v1/messages", "api.anthropic.com"),
            Some("anthropic".to_string())
        );
    }

    #[test]
    fn providers_without_paths_are_ignored() {
        let file = ConfigFile {
            providers: vec![entry("empty", &[])],
            ..ConfigFile::default()
        };
        let config = build_config(file, None);
        assert!(!config.providers.iter().any(|p| p.name == "empty"));
    }

    #[test]
    fn snapshot_exposes_safe_fields_only() {
        let snapshot = Config::default().snapshot();
        assert_eq!(snapshot["capture_all_requests"], false);
        assert_eq!(snapshot["debug"], false);
        assert!(snapshot["providers"]
            .as_array()
            .is_some_and(|names| names.iter().any(|n| n == "openai")));
    }
}
