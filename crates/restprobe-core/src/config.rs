//! Project configuration for a probing run

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Project configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// OpenAPI document path (local file, JSON or YAML)
    pub spec: PathBuf,

    /// Base URL of the server to test
    pub base_url: String,

    /// HTTP headers sent with every request (Auth, API keys, etc.)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Query parameters appended to every request (query-string auth)
    #[serde(default)]
    pub query_auth: HashMap<String, String>,

    /// Wall-clock budget for the whole run, in seconds
    #[serde(default = "default_time_budget")]
    pub time_budget_secs: u64,

    /// Covering-array strength (2 = pairwise)
    #[serde(default = "default_strength")]
    pub strength: usize,

    /// Directory for reports (default: "restprobe-out")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Solver backend: "greedy" (in-process) or "pict" (subprocess)
    #[serde(default = "default_solver")]
    pub solver: SolverKind,

    /// Path to the pict binary when `solver = "pict"`
    #[serde(default)]
    pub pict_path: Option<PathBuf>,

    /// RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    Greedy,
    Pict,
}

fn default_time_budget() -> u64 {
    600
}

fn default_strength() -> usize {
    2
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("restprobe-out")
}

fn default_solver() -> SolverKind {
    SolverKind::Greedy
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spec: PathBuf::from("openapi.yaml"),
            base_url: "http://localhost:8080".to_string(),
            headers: HashMap::new(),
            query_auth: HashMap::new(),
            time_budget_secs: default_time_budget(),
            strength: default_strength(),
            output_dir: default_output_dir(),
            solver: default_solver(),
            pict_path: None,
            seed: None,
        }
    }
}

impl Config {
    /// Load config from file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }

    /// Load from default location (.restprobe.toml)
    pub fn load_default() -> Result<Self, ConfigError> {
        let candidates = [".restprobe.toml", ".restprobe.json", "restprobe.toml"];

        for name in candidates {
            let path = Path::new(name);
            if path.exists() {
                return Self::load(path);
            }
        }

        // No config file, return default
        Ok(Self::default())
    }

    /// Create example config file
    pub fn example() -> &'static str {
        r#"# restprobe configuration

# OpenAPI document (local file path, JSON or YAML)
spec = "openapi.yaml"

# Server to test
base_url = "http://localhost:8080"

# HTTP headers (auth, api keys)
[headers]
Authorization = "Bearer your-token-here"
# X-API-Key = "your-api-key"

# Query-string auth appended to every request
# [query_auth]
# api_key = "your-api-key"

# Wall-clock budget in seconds (default: 600)
# time_budget_secs = 600

# Covering-array strength (default: 2, pairwise)
# strength = 2

# Report directory (default: "restprobe-out")
# output_dir = "restprobe-out"

# Solver backend: "greedy" (built in) or "pict" (external binary)
# solver = "greedy"
# pict_path = "/usr/local/bin/pict"

# RNG seed for reproducible runs
# seed = 42
"#
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {0}: {1}")]
    Io(PathBuf, String),
    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.spec, PathBuf::from("openapi.yaml"));
        assert_eq!(config.strength, 2);
        assert_eq!(config.solver, SolverKind::Greedy);
    }

    #[test]
    fn parse_toml() {
        let toml = r#"
spec = "api.yaml"
base_url = "http://localhost:3000"
time_budget_secs = 120

[headers]
Authorization = "Bearer token123"

[query_auth]
api_key = "k1"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.spec, PathBuf::from("api.yaml"));
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.time_budget_secs, 120);
        assert_eq!(
            config.headers.get("Authorization"),
            Some(&"Bearer token123".to_string())
        );
        assert_eq!(config.query_auth.get("api_key"), Some(&"k1".to_string()));
    }

    #[test]
    fn parse_pict_solver() {
        let toml = r#"
spec = "api.yaml"
base_url = "http://localhost:3000"
solver = "pict"
pict_path = "/opt/pict"
seed = 7
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.solver, SolverKind::Pict);
        assert_eq!(config.pict_path, Some(PathBuf::from("/opt/pict")));
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn example_parses() {
        let config: Config = toml::from_str(Config::example()).unwrap();
        assert_eq!(config.spec, PathBuf::from("openapi.yaml"));
        assert!(config.headers.contains_key("Authorization"));
    }
}
