use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one sub-directory per simulation.
    pub storage_path: String,
    /// Directory for the frontend handshake tempo files
    /// (`curr_sim_code.json`, `curr_step.json`).
    pub temp_storage_path: String,
    /// Directory holding static maze tileset documents, one JSON file per
    /// maze name.
    pub mazes_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_path: "storage".to_string(),
            temp_storage_path: "temp".to_string(),
            mazes_path: "mazes".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `"ollama"` or `"openai"` (any OpenAI-compatible endpoint).
    pub provider: String,
    /// Base URL of the completion/embedding service.  Overridden at runtime
    /// by the `SIMULACRA_LLM_BASE_URL` environment variable when set.
    pub base_url: String,
    pub completion_model: String,
    pub embedding_model: String,
    /// Bearer token read from the environment variable named here; empty
    /// means unauthenticated (the usual case for a local Ollama).
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            completion_model: "llama3.1:8b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            api_key_env: "SIMULACRA_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Milliseconds the tick loop rests between polls for the next
    /// environment file.
    pub server_sleep_ms: u64,
    /// Address used when a planned action address cannot be resolved on the
    /// maze.  The simulation never aborts on a missing address; it walks the
    /// persona here instead.
    pub fallback_address: String,
    /// Master seed for the per-persona RNGs.
    pub seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_sleep_ms: 100,
            fallback_address: "the ville:johnson park:park garden".to_string(),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimulationConfig {
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
}

impl SimulationConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("SIMULACRA_LLM_BASE_URL") {
            if !value.is_empty() {
                config.llm.base_url = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Filesystem path of a simulation's directory.
    pub fn sim_folder(&self, sim_code: &str) -> String {
        format!("{}/{}", self.storage.storage_path, sim_code)
    }

    /// Filesystem path of a maze tileset document.
    pub fn maze_file(&self, maze_name: &str) -> String {
        format!("{}/{}.json", self.storage.mazes_path, maze_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SimulationConfig::default();
        assert_eq!(config.server.server_sleep_ms, 100);
        assert!(!config.server.fallback_address.is_empty());
        assert_eq!(config.llm.provider, "ollama");
    }

    #[test]
    fn roundtrip_through_toml() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("simulacra.toml");

        let mut config = SimulationConfig::default();
        config.storage.storage_path = "/tmp/sims".to_string();
        config.server.seed = 7;
        config.save_to(&path)?;

        let loaded = SimulationConfig::load_from(&path)?;
        assert_eq!(loaded.storage.storage_path, "/tmp/sims");
        assert_eq!(loaded.server.seed, 7);
        Ok(())
    }

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let loaded = SimulationConfig::load_from("does/not/exist.toml")?;
        assert_eq!(loaded.telemetry.log_level, "info");
        Ok(())
    }

    #[test]
    fn partial_toml_fills_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("partial.toml");
        fs::write(&path, "[server]\nseed = 99\n")?;

        let loaded = SimulationConfig::load_from(&path)?;
        assert_eq!(loaded.server.seed, 99);
        assert_eq!(loaded.server.server_sleep_ms, 100);
        Ok(())
    }
}
