use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub coach: CoachConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoachConfig {
    /// Base URL of the hosted service (the functions host).
    pub base_url: String,
    /// Command to run to get the API key (e.g., "pass show enercoach").
    /// The command is run via `sh -c`.
    pub api_key_cmd: Option<String>,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key_cmd: None,
        }
    }
}

impl CoachConfig {
    /// Resolve the base URL, letting ENERGY_COACH_URL override the config.
    pub fn resolve_base_url(&self) -> String {
        std::env::var("ENERGY_COACH_URL").unwrap_or_else(|_| self.base_url.clone())
    }

    /// Resolve the API key from api_key_cmd or the ENERGY_COACH_API_KEY env var.
    pub fn resolve_api_key(&self) -> io::Result<String> {
        // Try api_key_cmd first
        if let Some(cmd) = &self.api_key_cmd {
            let output = Command::new("sh").arg("-c").arg(cmd).output()?;

            if output.status.success() {
                let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !key.is_empty() {
                    return Ok(key);
                }
            }
        }

        // Fall back to env var
        std::env::var("ENERGY_COACH_API_KEY").map_err(|_| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "ENERGY_COACH_API_KEY not set and no api_key_cmd configured",
            )
        })
    }
}

impl Config {
    pub fn load_or_default() -> Self {
        Self::load(&config_path())
    }

    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("warning: failed to parse {}: {e}", path.display());
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }
}

fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("enercoach").join("config.toml")
}
