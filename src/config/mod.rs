//! Configuration loading.
//!
//! Path order: an explicit `--config` path, then `config.toml` in the
//! platform config directory, then built-in defaults.

pub mod schema;

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::call::ControllerConfig;
use crate::tools::Roster;

pub use schema::{AudioConfig, CallConfig, Config, LiveConfig};

/// Environment variables consulted, in order, when `live.api_key` is unset.
pub const API_KEY_ENV_VARS: [&str; 3] = ["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Persona and call-handling script given to the agent by default.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = include_str!("../../prompts/agent_instruction.md");

impl Config {
    /// Load from `path`, or from the default location when it exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// `<config dir>/callpanel/config.toml` for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "callpanel")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.audio.capture_frame_samples == 0 {
            anyhow::bail!("audio.capture_frame_samples must be positive");
        }
        if self.audio.priming_frame_samples == 0 {
            anyhow::bail!("audio.priming_frame_samples must be positive");
        }
        if self.live.setup_timeout_secs == 0 {
            anyhow::bail!("live.setup_timeout_secs must be positive");
        }
        if self.live.model.trim().is_empty() {
            anyhow::bail!("live.model must not be empty");
        }
        Ok(())
    }

    /// API key from the file, else the first non-empty environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with(|name| std::env::var(name).ok())
    }

    fn api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.live
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                API_KEY_ENV_VARS
                    .iter()
                    .filter_map(|name| lookup(name))
                    .find(|k| !k.trim().is_empty())
            })
    }

    pub fn system_instruction(&self) -> anyhow::Result<String> {
        let Some(file) = self.live.system_instruction_file.as_deref() else {
            return Ok(DEFAULT_SYSTEM_INSTRUCTION.to_string());
        };
        let expanded = shellexpand::tilde(file);
        std::fs::read_to_string(expanded.as_ref())
            .with_context(|| format!("Failed to read system instruction file {expanded}"))
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.live.setup_timeout_secs)
    }

    pub fn roster(&self) -> Roster {
        Roster::new(self.technicians.clone())
    }

    pub fn controller_config(&self) -> anyhow::Result<ControllerConfig> {
        Ok(ControllerConfig {
            model: self.live.model.clone(),
            voice: self.live.voice.clone(),
            system_instruction: self.system_instruction()?,
            capture_frame_samples: self.audio.capture_frame_samples,
            priming_frame_samples: self.audio.priming_frame_samples,
            forward_delay: Duration::from_millis(self.call.forward_delay_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.live.voice, "Kore");
        assert_eq!(config.audio.capture_frame_samples, 4096);
        assert_eq!(config.call.forward_delay_ms, 1000);
        assert_eq!(config.roster(), Roster::default());
    }

    #[test]
    fn parses_sections_and_roster_override() {
        let toml_str = r#"
[live]
api_key = "test_key"
voice = "Puck"
setup_timeout_secs = 30

[call]
forward_delay_ms = 250

[[technicians]]
id = "tech-09"
name = "Kiran Rao"
skills = ["OTT", "Billing"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.live.api_key.as_deref(), Some("test_key"));
        assert_eq!(config.live.voice, "Puck");
        assert_eq!(config.live.model, crate::live::DEFAULT_MODEL);
        assert_eq!(config.setup_timeout(), Duration::from_secs(30));
        assert_eq!(config.roster().technicians()[0].name, "Kiran Rao");

        let controller = config.controller_config().unwrap();
        assert_eq!(controller.forward_delay, Duration::from_millis(250));
        assert_eq!(controller.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
    }

    #[test]
    fn api_key_falls_back_through_env_vars() {
        let config = Config::default();
        let lookup = |name: &str| match name {
            "GEMINI_API_KEY" => Some(String::new()),
            "GOOGLE_API_KEY" => Some("google".to_string()),
            "API_KEY" => Some("generic".to_string()),
            _ => None,
        };
        assert_eq!(config.api_key_with(lookup).as_deref(), Some("google"));
        assert_eq!(config.api_key_with(|_| None), None);

        let mut explicit = Config::default();
        explicit.live.api_key = Some("file".into());
        assert_eq!(explicit.api_key_with(lookup).as_deref(), Some("file"));
    }

    #[test]
    fn from_file_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audio]\ncapture_frame_samples = 2048\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.audio.capture_frame_samples, 2048);

        std::fs::write(&path, "[audio]\ncapture_frame_samples = 0\n").unwrap();
        assert!(Config::from_file(&path).is_err());

        std::fs::write(&path, "[live\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn system_instruction_file_overrides_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Be brief.").unwrap();
        let mut config = Config::default();
        config.live.system_instruction_file = Some(file.path().display().to_string());
        assert_eq!(config.system_instruction().unwrap(), "Be brief.");

        config.live.system_instruction_file = Some("/nonexistent/prompt.md".into());
        assert!(config.system_instruction().is_err());
    }

    #[test]
    fn builtin_instruction_mentions_tools() {
        for tool in ["createTicket", "transferCallToManager", "resolveIssue", "createNewConnectionRequest"] {
            assert!(DEFAULT_SYSTEM_INSTRUCTION.contains(tool), "{tool} missing");
        }
    }
}
