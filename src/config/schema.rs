use serde::{Deserialize, Serialize};

use crate::live::{DEFAULT_MODEL, DEFAULT_VOICE, GEMINI_LIVE_WS_URL};
use crate::tools::Technician;

/// Root of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub call: CallConfig,
    /// Roster override. Empty keeps the built-in four technicians.
    pub technicians: Vec<Technician>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Falls back to `GEMINI_API_KEY`, `GOOGLE_API_KEY`, then `API_KEY`.
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub endpoint: String,
    pub setup_timeout_secs: u64,
    /// Agent instructions file (`~` expanded). Unset uses the built-in script.
    pub system_instruction_file: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            endpoint: GEMINI_LIVE_WS_URL.to_string(),
            setup_timeout_secs: 15,
            system_instruction_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_frame_samples: usize,
    pub priming_frame_samples: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_frame_samples: 4096,
            priming_frame_samples: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub forward_delay_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            forward_delay_ms: 1000,
        }
    }
}
