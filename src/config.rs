use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "def_coach_config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachConfig {
    /// OpenAI-compatible base URL; requests go to `{url}/chat/completions`
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Optional `HTTP-Referer` attribution header
    #[serde(default)]
    pub app_referer: Option<String>,
    /// `X-Title` for user-initiated chat turns
    #[serde(default = "default_chat_title")]
    pub chat_title: String,
    /// `X-Title` for scheduled refreshes
    #[serde(default = "default_daily_title")]
    pub daily_title: String,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_refresh_debounce_secs")]
    pub refresh_debounce_secs: u64,
    #[serde(default = "default_daily_gate_hours")]
    pub daily_gate_hours: i64,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_max_tasks_per_day")]
    pub max_tasks_per_day: usize,
}

fn default_llm_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_model() -> String {
    "x-ai/grok-code-fast-1".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_chat_title() -> String {
    "DEF Habits - Jocko Chat".to_string()
}

fn default_daily_title() -> String {
    "DEF Habits - Jocko Daily".to_string()
}

fn default_database_path() -> String {
    "def_coach.db".to_string()
}

fn default_refresh_debounce_secs() -> u64 {
    5
}

fn default_daily_gate_hours() -> i64 {
    24
}

fn default_bind_addr() -> String {
    "127.0.0.1:8797".to_string()
}

fn default_max_tasks_per_day() -> usize {
    5
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            temperature: default_temperature(),
            app_referer: None,
            chat_title: default_chat_title(),
            daily_title: default_daily_title(),
            database_path: default_database_path(),
            refresh_debounce_secs: default_refresh_debounce_secs(),
            daily_gate_hours: default_daily_gate_hours(),
            bind_addr: default_bind_addr(),
            max_tasks_per_day: default_max_tasks_per_day(),
        }
    }
}

impl CoachConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Load config from def_coach_config.toml (next to executable), falling back to env vars
    pub fn load() -> Self {
        let path = Self::config_path();
        if let Some(config) = Self::load_from(&path) {
            return config;
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    pub fn load_from(path: &Path) -> Option<Self> {
        let contents = fs::read_to_string(path).ok()?;
        match toml::from_str::<CoachConfig>(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::error!("Failed to parse {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("DEF_COACH_LLM_URL") {
            config.llm_api_url = url;
        }

        if let Ok(model) = env::var("DEF_COACH_MODEL") {
            config.llm_model = model;
        }

        if let Ok(path) = env::var("DEF_COACH_DB") {
            if !path.trim().is_empty() {
                config.database_path = path;
            }
        }

        if let Ok(addr) = env::var("DEF_COACH_BIND") {
            config.bind_addr = addr;
        }

        if let Ok(referer) = env::var("DEF_COACH_REFERER") {
            if !referer.trim().is_empty() {
                config.app_referer = Some(referer);
            }
        }

        if let Ok(secs) = env::var("DEF_COACH_DEBOUNCE_SECS") {
            if let Ok(secs) = secs.parse() {
                config.refresh_debounce_secs = secs;
            }
        }

        config
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_secs(self.refresh_debounce_secs)
    }

    pub fn daily_gate(&self) -> chrono::Duration {
        chrono::Duration::hours(self.daily_gate_hours)
    }
}
