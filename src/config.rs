//! Environment configuration

use crate::action::ActionServerConfig;
use crate::memory::ZepConfig;
use crate::runtime::RuntimeConfig;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_BAML_BASE_URL: &str = "http://127.0.0.1:2024";
const DEFAULT_ZEP_BASE_URL: &str = "https://api.getzep.com";
const DEFAULT_TOAST_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub port: u16,
    pub actions: ActionServerConfig,
    /// `None` runs without long-term memory
    pub memory: Option<ZepConfig>,
    /// Seeds the coaching instruction row at startup when set
    pub instruction: Option<String>,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = var("INFLUENCE_DB_PATH").unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            format!("{home}/.influence-engine/influence.db")
        });

        let port = var("INFLUENCE_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let actions = ActionServerConfig {
            base_url: var("BAML_BASE_URL").unwrap_or_else(|| DEFAULT_BAML_BASE_URL.to_string()),
            api_key: var("BAML_API_KEY").filter(|k| !k.is_empty()),
        };

        let memory = var("ZEP_API_KEY")
            .filter(|k| !k.is_empty())
            .map(|api_key| ZepConfig {
                api_key,
                base_url: var("ZEP_BASE_URL").unwrap_or_else(|| DEFAULT_ZEP_BASE_URL.to_string()),
            });

        let instruction = var("INFLUENCE_INSTRUCTION").filter(|i| !i.trim().is_empty());

        let toast_secs = var("TOAST_DURATION_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TOAST_SECS);

        let streaming = var("INFLUENCE_STREAMING").map_or(true, |v| {
            !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
        });

        Self {
            db_path,
            port,
            actions,
            memory,
            instruction,
            runtime: RuntimeConfig {
                streaming,
                toast_duration: Duration::from_secs(toast_secs),
            },
        }
    }
}
