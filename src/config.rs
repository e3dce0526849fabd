//! Global configuration parsing, validation, and credential loading.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// How an instance appears in Slack when posting a final response.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PersonaConfig {
    /// Display name shown on persona posts.
    pub name: String,
    /// Emoji icon shown on persona posts.
    #[serde(default = "default_persona_emoji")]
    pub emoji: String,
}

fn default_persona_emoji() -> String {
    ":robot_face:".into()
}

/// Configuration for a single AI instance hosted by this process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InstanceConfig {
    /// Routing name; also the summon reaction name.
    pub name: String,
    /// Bundle identifier loaded into each session at creation.
    pub bundle: String,
    /// Per-instance working directory (supports a leading `~`).
    pub working_dir: PathBuf,
    /// Slack persona for final responses.
    pub persona: PersonaConfig,
    /// Whether the instance participates in roundtables by default.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Nested Slack configuration for Socket Mode connectivity.
///
/// Tokens are loaded at runtime via OS keychain or environment variables,
/// not from the TOML config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// App-level token used for Socket Mode (populated at runtime).
    #[serde(skip)]
    pub app_token: String,
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// Default routing targets.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DefaultsConfig {
    /// Instance used when no explicit prefix or channel directive applies.
    pub instance: String,
}

/// Explicit LLM provider selection, overriding credential auto-detection.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Gemini,
}

fn default_true() -> bool {
    true
}

fn default_force_respond_tools() -> HashSet<String> {
    let mut set = HashSet::new();
    set.insert("dispatch_worker".to_owned());
    set
}

fn default_max_iterations() -> u32 {
    40
}

fn default_approval_timeout() -> u64 {
    300
}

fn default_status_throttle() -> u64 {
    2
}

fn default_thread_owner_capacity() -> usize {
    10_000
}

fn default_file_size_cap() -> u64 {
    20 * 1024 * 1024
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("~/.hive-relay")
}

fn default_worker_timeout() -> u64 {
    600
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory for persisted state (`sessions/`, `users/`, `workspace/`).
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Hosted AI instances.
    pub instances: Vec<InstanceConfig>,
    /// Default routing targets.
    pub defaults: DefaultsConfig,
    /// Slack connectivity settings.
    #[serde(default)]
    pub slack: SlackConfig,
    /// Explicit provider override; credentials are auto-detected otherwise.
    pub provider: Option<ProviderKind>,
    /// Tools that set the one-shot force-respond flag after a completed batch.
    #[serde(default = "default_force_respond_tools")]
    pub force_respond_tools: HashSet<String>,
    /// Agent loop iteration cap per `execute`.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Seconds before a pending approval resolves to its default option.
    #[serde(default = "default_approval_timeout")]
    pub approval_default_timeout_seconds: u64,
    /// Minimum seconds between status-message updates.
    #[serde(default = "default_status_throttle")]
    pub status_throttle_seconds: u64,
    /// Bounded capacity of the thread-ownership LRU.
    #[serde(default = "default_thread_owner_capacity")]
    pub thread_owner_capacity: usize,
    /// Maximum size of a downloaded shared file, in bytes.
    #[serde(default = "default_file_size_cap")]
    pub file_size_cap_bytes: u64,
    /// Seconds before a background worker is cancelled by the watchdog.
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_seconds: u64,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load Slack credentials from OS keychain with env-var fallback.
    ///
    /// Tries the `hive-relay` keyring service first, then falls back to
    /// `SLACK_APP_TOKEN` / `SLACK_BOT_TOKEN` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env vars provide
    /// the required tokens.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.slack.app_token = load_credential("slack_app_token", "SLACK_APP_TOKEN").await?;
        self.slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN").await?;
        Ok(())
    }

    /// Look up a hosted instance by its routing name (case-insensitive).
    #[must_use]
    pub fn instance(&self, name: &str) -> Option<&InstanceConfig> {
        self.instances
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Names of all hosted instances, lowercased for routing comparisons.
    #[must_use]
    pub fn instance_names(&self) -> Vec<String> {
        self.instances
            .iter()
            .map(|i| i.name.to_lowercase())
            .collect()
    }

    /// Directory holding per-session transcripts.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    /// Directory holding per-user onboarding records.
    #[must_use]
    pub fn users_dir(&self) -> PathBuf {
        self.state_dir.join("users")
    }

    fn validate(&mut self) -> Result<()> {
        if self.instances.is_empty() {
            return Err(AppError::Config("at least one instance is required".into()));
        }

        let mut seen = HashSet::new();
        for inst in &self.instances {
            let lower = inst.name.to_lowercase();
            if !seen.insert(lower) {
                return Err(AppError::Config(format!(
                    "duplicate instance name '{}'",
                    inst.name
                )));
            }
            if inst.name.trim().is_empty() {
                return Err(AppError::Config("instance name must not be empty".into()));
            }
        }

        if self.instance(&self.defaults.instance).is_none() {
            return Err(AppError::Config(format!(
                "defaults.instance '{}' does not name a configured instance",
                self.defaults.instance
            )));
        }

        if self.max_iterations == 0 {
            return Err(AppError::Config(
                "max_iterations must be greater than zero".into(),
            ));
        }

        self.state_dir = expand_home(&self.state_dir);
        for inst in &mut self.instances {
            inst.working_dir = expand_home(&inst.working_dir);
        }

        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if s == "~" {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    path.to_path_buf()
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // Try OS keychain first via spawn_blocking (keyring is synchronous I/O).
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new("hive-relay", &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    // Fallback to environment variable.
    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
