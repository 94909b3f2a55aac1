//! Configuration loading and management

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion service settings
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Orchestrator limits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Workspace placement
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Coordination board settings
    #[serde(default)]
    pub board: BoardConfig,

    /// Tool module settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Role overrides and additions, keyed by role name
    #[serde(default)]
    pub roles: HashMap<String, RoleConfig>,
}

impl Config {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            // Try .boardroom/config.toml in current directory
            let local = PathBuf::from(".boardroom/config.toml");
            if local.exists() {
                return Some(local);
            }

            // Try ~/.boardroom/config.toml
            dirs::home_dir().map(|h| h.join(".boardroom/config.toml"))
        });

        match config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            _ => Ok(Config::default()),
        }
    }

    /// Directory holding one workspace root per project
    pub fn workspace_base(&self) -> PathBuf {
        let raw = self.workspace.base_dir.to_string_lossy();
        PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
    }

    /// Timeout applied to tool subprocesses
    pub fn command_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.tools.command_timeout).map_err(|e| {
            Error::Config(format!(
                "Invalid command_timeout '{}': {}",
                self.tools.command_timeout, e
            ))
        })
    }
}

/// Completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API key (can also be in environment)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Default model
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Response token cap
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum tool round trips within one turn
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Number of most recent turns fed back to the model
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_max_tool_rounds() -> usize {
    8
}

fn default_history_window() -> usize {
    20
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            history_window: default_history_window(),
        }
    }
}

/// Workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Base directory for project workspaces
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".boardroom/workspaces")
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

/// Coordination board configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Messages retained before the oldest are evicted
    #[serde(default = "default_board_capacity")]
    pub capacity: usize,
}

fn default_board_capacity() -> usize {
    100
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            capacity: default_board_capacity(),
        }
    }
}

/// Tool module configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Subprocess timeout, humantime format ("30s", "2m")
    #[serde(default = "default_command_timeout")]
    pub command_timeout: String,

    /// GitHub REST API base URL
    #[serde(default = "default_github_api_base")]
    pub github_api_base: String,

    /// GitHub token (can also be in environment)
    #[serde(default)]
    pub github_token: Option<String>,
}

fn default_command_timeout() -> String {
    "30s".to_string()
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            github_api_base: default_github_api_base(),
            github_token: None,
        }
    }
}

/// Role configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Human-readable description
    pub description: String,

    /// Persona text; `{project_id}`, `{role}` and `{workspace_path}` are substituted
    pub persona: String,

    /// Tool modules or capability names this role may call (empty = all)
    #[serde(default)]
    pub tools: Vec<String>,

    /// Model override for this role
    #[serde(default)]
    pub model: Option<String>,
}

/// Initialize .boardroom directory
pub fn init() -> Result<()> {
    let boardroom_dir = PathBuf::from(".boardroom");

    if !boardroom_dir.exists() {
        std::fs::create_dir_all(&boardroom_dir)?;
    }

    let roles_dir = boardroom_dir.join("roles");
    if !roles_dir.exists() {
        std::fs::create_dir_all(&roles_dir)?;
    }

    // Create default config if it doesn't exist
    let config_path = boardroom_dir.join("config.toml");
    if !config_path.exists() {
        let default_config = Config::default();
        let config_str = toml::to_string_pretty(&default_config)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&config_path, config_str)?;
    }

    Ok(())
}
