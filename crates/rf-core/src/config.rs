//! Configuration management
//!
//! Settings are resolved in this order (later wins):
//! 1. Built-in defaults
//! 2. `research-flow.toml` in the working directory
//! 3. Environment variables
//!
//! Inside the TOML file, `${VAR_NAME}` is replaced by the value of the
//! environment variable of that name.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Error;

/// Default configuration file name
pub const CONFIG_FILE: &str = "research-flow.toml";

/// LLM Provider type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Claude API
    #[default]
    Claude,
    /// OpenAI-compatible API (Gemini, GLM, etc.)
    OpenAi,
}

impl LlmProvider {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "openai" | "gemini" | "glm" | "zai" => Self::OpenAi,
            _ => Self::Claude,
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// API provider
    #[serde(default)]
    pub provider: LlmProvider,

    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            provider: LlmProvider::Claude,
            base_url: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    /// Whether credentials for the LLM backend are present
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the HTTP + WebSocket server
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. `None` means permissive.
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: None,
        }
    }
}

/// Research workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum number of evaluation rounds before a run fails
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before each retry generation, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Cooldown after a quota error, in seconds
    #[serde(default = "default_quota_cooldown")]
    pub quota_cooldown_secs: u64,

    /// Number of runs executed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Where reports and failure records are written
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Where uploaded documents live
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Finished runs kept in the run registry
    #[serde(default = "default_run_retention")]
    pub run_retention: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
            quota_cooldown_secs: default_quota_cooldown(),
            workers: default_workers(),
            output_dir: default_output_dir(),
            upload_dir: default_upload_dir(),
            run_retention: default_run_retention(),
        }
    }
}

impl WorkflowConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_secs(self.quota_cooldown_secs)
    }
}

/// Push channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Idle keepalive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive(),
        }
    }
}

impl WsConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Main configuration for research-flow
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub ws: WsConfig,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    10
}

fn default_quota_cooldown() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_upload_dir() -> String {
    "uploads/documents".to_string()
}

fn default_run_retention() -> usize {
    1000
}

fn default_keepalive() -> u64 {
    30
}

impl Config {
    /// Replace `${VAR_NAME}` with the value of the environment variable.
    /// Unset variables expand to an empty string.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides();
        cfg.validate()?;

        Ok(cfg)
    }

    /// Parse TOML text (with `${VAR}` expansion) without environment overrides.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        let toml: TomlConfig = toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        Ok(Self::from_toml_config(toml))
    }

    /// Load from `./research-flow.toml` if present, otherwise from the
    /// environment alone.
    pub fn load() -> crate::Result<Self> {
        if Path::new(CONFIG_FILE).exists() {
            return Self::from_toml_file(CONFIG_FILE);
        }

        let cfg = Self::from_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the services cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.ws.keepalive_secs == 0 {
            return Err(Error::Config(
                "ws.keepalive_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    fn from_toml_config(toml: TomlConfig) -> Self {
        let llm = toml.llm.unwrap_or_default();
        let server = toml.server.unwrap_or_default();
        let workflow = toml.workflow.unwrap_or_default();
        let ws = toml.ws.unwrap_or_default();

        Config {
            llm: LlmConfig {
                api_key: llm.api_key.unwrap_or_default(),
                model: llm.model.unwrap_or_else(default_model),
                provider: LlmProvider::parse(&llm.provider.unwrap_or_default()),
                base_url: llm.base_url,
                timeout_secs: llm.timeout_secs.unwrap_or_else(default_llm_timeout),
            },
            server: ServerConfig {
                host: server.host.unwrap_or_else(default_host),
                port: server.port.unwrap_or_else(default_port),
                allowed_origins: server.allowed_origins,
            },
            workflow: WorkflowConfig {
                max_attempts: workflow.max_attempts.unwrap_or_else(default_max_attempts),
                retry_delay_secs: workflow.retry_delay_secs.unwrap_or_else(default_retry_delay),
                quota_cooldown_secs: workflow
                    .quota_cooldown_secs
                    .unwrap_or_else(default_quota_cooldown),
                workers: workflow.workers.unwrap_or_else(default_workers),
                output_dir: workflow.output_dir.unwrap_or_else(default_output_dir),
                upload_dir: workflow.upload_dir.unwrap_or_else(default_upload_dir),
                run_retention: workflow.run_retention.unwrap_or_else(default_run_retention),
            },
            ws: WsConfig {
                keepalive_secs: ws.keepalive_secs.unwrap_or_else(default_keepalive),
            },
        }
    }

    fn apply_env_overrides(&mut self) {
        // LLM
        if let Some(key) = non_empty_env("LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(model) = non_empty_env("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(provider) = non_empty_env("LLM_PROVIDER") {
            self.llm.provider = LlmProvider::parse(&provider);
        }
        if let Some(base_url) = non_empty_env("LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }
        if let Some(secs) = parsed_env("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = secs;
        }

        // Server
        if let Some(host) = non_empty_env("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parsed_env("SERVER_PORT") {
            self.server.port = port;
        }
        if let Some(origins) = non_empty_env("ALLOWED_ORIGINS") {
            self.server.allowed_origins = Some(
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }

        // Workflow
        if let Some(n) = parsed_env("WORKFLOW_MAX_ATTEMPTS") {
            self.workflow.max_attempts = n;
        }
        if let Some(secs) = parsed_env("WORKFLOW_RETRY_DELAY_SECS") {
            self.workflow.retry_delay_secs = secs;
        }
        if let Some(secs) = parsed_env("WORKFLOW_QUOTA_COOLDOWN_SECS") {
            self.workflow.quota_cooldown_secs = secs;
        }
        if let Some(n) = parsed_env("WORKFLOW_WORKERS") {
            self.workflow.workers = n;
        }
        if let Some(dir) = non_empty_env("OUTPUT_DIR") {
            self.workflow.output_dir = dir;
        }
        if let Some(dir) = non_empty_env("UPLOAD_DIR") {
            self.workflow.upload_dir = dir;
        }
        if let Some(n) = parsed_env("WORKFLOW_RUN_RETENTION") {
            self.workflow.run_retention = n;
        }

        // WebSocket
        if let Some(secs) = parsed_env("WS_KEEPALIVE_SECS") {
            self.ws.keepalive_secs = secs;
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    non_empty_env(name).and_then(|v| v.parse().ok())
}

// ============================================================================
// TOML file layout
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    llm: Option<TomlLlmConfig>,
    server: Option<TomlServerConfig>,
    workflow: Option<TomlWorkflowConfig>,
    ws: Option<TomlWsConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlLlmConfig {
    /// "claude" or "openai"
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlServerConfig {
    host: Option<String>,
    port: Option<u16>,
    allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlWorkflowConfig {
    max_attempts: Option<u32>,
    retry_delay_secs: Option<u64>,
    quota_cooldown_secs: Option<u64>,
    workers: Option<usize>,
    output_dir: Option<String>,
    upload_dir: Option<String>,
    run_retention: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlWsConfig {
    keepalive_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_config_default() {
        let config = WorkflowConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(10));
        assert_eq!(config.quota_cooldown(), Duration::from_secs(60));
        assert_eq!(config.workers, 4);
        assert_eq!(config.output_dir, "output");
        assert_eq!(config.run_retention, 1000);
    }

    #[test]
    fn test_server_and_ws_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert!(config.server.allowed_origins.is_none());
        assert_eq!(config.ws.keepalive_interval(), Duration::from_secs(30));
        assert!(!config.llm.is_configured());
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(LlmProvider::parse("claude"), LlmProvider::Claude);
        assert_eq!(LlmProvider::parse("OpenAI"), LlmProvider::OpenAi);
        assert_eq!(LlmProvider::parse("gemini"), LlmProvider::OpenAi);
        assert_eq!(LlmProvider::parse(""), LlmProvider::Claude);
    }

    #[test]
    fn test_from_toml_str() {
        let toml = r#"
            [llm]
            provider = "openai"
            model = "gemini-2.5-flash"

            [server]
            port = 9100

            [workflow]
            max_attempts = 5
            retry_delay_secs = 0
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.model, "gemini-2.5-flash");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.workflow.max_attempts, 5);
        assert_eq!(config.workflow.retry_delay_secs, 0);
        // untouched sections keep their defaults
        assert_eq!(config.workflow.quota_cooldown_secs, 60);
        assert_eq!(config.ws.keepalive_secs, 30);
    }

    #[test]
    fn test_zero_keepalive_is_rejected() {
        let config = Config::from_toml_str("[ws]\nkeepalive_secs = 0").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("keepalive_secs")));

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_keepalive_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("research-flow.toml");
        std::fs::write(&path, "[ws]\nkeepalive_secs = 0\n").unwrap();

        assert!(matches!(
            Config::from_toml_file(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let err = Config::from_toml_str("[server\nport = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_expand_env_vars() {
        unsafe {
            std::env::set_var("RF_CONFIG_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${RF_CONFIG_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        let result = Config::expand_env_vars("prefix_${RF_NONEXISTENT_VAR}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("RF_CONFIG_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        assert_eq!(Config::expand_env_vars("no_vars_here"), "no_vars_here");
        assert_eq!(Config::expand_env_vars("cost: $5"), "cost: $5");
    }

    #[test]
    fn test_from_toml_file_missing() {
        let err = Config::from_toml_file("/nonexistent/research-flow.toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
