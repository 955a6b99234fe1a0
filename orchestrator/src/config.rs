use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Local,
}

impl StorageKind {
    fn from_env(value: &str) -> anyhow::Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            other => Err(anyhow::anyhow!(
                "Invalid STORAGE_TYPE '{other}'. Expected 'local'"
            )),
        }
    }
}

/// Credentials and model selection for the provider the worker talks to.
#[derive(Clone, Default)]
pub struct ProviderAuth {
    pub region: String,
    pub model: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl ProviderAuth {
    /// Environment injected into the worker process.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("CLAUDE_CODE_USE_BEDROCK".to_string(), "1".to_string()),
            ("AWS_REGION".to_string(), self.region.clone()),
        ];
        if let Some(model) = self.model.as_deref().filter(|v| !v.is_empty()) {
            vars.push(("ANTHROPIC_MODEL".to_string(), model.to_string()));
        }
        if let Some(key) = self.access_key.as_deref().filter(|v| !v.is_empty()) {
            vars.push(("AWS_ACCESS_KEY_ID".to_string(), key.to_string()));
        }
        if let Some(secret) = self.secret_key.as_deref().filter(|v| !v.is_empty()) {
            vars.push(("AWS_SECRET_ACCESS_KEY".to_string(), secret.to_string()));
        }
        vars
    }
}

impl std::fmt::Debug for ProviderAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAuth")
            .field("region", &self.region)
            .field("model", &self.model)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Interpreter that runs the worker script
    pub interpreter: String,
    /// Path to the worker script
    pub script_path: PathBuf,
    /// Upper bound on one exploration run, end to end
    pub time_limit: Duration,
    /// Size of the worker pool feeding the pipeline
    pub max_concurrent_workers: usize,
    /// Bytes of worker stderr kept for diagnostics
    pub stderr_limit_bytes: usize,
    /// Parent directory for per-job scratch workspaces
    pub scratch_dir: PathBuf,
    /// Base URL of the browser automation server handed to the worker
    pub playwright_mcp_url: String,
    pub provider: ProviderAuth,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub local_base_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub agent: AgentConfig,
    pub storage: StorageConfig,
    /// JSON exploration request consumed by the binary
    pub request_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            agent: AgentConfig {
                interpreter: env_str("AGENT_INTERPRETER", "python3"),
                script_path: PathBuf::from(env_str(
                    "AGENT_SCRIPT_PATH",
                    "/app/agent/agent_runner.py",
                )),
                time_limit: Duration::from_secs(env_parse("AGENT_TIME_LIMIT_SECS", 600)?),
                max_concurrent_workers: env_parse("AGENT_MAX_CONCURRENT_WORKERS", 1)?,
                stderr_limit_bytes: env_parse("AGENT_STDERR_LIMIT_BYTES", 64 * 1024)?,
                scratch_dir: std::env::var("AGENT_SCRATCH_DIR")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(std::env::temp_dir),
                playwright_mcp_url: env_str("AGENT_PLAYWRIGHT_MCP_URL", "http://localhost:3000"),
                provider: ProviderAuth {
                    region: env_str("AGENT_BEDROCK_REGION", "us-east-1"),
                    model: env_opt("AGENT_BEDROCK_MODEL"),
                    access_key: env_opt("AGENT_BEDROCK_ACCESS_KEY"),
                    secret_key: env_opt("AGENT_BEDROCK_SECRET_KEY"),
                },
            },
            storage: StorageConfig {
                kind: StorageKind::from_env(&env_str("STORAGE_TYPE", "local"))?,
                local_base_dir: PathBuf::from(env_str(
                    "STORAGE_LOCAL_BASE_DIR",
                    "./data/storage",
                )),
            },
            request_path: env_opt("EXPLORER_REQUEST").map(PathBuf::from),
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_env_skips_unset_credentials() {
        let auth = ProviderAuth {
            region: "eu-west-1".to_string(),
            model: None,
            access_key: Some(String::new()),
            secret_key: None,
        };
        let vars = auth.env_vars();
        assert_eq!(
            vars,
            vec![
                ("CLAUDE_CODE_USE_BEDROCK".to_string(), "1".to_string()),
                ("AWS_REGION".to_string(), "eu-west-1".to_string()),
            ]
        );
    }

    #[test]
    fn provider_env_includes_static_keys() {
        let auth = ProviderAuth {
            region: "us-east-1".to_string(),
            model: Some("claude-sonnet".to_string()),
            access_key: Some("AKIA".to_string()),
            secret_key: Some("secret".to_string()),
        };
        let vars = auth.env_vars();
        assert!(vars.contains(&("AWS_ACCESS_KEY_ID".to_string(), "AKIA".to_string())));
        assert!(vars.contains(&("AWS_SECRET_ACCESS_KEY".to_string(), "secret".to_string())));
        assert!(vars.contains(&("ANTHROPIC_MODEL".to_string(), "claude-sonnet".to_string())));
    }

    #[test]
    fn provider_debug_redacts_secrets() {
        let auth = ProviderAuth {
            region: "us-east-1".to_string(),
            model: None,
            access_key: Some("AKIA".to_string()),
            secret_key: Some("secret".to_string()),
        };
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("AKIA"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn storage_kind_parses_case_insensitively() {
        assert_eq!(StorageKind::from_env("LOCAL").unwrap(), StorageKind::Local);
        assert!(StorageKind::from_env("s3").is_err());
    }
}
