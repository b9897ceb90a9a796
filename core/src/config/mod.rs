use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const TROUPE_DIR: &str = ".troupe";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_iter: usize,
    pub tracing: bool,
    /// History store kind, e.g. `"memory"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_iter: crate::pool::DEFAULT_MAX_ITER,
            tracing: false,
            history: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub description: String,
    pub persona: String,
    /// Overrides the top-level model for this agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing: Option<bool>,
    pub max_tool_rounds: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            persona: String::new(),
            model: None,
            tracing: None,
            max_tool_rounds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouterConfig {
    /// An empty `agents` list means every configured agent, in order.
    RoundRobin {
        #[serde(default)]
        agents: Vec<String>,
        #[serde(default)]
        cycle: bool,
    },
    RoutingAgent {
        #[serde(default)]
        persona: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default)]
        agents: Vec<String>,
    },
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::RoundRobin {
            agents: vec![],
            cycle: false,
        }
    }
}

impl RouterConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoundRobin { .. } => "round_robin",
            Self::RoutingAgent { .. } => "routing_agent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub pool: PoolConfig,
    pub agents: Vec<AgentConfig>,
    pub router: RouterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: None,
            api_key: String::new(),
            base_url: None,
            model: crate::providers::openai::DEFAULT_MODEL.to_string(),
            temperature: 1.0,
            pool: PoolConfig::default(),
            agents: vec![],
            router: RouterConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        if config_exists() {
            load_config()
        } else {
            Ok(Config::default())
        }
    }

    /// Default config with a researcher/writer pair, as written by `troupe init`.
    pub fn starter() -> Self {
        Config {
            agents: vec![
                AgentConfig {
                    name: "researcher".to_string(),
                    description: "Collects facts relevant to the request".to_string(),
                    persona: "List the key facts needed to answer the request. Be concise."
                        .to_string(),
                    ..AgentConfig::default()
                },
                AgentConfig {
                    name: "writer".to_string(),
                    description: "Writes the final answer".to_string(),
                    persona: "Write a clear final answer using the facts gathered so far."
                        .to_string(),
                    ..AgentConfig::default()
                },
            ],
            ..Config::default()
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }
}

pub fn get_troupe_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(TROUPE_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_troupe_dir().join("config.toml")
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path())
}

pub fn load_config_from(config_path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(config_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::anyhow!(
                "Config file not found at {}. Run 'troupe init' to create one.",
                config_path.display()
            )
        } else {
            anyhow::anyhow!("Failed to read config from {}: {}", config_path.display(), e)
        }
    })?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", config_path.display()))
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &Config, config_path: &Path) -> Result<()> {
    if let Some(dir) = config_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory at {}", dir.display()))?;
    }

    let content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config to TOML")?;

    std::fs::write(config_path, content)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    Ok(())
}

pub fn config_exists() -> bool {
    get_config_path().exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_config_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        save_config_to(&Config::starter(), &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.agents.len(), 2);
        assert_eq!(loaded.agents[0].name, "researcher");
        assert_eq!(loaded.router, RouterConfig::default());
        assert_eq!(loaded.pool.max_iter, 5);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            model = "llama3"

            [pool]
            tracing = true
            history = "memory"

            [[agents]]
            name = "solo"
            tracing = false

            [router]
            kind = "routing_agent"
            persona = "Pick the best agent."
            agents = ["solo"]
            "#,
        )
        .unwrap();

        assert_eq!(config.model, "llama3");
        assert_eq!(config.pool.max_iter, 5);
        assert!(config.pool.tracing);
        assert_eq!(config.pool.history.as_deref(), Some("memory"));
        let solo = config.agent("solo").unwrap();
        assert_eq!(solo.tracing, Some(false));
        assert_eq!(solo.max_tool_rounds, 10);
        assert_eq!(config.router.kind(), "routing_agent");
    }

    #[test]
    fn cycling_round_robin_parses() {
        let config: Config = toml::from_str(
            r#"
            [router]
            kind = "round_robin"
            cycle = true
            "#,
        )
        .unwrap();
        assert_eq!(
            config.router,
            RouterConfig::RoundRobin {
                agents: vec![],
                cycle: true
            }
        );
    }

    #[test]
    fn missing_file_mentions_init() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("troupe init"));
    }
}
