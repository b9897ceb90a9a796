use crate::agent::Agent;
use crate::config::{AgentConfig, Config, RouterConfig};
use crate::history::create_history_store;
use crate::pool::Pool;
use crate::providers::OpenAIProvider;
use crate::router::{RoundRobinRouter, RoutingAgent};
use crate::traits::Provider;
use anyhow::{Result, anyhow};
use std::sync::Arc;

const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    create_provider_for_model(config, &config.model)
}

/// Same endpoint and credentials as `config`, different model.
pub fn create_provider_for_model(config: &Config, model: &str) -> Result<Arc<dyn Provider>> {
    let provider_name = config.provider.as_deref().unwrap_or("openai");

    let provider = match provider_name.to_lowercase().as_str() {
        "openai" => {
            let api_key = resolve_api_key_with_fallback(
                &["OPENAI_API_KEY", "TROUPE_API_KEY"],
                &config.api_key,
            )?;
            OpenAIProvider::new(api_key)
        }
        "ollama" => {
            let api_key =
                resolve_api_key_with_fallback(&["TROUPE_API_KEY"], &config.api_key)
                    .unwrap_or_default();
            OpenAIProvider::new(api_key).with_base_url(OLLAMA_BASE_URL)
        }
        _ => {
            return Err(anyhow!(
                "Unknown provider: {}. Available: openai, ollama",
                provider_name
            ));
        }
    };

    let mut provider = provider
        .with_model(model)
        .with_temperature(config.temperature);
    if let Some(base_url) = &config.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    Ok(Arc::new(provider))
}

/// Builds the configured pool; agents without a model use the top-level one.
pub fn create_pool(config: &Config) -> Result<Pool> {
    let default_model = create_provider(config)?;
    create_pool_with_model(config, default_model)
}

pub fn create_pool_with_model(config: &Config, default_model: Arc<dyn Provider>) -> Result<Pool> {
    let agents = config
        .agents
        .iter()
        .map(|agent| build_agent(config, agent))
        .collect::<Result<Vec<_>>>()?;

    let mut builder = Pool::builder()
        .agents(agents)
        .max_iter(config.pool.max_iter)
        .tracing(config.pool.tracing)
        .default_model(default_model);
    if let Some(kind) = &config.pool.history {
        builder = builder.history(create_history_store(kind)?);
    }

    match &config.router {
        RouterConfig::RoundRobin { agents, cycle } => {
            let names = if agents.is_empty() {
                config.agents.iter().map(|a| a.name.clone()).collect()
            } else {
                agents.clone()
            };
            builder = builder.router(RoundRobinRouter::new(names).with_cycle(*cycle));
        }
        RouterConfig::RoutingAgent {
            persona,
            model,
            agents,
        } => {
            let mut router = Agent::builder("router").persona(persona.clone());
            if let Some(model) = model {
                router = router.model(create_provider_for_model(config, model)?);
            }
            let names = if agents.is_empty() {
                config.agents.iter().map(|a| a.name.clone()).collect()
            } else {
                agents.clone()
            };
            builder = builder.router(RoutingAgent::new(router.build()?, names)?);
        }
    }

    Ok(builder.build()?)
}

fn build_agent(config: &Config, agent: &AgentConfig) -> Result<Agent> {
    let mut builder = Agent::builder(&agent.name)
        .description(&agent.description)
        .persona(&agent.persona)
        .max_tool_rounds(agent.max_tool_rounds);
    if let Some(model) = &agent.model {
        builder = builder.model(create_provider_for_model(config, model)?);
    }
    if let Some(tracing) = agent.tracing {
        builder = builder.tracing(tracing);
    }
    Ok(builder.build()?)
}

fn resolve_api_key_with_fallback(env_vars: &[&str], config_key: &str) -> Result<String> {
    for var_name in env_vars {
        if let Ok(key) = resolve_api_key_from_env(var_name) {
            return Ok(key);
        }
    }
    if !config_key.is_empty() {
        Ok(config_key.to_string())
    } else {
        Err(anyhow!(
            "No API key found. Set {} or api_key in the config file.",
            env_vars.join(" or ")
        ))
    }
}

fn resolve_api_key_from_env(var_name: &str) -> Result<String> {
    std::env::var(var_name)
        .ok()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| anyhow!("Environment variable {} not set", var_name))
}
