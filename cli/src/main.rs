use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use troupe_core::{Pool, PoolEvent, RouterConfig, config, providers};

#[derive(Parser)]
#[command(name = "troupe")]
#[command(about = "troupe - run a pool of cooperating agents", long_about = None)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured pool once, or interactively without --message
    Run {
        #[arg(short, long)]
        message: Option<String>,
        /// Print agent output as it is produced
        #[arg(short, long)]
        stream: bool,
        #[arg(short, long, env = "TROUPE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Write a starter config
    Init {
        #[arg(short, long)]
        force: bool,
        #[arg(short, long, env = "TROUPE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// List configured agents and the router
    Agents {
        #[arg(short, long, env = "TROUPE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print the resolved pool (agents, tools, policies, router) as JSON
    Describe {
        #[arg(short, long, env = "TROUPE_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn config_path(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(config::get_config_path)
}

fn load(path: &Path) -> Result<config::Config> {
    tracing::debug!(path = %path.display(), "loading config");
    config::load_config_from(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.unwrap_or(Commands::Run {
        message: None,
        stream: false,
        config: None,
    });

    match command {
        Commands::Init { force, config } => {
            let path = config_path(config);
            if path.exists() && !force {
                anyhow::bail!(
                    "Config already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            config::save_config_to(&config::Config::starter(), &path)?;
            println!("Wrote starter config to {}", path.display());
        }
        Commands::Agents { config } => {
            let config = match config {
                Some(path) => load(&path)?,
                None => config::Config::load_or_init()?,
            };
            if config.agents.is_empty() {
                println!("No agents configured. Run 'troupe init' to create a starter config.");
            }
            for agent in &config.agents {
                let model = agent.model.as_deref().unwrap_or(&config.model);
                println!("{} ({}): {}", agent.name, model, agent.description);
            }
            match &config.router {
                RouterConfig::RoundRobin { agents, cycle } => {
                    let order = if agents.is_empty() {
                        "all agents".to_string()
                    } else {
                        agents.join(", ")
                    };
                    println!("\nrouter: round_robin over {} (cycle: {})", order, cycle);
                }
                RouterConfig::RoutingAgent { agents, .. } => {
                    let candidates = if agents.is_empty() {
                        "all agents".to_string()
                    } else {
                        agents.join(", ")
                    };
                    println!("\nrouter: routing_agent choosing from {}", candidates);
                }
            }
            println!("max_iter: {}", config.pool.max_iter);
        }
        Commands::Describe { config } => {
            let config = load(&config_path(config))?;
            let pool = providers::create_pool(&config)?;
            println!("{}", pool.describe().to_json()?);
        }
        Commands::Run {
            message,
            stream,
            config,
        } => {
            let config = load(&config_path(config))?;
            let mut pool = providers::create_pool(&config)?;

            if let Some(msg) = message {
                run_once(&mut pool, &msg, stream).await?;
            } else {
                interactive(&mut pool, stream).await?;
            }
        }
    }

    Ok(())
}

async fn run_once(pool: &mut Pool, message: &str, stream: bool) -> Result<()> {
    if !stream {
        let seen = pool.state().history().len();
        let outcome = pool.run(message).await?;
        for msg in pool.state().history().iter().skip(seen + 1) {
            if let Some(agent) = &msg.agent_name {
                println!("[{}]\n{}\n", agent, msg.content);
            }
        }
        println!("-- {} after {} turn(s)", outcome.stop_reason, outcome.turns);
        return Ok(());
    }

    let mut events = pool.stream_observe(message);
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event? {
            PoolEvent::TurnStarted { agent, .. } => println!("[{}]", agent),
            PoolEvent::Fragment { text, .. } => {
                print!("{}", text);
                let _ = stdout.flush();
            }
            PoolEvent::TurnCompleted { .. } => println!("\n"),
            PoolEvent::Finished(outcome) => {
                println!("-- {} after {} turn(s)", outcome.stop_reason, outcome.turns);
            }
        }
    }
    Ok(())
}

async fn interactive(pool: &mut Pool, stream: bool) -> Result<()> {
    use std::io::BufRead;

    println!("troupe: {}", pool.agent_names().join(", "));
    println!("Type your message (Ctrl+D to exit):\n");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => {
                println!();
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                if let Err(e) = run_once(pool, input, stream).await {
                    eprintln!("Error: {:#}", e);
                }
                println!();
            }
        }
    }
    Ok(())
}
