//! Crossfire CLI
//!
//! # Usage
//!
//! ```bash
//! # Debate with every configured agent, stepping through rounds by hand
//! crossfire debate "Is a hot dog a sandwich?"
//!
//! # Let the agents argue until they all pass
//! crossfire debate "Tabs or spaces?" --mode auto --agents gpt,claude
//!
//! # Dry run without a browser
//! crossfire --backend simulated debate "Ping?" --mode auto
//!
//! # Manage participants
//! crossfire agents add "GPT-4" --provider chatgpt --system-prompt "Be terse."
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use coordination::broker::SessionHost;
use coordination::simulation::{default_responder, SimulatedHost};
use coordination::{
    AgentId, AgentUpdate, ConfigStore, ConnectionState, DebateConfig, DebateDriver, DebateMode,
    Orchestrator, ProviderKind,
};
use crossfire::config::{Backend, RuntimeConfig};
use crossfire::console;
use crossfire::webdriver::{WebDriverClient, WebDriverHost};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debate configuration file (overrides CROSSFIRE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Automation backend hosting the agent sessions
    #[arg(long, value_enum, global = true, default_value_t = Backend::Webdriver)]
    backend: Backend,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a question and run the debate
    Debate {
        question: String,
        /// Comma-separated agent ids (default: every configured agent)
        #[arg(long, value_delimiter = ',')]
        agents: Vec<AgentId>,
        /// `auto` keeps cross-debating until everyone passes
        #[arg(long, default_value = "manual")]
        mode: DebateMode,
    },
    /// Report whether each agent's session is alive
    Check {
        #[arg(long, value_delimiter = ',')]
        agents: Vec<AgentId>,
    },
    /// Close every session and open fresh ones
    Reset {
        #[arg(long, value_delimiter = ',')]
        agents: Vec<AgentId>,
    },
    /// Open a fresh session for one agent
    Open { agent: AgentId },
    /// Manage participants
    Agents {
        #[command(subcommand)]
        action: AgentsCommand,
    },
    /// Inspect or change prompt templates and the pass keyword
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AgentsCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        provider: ProviderKind,
        #[arg(long, default_value = "")]
        system_prompt: String,
        /// Display colour (default: the provider's)
        #[arg(long)]
        color: Option<String>,
    },
    Update {
        id: AgentId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        provider: Option<ProviderKind>,
        #[arg(long)]
        system_prompt: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    Remove {
        id: AgentId,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Show,
    SetPassKeyword { keyword: String },
    /// Read the initial prompt template from a file
    SetInitialTemplate { file: PathBuf },
    /// Read the final ranking prompt template from a file
    SetRankingTemplate { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut runtime = RuntimeConfig::default();
    if let Some(path) = cli.config {
        runtime.config_path = path;
    }
    let mut store = ConfigStore::load(runtime.config_path.clone())
        .with_context(|| format!("Failed to load {}", runtime.config_path.display()))?;

    match cli.command {
        Command::Agents { action } => manage_agents(&mut store, action),
        Command::Config { action } => manage_config(&mut store, action),
        Command::Debate {
            question,
            agents,
            mode,
        } => {
            let config = store.config().clone();
            let participants = participants(&config, agents)?;
            let orch = orchestrator(&runtime, cli.backend, &config).await?;
            run_debate(orch, &config, participants, mode, &question).await
        }
        Command::Check { agents } => {
            let config = store.config().clone();
            let participants = participants(&config, agents)?;
            let orch = orchestrator(&runtime, cli.backend, &config).await?;
            let mut driver = DebateDriver::new(orch.clone(), participants, DebateMode::Manual);
            driver.check_connections().await;
            print_connections(&config, &driver);
            orch.shutdown().await;
            Ok(())
        }
        Command::Reset { agents } => {
            let config = store.config().clone();
            let participants = participants(&config, agents)?;
            let orch = orchestrator(&runtime, cli.backend, &config).await?;
            let mut driver = DebateDriver::new(orch.clone(), participants, DebateMode::Manual);
            driver.reset_all().await;
            driver.check_connections().await;
            print_connections(&config, &driver);
            orch.shutdown().await;
            Ok(())
        }
        Command::Open { agent } => {
            let config = store.config().clone();
            let participants = participants(&config, vec![agent.clone()])?;
            let orch = orchestrator(&runtime, cli.backend, &config).await?;
            let mut driver = DebateDriver::new(orch.clone(), participants, DebateMode::Manual);
            driver.open(&agent).await;
            print_connections(&config, &driver);
            orch.shutdown().await;
            Ok(())
        }
    }
}

/// Selected agents in the given order, or every configured agent.
fn participants(config: &DebateConfig, selected: Vec<AgentId>) -> Result<Vec<AgentId>> {
    if selected.is_empty() {
        if config.agents.is_empty() {
            bail!("No agents configured; add one with `crossfire agents add`");
        }
        return Ok(config.agents.iter().map(|a| a.id.clone()).collect());
    }
    for id in &selected {
        if config.agent(id).is_none() {
            bail!("Unknown agent: {}", id);
        }
    }
    Ok(selected)
}

async fn orchestrator(
    runtime: &RuntimeConfig,
    backend: Backend,
    config: &DebateConfig,
) -> Result<Arc<Orchestrator>> {
    let host: Arc<dyn SessionHost> = match backend {
        Backend::Simulated => SimulatedHost::new(default_responder(&config.pass_keyword)).shared(),
        Backend::Webdriver => {
            let client = match &runtime.webdriver_session {
                Some(session) => WebDriverClient::attach(
                    &runtime.webdriver_url,
                    session,
                    runtime.webdriver_request_timeout,
                ),
                None => {
                    WebDriverClient::connect(&runtime.webdriver_url, runtime.webdriver_request_timeout)
                        .await
                }
            }
            .with_context(|| format!("Failed to reach WebDriver at {}", runtime.webdriver_url))?;
            info!(
                session = client.session_id(),
                "Set WEBDRIVER_SESSION to this id to reuse the browser"
            );
            Arc::new(WebDriverHost::new(client))
        }
    };
    Ok(Arc::new(Orchestrator::new(
        host,
        config.clone().shared(),
        runtime.timing.clone(),
    )))
}

async fn run_debate(
    orch: Arc<Orchestrator>,
    config: &DebateConfig,
    participants: Vec<AgentId>,
    mode: DebateMode,
    question: &str,
) -> Result<()> {
    let progress = console::spawn_progress(orch.bus(), config.clone());
    let mut driver = DebateDriver::new(orch.clone(), participants, mode);

    driver
        .start_debate(question)
        .await
        .context("Failed to start the debate")?;
    let mut shown = console::print_turns(config, driver.session(), 0);

    // Auto mode takes the first cross-debate step itself.
    if mode == DebateMode::Auto && !driver.session().phase.is_terminal() {
        match driver.cross_debate().await {
            Ok(outcome) => info!(?outcome, "Automatic debate finished"),
            Err(e) => println!("cannot cross-debate: {}", e),
        }
        shown = console::print_turns(config, driver.session(), shown);
    }

    if driver.session().phase.is_terminal() {
        println!("{}", console::render_outcome(config, driver.session()));
    } else {
        println!("{}", console::HELP);
        console::run_manual(&mut driver, config).await?;
    }

    orch.shutdown().await;
    progress.abort();
    Ok(())
}

fn print_connections(config: &DebateConfig, driver: &DebateDriver) {
    for agent_id in &driver.session().participants {
        let state = match driver.session().connection.get(agent_id) {
            Some(ConnectionState::Connected) => "connected",
            Some(ConnectionState::Disconnected) => "disconnected",
            Some(ConnectionState::Checking) => "checking",
            Some(ConnectionState::Unknown) | None => "unknown",
        };
        println!("{:<24} {}", config.display_name(agent_id), state);
    }
}

fn manage_agents(store: &mut ConfigStore, action: AgentsCommand) -> Result<()> {
    match action {
        AgentsCommand::List => {
            for agent in &store.config().agents {
                println!(
                    "{:<34} {:<20} {:<8} {}",
                    agent.id, agent.name, agent.provider, agent.color
                );
            }
        }
        AgentsCommand::Add {
            name,
            provider,
            system_prompt,
            color,
        } => {
            let agent = store.add_agent(&name, provider, &system_prompt, color.as_deref())?;
            println!("{}", agent.id);
        }
        AgentsCommand::Update {
            id,
            name,
            provider,
            system_prompt,
            color,
        } => {
            store.update_agent(
                &id,
                AgentUpdate {
                    name,
                    provider,
                    color,
                    system_prompt,
                },
            )?;
        }
        AgentsCommand::Remove { id } => store.delete_agent(&id)?,
    }
    Ok(())
}

fn manage_config(store: &mut ConfigStore, action: ConfigCommand) -> Result<()> {
    match action {
        ConfigCommand::Show => {
            println!("{}", serde_json::to_string_pretty(store.config())?);
        }
        ConfigCommand::SetPassKeyword { keyword } => store.set_pass_keyword(&keyword)?,
        ConfigCommand::SetInitialTemplate { file } => {
            let template = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            store.set_initial_prompt_template(&template)?;
        }
        ConfigCommand::SetRankingTemplate { file } => {
            let template = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            store.set_final_ranking_prompt_template(&template)?;
        }
    }
    Ok(())
}
