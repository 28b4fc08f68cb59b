mod config;
mod error;

use anyhow::{Context, Result};
use clap::Parser;
use parley::models::tool::ToolCall;
use parley::providers::configs::{AgentConfig, ProviderConfig};
use parley::providers::factory::ProviderType;
use parley::tools::{LocalWorkspace, WorkspaceTools};
use parley::{Agent, SendOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Talk to an LLM backend that can look around your project")]
struct Cli {
    /// TOML config file [default: ~/.config/parley/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend to use, read from its usual environment variables
    /// (ollama, openai, anthropic, gemini, claude, codex, gemini-cli)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model name override
    #[arg(short, long)]
    model: Option<String>,

    /// Project directory the tools may read
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Do not offer the project tools to the model
    #[arg(long)]
    no_tools: bool,

    /// System prompt override
    #[arg(long)]
    system: Option<String>,

    /// Print only the final answer instead of streaming it
    #[arg(short, long)]
    silent: bool,

    /// Hand the terminal to the backend's own interactive mode (CLI backends)
    #[arg(short, long)]
    interactive: bool,

    /// List the supported backends and exit
    #[arg(long)]
    list_providers: bool,

    /// Send this message and exit instead of starting a chat
    #[arg(trailing_var_arg = true)]
    message: Vec<String>,
}

fn resolve_config(cli: &Cli) -> Result<AgentConfig> {
    let mut agent_config = config::load(cli.config.as_deref())?;
    if let Some(provider) = &cli.provider {
        agent_config.provider = ProviderConfig::from_env(provider)?;
    }
    if let Some(model) = &cli.model {
        agent_config.provider.set_model(model);
    }
    if let Some(system) = &cli.system {
        agent_config.system_prompt = Some(system.clone());
    }
    agent_config.provider = agent_config.provider.with_env_credentials();
    Ok(agent_config)
}

fn build_agent(cli: &Cli, agent_config: AgentConfig) -> Result<Agent> {
    let mut agent = Agent::from_config(agent_config)?;
    if !agent.provider().is_available() {
        tracing::warn!(provider = agent.provider().name(), "backend does not look available");
    }

    if !cli.no_tools {
        let workspace = LocalWorkspace::new(&cli.root)
            .with_context(|| format!("cannot use {} as the project root", cli.root.display()))?;
        agent = agent
            .with_executor(Arc::new(WorkspaceTools::new(Arc::new(workspace))))
            .with_observer(Arc::new(|call: &ToolCall| {
                let args = describe_arguments(call);
                eprintln!("[tool] {}({})", call.name, args);
            }));
    }

    if !cli.silent {
        agent = agent.with_sink(Arc::new(|text: &str| {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(text.as_bytes());
            let _ = stdout.flush();
        }));
    }
    Ok(agent)
}

fn describe_arguments(call: &ToolCall) -> String {
    call.arguments
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn turn(agent: &mut Agent, message: &str, silent: bool) -> Result<()> {
    let options = SendOptions { silent };
    let reply = agent.send(message, options).await?;
    if silent {
        println!("{}", reply);
    } else {
        println!();
    }
    if reply.is_empty() {
        eprintln!("(no answer: the model kept asking for tools)");
    }
    Ok(())
}

async fn chat(agent: &mut Agent, silent: bool) -> Result<()> {
    eprintln!(
        "parley with {} ({} tools). /clear resets the conversation, /exit quits.",
        agent.provider().name(),
        agent.tools().len()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                agent.clear_history();
                eprintln!("(conversation cleared)");
            }
            message => {
                // A failed turn is rolled back, so the chat can go on
                if let Err(e) = turn(agent, message, silent).await {
                    eprintln!("error: {}", e);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.list_providers {
        for provider in ProviderType::iter() {
            println!("{}", provider);
        }
        return Ok(());
    }

    let agent_config = resolve_config(&cli)?;
    tracing::info!(provider = agent_config.provider.name(), "starting");
    let mut agent = build_agent(&cli, agent_config)?;

    let message = cli.message.join(" ");
    if cli.interactive {
        let prompt = Some(message.as_str()).filter(|m| !m.trim().is_empty());
        agent.interactive(prompt).await?;
        return Ok(());
    }

    if message.trim().is_empty() {
        chat(&mut agent, cli.silent).await
    } else {
        turn(&mut agent, &message, cli.silent).await
    }
}
