//! Boardroom CLI
//!
//! Persistent agent roles working in shared project workspaces.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use boardroom::board::BoardFilter;
use boardroom::roles::RoleCatalog;
use boardroom::workspace::ActivityLog;
use boardroom::{AgentRuntime, Config, DecisionEntry, Priority, ScriptedClient, TurnEvent};

#[derive(Parser)]
#[command(name = "boardroom")]
#[command(author, version, about = "Persistent agents in shared project workspaces")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .boardroom directory
    Init,

    /// Activate an agent role for a project
    Initialize {
        /// Project ID
        project: String,

        /// Agent role (ceo, frontend, backend, devops, ...)
        role: String,

        /// Initialization context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },

    /// Send a message to an agent
    Invoke {
        /// Project ID
        project: String,

        /// Agent role
        role: String,

        /// Message for the agent
        message: String,

        /// Wait for the full response instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Show an agent's status
    Status {
        /// Project ID
        project: String,

        /// Agent role
        role: String,
    },

    /// List known roles
    Roles,

    /// List capabilities available in a project
    Capabilities {
        /// Project ID
        project: String,

        /// Only those a role may call
        #[arg(long)]
        role: Option<String>,
    },

    /// Read the team board
    Board {
        /// Project ID
        project: String,

        /// Most recent N messages (0 = all)
        #[arg(long, short, default_value = "10")]
        limit: usize,

        /// Only this priority
        #[arg(long)]
        priority: Option<String>,

        /// Only this author
        #[arg(long)]
        author: Option<String>,
    },

    /// List shared notes, or show one
    Notes {
        /// Project ID
        project: String,

        /// Note name
        name: Option<String>,
    },

    /// Record a business decision for an agent
    Decide {
        /// Project ID
        project: String,

        /// Agent role
        role: String,

        /// Short title
        title: String,

        /// What was decided
        description: String,

        /// Why
        #[arg(long)]
        rationale: Option<String>,
    },

    /// List an agent's decisions
    Decisions {
        /// Project ID
        project: String,

        /// Agent role
        role: String,
    },

    /// Show recent tool dispatches
    Activity {
        /// Project ID
        project: String,

        /// Most recent N entries
        #[arg(long, short, default_value = "20")]
        limit: usize,
    },

    /// Delete a project's workspace
    Teardown {
        /// Project ID
        project: String,

        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG takes precedence
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Init => {
            boardroom::config::init()?;
            info!("Initialized .boardroom directory");
        }

        Commands::Initialize {
            project,
            role,
            context,
        } => {
            let context = match context {
                Some(raw) => serde_json::from_str::<Value>(&raw)
                    .context("--context must be valid JSON")?,
                None => Value::Null,
            };

            let runtime = offline_runtime(config)?;
            let record = runtime.initialize(&project, &role, context).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Invoke {
            project,
            role,
            message,
            no_stream,
        } => {
            let runtime = AgentRuntime::from_config(config)?;
            if no_stream {
                let outcome = runtime.invoke(&project, &role, &message).await?;
                for exchange in &outcome.tool_calls {
                    let mark = if exchange.outcome.success { "ok" } else { "failed" };
                    eprintln!("[tool] {} {}", exchange.capability, mark);
                }
                println!("{}", outcome.response);
            } else {
                stream_turn(&runtime, &project, &role, &message).await?;
            }
        }

        Commands::Status { project, role } => {
            let runtime = offline_runtime(config)?;
            let record = runtime.status(&project, &role).await?;
            println!("Project:  {}", record.project_id);
            println!("Role:     {}", record.agent_role);
            println!("Status:   {}", record.status);
            println!("Turns:    {}", record.conversation.len());
            println!("Decisions: {}", record.decisions.len());
            if let Some(last) = record.last_active {
                println!("Active:   {}", last.format("%Y-%m-%d %H:%M:%S"));
            }
        }

        Commands::Roles => {
            let roles = RoleCatalog::load(&config, Some(Path::new(".boardroom/roles")))?;
            for name in roles.names() {
                let role = roles.get(name)?;
                let tools = if role.tools.is_empty() {
                    "all".to_string()
                } else {
                    role.tools.join(", ")
                };
                println!("{:<10} {} [{}]", name, role.description, tools);
            }
        }

        Commands::Capabilities { project, role } => {
            let runtime = offline_runtime(config)?;
            for capability in runtime.capabilities(&project, role.as_deref()).await? {
                println!(
                    "{:<24} {:<11} {}",
                    capability.name, capability.module, capability.description
                );
            }
        }

        Commands::Board {
            project,
            limit,
            priority,
            author,
        } => {
            let filter = BoardFilter {
                priority: priority.as_deref().map(str::parse::<Priority>).transpose()?,
                author,
            };

            let runtime = offline_runtime(config)?;
            let page = runtime.board(&project).await?.read(limit, &filter).await?;
            for message in &page.messages {
                println!(
                    "{} [{}] {}: {}",
                    message.timestamp.format("%Y-%m-%d %H:%M"),
                    message.priority,
                    message.author,
                    message.body
                );
            }
            println!(
                "({} shown, {} matching, {} total)",
                page.messages.len(),
                page.filtered_count,
                page.total_count
            );
        }

        Commands::Notes { project, name } => {
            let runtime = offline_runtime(config)?;
            let board = runtime.board(&project).await?;
            match name {
                Some(name) => match board.read_note(&name).await? {
                    Some(note) => {
                        println!("# {} (by {}, {})", note.name, note.author, note.updated_at);
                        println!("{}", note.content);
                    }
                    None => bail!("No shared note named '{}'", name),
                },
                None => {
                    for note in board.list_notes().await? {
                        println!(
                            "{:<24} {:<10} {}",
                            note.name,
                            note.author,
                            note.updated_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
            }
        }

        Commands::Decide {
            project,
            role,
            title,
            description,
            rationale,
        } => {
            let mut entry = DecisionEntry::new(title, description);
            if let Some(rationale) = rationale {
                entry = entry.with_rationale(rationale);
            }

            let runtime = offline_runtime(config)?;
            let record = runtime.record_decision(&project, &role, entry).await?;
            info!(
                project = %project,
                role = %role,
                decisions = record.decisions.len(),
                "Decision recorded"
            );
        }

        Commands::Decisions { project, role } => {
            let runtime = offline_runtime(config)?;
            let record = runtime.status(&project, &role).await?;
            for decision in &record.decisions {
                println!(
                    "{} {}: {}",
                    decision.timestamp.format("%Y-%m-%d %H:%M"),
                    decision.title,
                    decision.description
                );
                if let Some(rationale) = &decision.rationale {
                    println!("    because {}", rationale);
                }
            }
        }

        Commands::Activity { project, limit } => {
            let runtime = offline_runtime(config)?;
            let log = ActivityLog::new(runtime.workspace(&project).await?);
            for entry in log.tail(limit)? {
                let outcome = match entry.error_kind {
                    Some(kind) => kind.to_string(),
                    None => "ok".to_string(),
                };
                println!(
                    "{} {:<24} {:>6} ms  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.capability,
                    entry.duration_ms,
                    outcome
                );
            }
        }

        Commands::Teardown { project, yes } => {
            if !yes {
                bail!("Refusing to delete workspace for '{}' without --yes", project);
            }
            let runtime = offline_runtime(config)?;
            runtime.teardown(&project).await?;
            info!("Removed workspace for {}", project);
        }
    }

    Ok(())
}

/// Runtime for commands that never call the model
fn offline_runtime(config: Config) -> anyhow::Result<AgentRuntime> {
    let roles = RoleCatalog::load(&config, Some(Path::new(".boardroom/roles")))?;
    Ok(AgentRuntime::new(config, Arc::new(ScriptedClient::new()), roles))
}

/// Print a streaming turn as it happens
async fn stream_turn(
    runtime: &AgentRuntime,
    project: &str,
    role: &str,
    message: &str,
) -> anyhow::Result<()> {
    let mut events = runtime.invoke_streaming(project, role, message).await?;
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        match event {
            TurnEvent::Content { text } => {
                print!("{}", text);
                stdout.flush()?;
            }
            TurnEvent::ToolStart {
                name, arguments, ..
            } => {
                eprintln!("\n[tool] {} {}", name, arguments);
            }
            TurnEvent::ToolResult { name, outcome, .. } => {
                eprintln!("[tool] {} ok ({} ms)", name, outcome.duration_ms);
            }
            TurnEvent::ToolError { name, outcome, .. } => {
                eprintln!(
                    "[tool] {} failed: {}",
                    name,
                    outcome.error.unwrap_or_default()
                );
            }
            TurnEvent::Error { kind, message } => {
                println!();
                bail!("{}: {}", kind, message);
            }
            TurnEvent::Done { .. } => {
                println!();
            }
        }
    }

    Ok(())
}
