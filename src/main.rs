use std::{fs, path::PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use autoflow::{Config, DesktopAgent, EngineBuilder, RunOptions, RunStatus, Vars, Workflow, WorkflowModel, scheduler};

#[derive(Parser)]
#[command(name = "autoflow", version, about = "Workflow automation runtime")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a workflow file and run it once
    Run {
        /// Workflow definition (JSON)
        workflow: PathBuf,
        /// Initial context values as a JSON object
        #[arg(long)]
        input: Option<String>,
        /// Use mocked responses and auto-approve gates
        #[arg(long)]
        test_mode: bool,
        /// Approve every gate the run stops on
        #[arg(long)]
        approve: bool,
    },
    /// Check a workflow file and print its execution order
    Validate {
        workflow: PathBuf,
    },
    /// Print the next fire times of a cron expression
    Preview {
        cron: String,
        #[arg(short, long, default_value = "UTC")]
        timezone: String,
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
    /// Check that the desktop agent can reach a display
    Preflight {
        /// Agent base url, defaults to `engine.desktop_agent_url`
        #[arg(long)]
        agent: Option<String>,
    },
    /// Deploy workflows and run the configured schedules until interrupted
    Schedule {
        workflows: Vec<PathBuf>,
    },
}

fn load_workflow(path: &PathBuf) -> anyhow::Result<WorkflowModel> {
    let data = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(WorkflowModel::from_json(&data)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autoflow=info,warn"))).with_target(false).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::create(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Validate {
            workflow,
        } => {
            let model = load_workflow(&workflow)?;
            let graph = Workflow::try_from(&model)?;
            if !graph.is_acyclic() {
                warn!(workflow_id = %model.id, "workflow contains a cycle");
            }
            let order: Vec<&str> = graph.order_nodes().iter().map(|n| n.id.as_str()).collect();
            println!("{}: {} nodes, {} edges", model.id, graph.node_count(), graph.edge_count());
            println!("order: {}", order.join(" -> "));
        }
        Commands::Preview {
            cron,
            timezone,
            count,
        } => {
            for fire in scheduler::preview(&cron, &timezone, count, Utc::now())? {
                println!("{}", fire.to_rfc3339());
            }
        }
        Commands::Preflight {
            agent,
        } => {
            let url = agent.or(config.engine.desktop_agent_url.clone()).context("no desktop agent url given")?;
            let preflight = DesktopAgent::new(url).preflight().await?;
            println!("{}", serde_json::to_string_pretty(&preflight)?);
            if !preflight.ok {
                anyhow::bail!("desktop agent has no display: {}", preflight.error.unwrap_or_default());
            }
        }
        Commands::Run {
            workflow,
            input,
            test_mode,
            approve,
        } => {
            let engine = EngineBuilder::new().config(config).build()?;
            engine.launch()?;

            let model = load_workflow(&workflow)?;
            engine.deploy(&model)?;
            let input: Vars = match input {
                Some(json) => serde_json::from_str(&json).context("--input must be a JSON object")?,
                None => Vars::new(),
            };
            let mut run = engine
                .run_workflow(
                    &model.id,
                    RunOptions {
                        test_mode,
                        input,
                        trigger: None,
                    },
                )
                .await?;

            while approve && run.status == RunStatus::WaitingApproval {
                let Some(gate) = run.waiting_on().cloned() else {
                    break;
                };
                info!(run_id = %run.id, node_id = %gate, "approving gate");
                run = engine.approve(&run.id, &gate).await?;
            }

            println!("{}", serde_json::to_string_pretty(&run)?);
            engine.shutdown();
            if run.status == RunStatus::Failed {
                anyhow::bail!("run {} failed: {}", run.id, run.error.unwrap_or_default());
            }
        }
        Commands::Schedule {
            workflows,
        } => {
            let triggers = config.triggers.clone();
            let engine = EngineBuilder::new().config(config).build()?;
            for path in workflows.iter() {
                let model = load_workflow(path)?;
                let version = engine.deploy(&model)?;
                info!(workflow_id = %model.id, version, "deployed");
            }
            for trigger in triggers {
                let trigger = engine.scheduler().create_trigger(trigger)?;
                info!(schedule_id = %trigger.id, workflow_id = %trigger.workflow_id, cron = %trigger.cron, "schedule registered");
            }
            engine.launch()?;

            tokio::signal::ctrl_c().await?;
            info!("interrupted, shutting down");
            engine.shutdown();
        }
    }
    Ok(())
}
