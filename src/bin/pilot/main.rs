mod face;

use std::sync::Arc;

use anyhow::Result;
use browser_pilot::agent::{Agent, AgentEvent, AgentSettings, Budget, RunStatus};
use browser_pilot::brain::OpenAiOracle;
use browser_pilot::config::Config;
use browser_pilot::consent::NoConsent;
use browser_pilot::dom::ObservationMode;
use browser_pilot::executor::ExecutorSettings;
use browser_pilot::hands::ChromeLauncher;
use browser_pilot::overlay::DomOverlay;
use browser_pilot::registry::{LaunchSettings, SessionRegistry};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "pilot", version, about = "Drive Chrome toward a goal with an LLM planner")]
struct Cli {
    /// Debug-level logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run Chrome without a window (overrides PILOT_HEADLESS)
    #[arg(long, global = true)]
    headless: bool,

    /// Show the cursor dot and target highlights
    #[arg(long, global = true)]
    visualize: bool,

    /// Read-only run: headless, network-idle loads, consent banners left alone
    #[arg(long, global = true)]
    extract_only: bool,

    /// Send the oracle an outline of interactive elements instead of raw HTML
    /// (overrides PILOT_OBSERVATION)
    #[arg(long, global = true)]
    outline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ReAct loop: one action per oracle turn until finish or budget
    Run {
        #[arg(short, long)]
        goal: String,
        #[arg(short, long)]
        url: String,
        #[arg(short, long, default_value = "default")]
        session: String,
        #[arg(long)]
        steps: Option<usize>,
        #[arg(long)]
        retries: Option<usize>,
    },
    /// Ask for a whole plan up front and execute it in order
    Plan {
        #[arg(short, long)]
        instruction: String,
        #[arg(short, long)]
        url: String,
        #[arg(short, long, default_value = "default")]
        session: String,
    },
    /// Read goals from stdin, one per line, against a single session
    Chat {
        #[arg(short, long)]
        url: Option<String>,
        #[arg(short, long, default_value = "default")]
        session: String,
    },
    /// Web UI: POST /command, /note, /pause, /resume; GET /events
    Serve {
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
        #[arg(short, long)]
        url: Option<String>,
        #[arg(short, long, default_value = "default")]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = Config::from_env();
    config.headless |= cli.headless;

    let oracle = Arc::new(OpenAiOracle::new(&config)?);
    let registry = Arc::new(SessionRegistry::new(ChromeLauncher));

    let mut settings = AgentSettings {
        launch: config.launch_settings(),
        snapshot_dir: config.snapshot_dir.clone(),
        observation_mode: if cli.outline {
            ObservationMode::Outline
        } else {
            config.observation
        },
        ..AgentSettings::default()
    };
    if cli.extract_only {
        settings.executor = ExecutorSettings::extraction();
        settings.launch = LaunchSettings {
            chrome_path: config.chrome_path.clone(),
            ..LaunchSettings::headless()
        };
    }
    settings.executor.visualize = cli.visualize;

    let mut agent = Agent::new(registry.clone(), oracle, settings);
    if cli.visualize {
        agent = agent.with_overlay(Arc::new(DomOverlay));
    }
    if cli.extract_only {
        agent = agent.with_consent(Arc::new(NoConsent));
    }

    let budget = Budget {
        steps: config.max_steps,
        retries: config.max_retries,
    };

    let outcome = match cli.command {
        Commands::Run {
            goal,
            url,
            session,
            steps,
            retries,
        } => {
            let budget = Budget {
                steps: steps.unwrap_or(budget.steps),
                retries: retries.unwrap_or(budget.retries),
            };
            run(&agent, &goal, &url, &session, budget).await
        }
        Commands::Plan {
            instruction,
            url,
            session,
        } => plan(&agent, &instruction, &url, &session).await,
        Commands::Chat { url, session } => chat(&agent, url.as_deref(), &session, budget).await,
        Commands::Serve { port, url, session } => serve(agent, port, url, session, budget).await,
    };

    let closing = registry.clone();
    tokio::task::spawn_blocking(move || closing.close_all()).await?;

    match outcome {
        Ok(code) if code != 0 => std::process::exit(code),
        other => other.map(|_| ()),
    }
}

async fn run(
    agent: &Agent<ChromeLauncher>,
    goal: &str,
    url: &str,
    session: &str,
    budget: Budget,
) -> Result<i32> {
    let report = agent.run_agent(goal, url, session, budget).await?;
    for entry in report.memory.entries() {
        println!("{} -> {}", entry.action, entry.observation);
    }
    match report.status {
        RunStatus::Finished => {
            println!("finished after {} steps", report.steps);
            if let Some(summary) = &report.summary {
                println!("{summary}");
            }
            Ok(0)
        }
        RunStatus::Exhausted => {
            eprintln!("gave up after {} steps without finish", report.steps);
            Ok(2)
        }
    }
}

async fn plan(
    agent: &Agent<ChromeLauncher>,
    instruction: &str,
    url: &str,
    session: &str,
) -> Result<i32> {
    let report = agent.run_auto_plan(instruction, url, session).await?;
    for value in &report.extracted {
        println!("{value}");
    }
    println!("{}/{} plan steps executed", report.steps, report.plan.len());
    match report.failure {
        Some(failure) => {
            eprintln!("stopped: {failure}");
            Ok(1)
        }
        None => Ok(0),
    }
}

/// Terminal loop: every line is a new goal on the same browser session.
async fn chat(
    agent: &Agent<ChromeLauncher>,
    url: Option<&str>,
    session: &str,
    budget: Budget,
) -> Result<i32> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut start_url = url.unwrap_or_default().to_string();

    eprintln!("Type a goal and press Enter. `exit` quits.");
    while let Some(line) = lines.next_line().await? {
        let goal = line.trim();
        if goal.is_empty() {
            continue;
        }
        if goal.eq_ignore_ascii_case("exit") || goal.eq_ignore_ascii_case("quit") {
            break;
        }
        match agent.run_agent(goal, &start_url, session, budget).await {
            Ok(report) if report.status == RunStatus::Finished => {
                println!("done: {}", report.summary.unwrap_or_else(|| "goal reached".into()));
            }
            Ok(report) => println!("gave up after {} steps", report.steps),
            Err(e) => error!(error = %e, "goal aborted"),
        }
        // later goals continue from wherever the page is
        start_url.clear();
    }
    Ok(0)
}

async fn serve(
    agent: Agent<ChromeLauncher>,
    port: u16,
    url: Option<String>,
    session: String,
    budget: Budget,
) -> Result<i32> {
    let (mut cmd_rx, events) = face::start_server(port, agent.notes()).await?;
    let agent = agent.with_events(events.clone());
    let mut start_url = url.unwrap_or_default();

    loop {
        let goal = tokio::select! {
            received = cmd_rx.recv() => match received {
                Some(goal) => goal,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        };
        info!(%goal, "command received");
        if let Err(e) = agent.run_agent(&goal, &start_url, &session, budget).await {
            warn!(error = %e, "goal aborted");
            let _ = events.send(AgentEvent::Failed { message: e.to_string() });
        }
        start_url.clear();
    }
    Ok(0)
}
