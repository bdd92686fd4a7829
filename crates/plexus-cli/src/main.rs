//! Plexus CLI - agent execution kernel.
//!
//! Single binary that provides:
//! - `plexus run` - run a request in swarm or single-agent mode
//! - `plexus capabilities` - print the capability catalog
//! - `plexus events` - show recent events from the log
//! - `plexus init` - write a default project config

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use plexus_core::{
    config::DEFAULT_CONFIG_YAML,
    observability::{self, ChannelSink, FanoutSink, JsonlSink},
    state::Conversation,
    CapabilityRegistry, EventSink, KernelConfig, KernelError, OpenAiCompatClient,
    ProgressEvent, Session,
};

#[derive(Parser)]
#[command(name = "plexus")]
#[command(about = "Agent execution kernel", version)]
struct Cli {
    /// Project root directory
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a natural-language request
    Run {
        /// The request
        request: String,

        /// Execution mode
        #[arg(long, value_enum, default_value_t = Mode::Swarm)]
        mode: Mode,

        /// Event stream format on stdout
        #[arg(long, value_enum, default_value_t = Format::Jsonl)]
        format: Format,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,
    },

    /// Print the capability catalog
    Capabilities,

    /// Show recent events
    Events {
        /// Number of events to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Initialize a new project
    Init,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Swarm,
    Single,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Jsonl,
    Sse,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the event stream
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let project_root = match cli.project {
        Some(p) => p,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Run {
            request,
            mode,
            format,
            model,
        } => run_request(&project_root, &request, mode, format, model).await,
        Commands::Capabilities => show_capabilities(&project_root),
        Commands::Events { limit } => show_events(&project_root, limit),
        Commands::Init => init_project(&project_root),
    }
}

fn load_config(project_root: &Path) -> Result<KernelConfig> {
    let mut config = KernelConfig::load_from_project(project_root)?;
    config.resolve_paths(project_root);
    Ok(config)
}

async fn run_request(
    project_root: &Path,
    request: &str,
    mode: Mode,
    format: Format,
    model: Option<String>,
) -> Result<()> {
    let mut config = load_config(project_root)?;
    if let Some(model) = model {
        config.model.model = model;
    }
    tracing::info!(project = %project_root.display(), model = %config.model.model, "Starting run");

    let session_id = Session::new_id();
    let (channel, rx) = ChannelSink::new();
    let log = JsonlSink::new(&config.events_path).with_session(&session_id);
    let sink: Arc<dyn EventSink> = Arc::new(FanoutSink::new(vec![
        Arc::new(channel) as Arc<dyn EventSink>,
        Arc::new(log) as Arc<dyn EventSink>,
    ]));

    let client = Arc::new(OpenAiCompatClient::from_settings(&config.model));
    let printer = tokio::spawn(print_events(rx, format));

    let outcome = {
        let session = Session::new(config, client, sink)?.with_id(session_id);
        match mode {
            Mode::Single => run_single(&session, request).await,
            Mode::Swarm => run_swarm(&session, request).await,
        }
        // Dropping the session closes the event channel
    };

    printer.await.context("Event printer failed")??;
    outcome.map_err(Into::into)
}

async fn run_single(session: &Session, request: &str) -> Result<(), KernelError> {
    let mut conversation = Conversation::new();
    session
        .agent_loop()
        .run_turn(&mut conversation, request)
        .await
        .map(|_| ())
}

async fn run_swarm(session: &Session, request: &str) -> Result<(), KernelError> {
    let scheduler = session.scheduler();
    match scheduler.decompose(request).await {
        Ok(graph) => {
            let outcome = scheduler.run_graph(request, &graph).await;
            tracing::info!(
                succeeded = outcome.report.succeeded(),
                failed = outcome.report.failed(),
                unresolved = outcome.report.unresolved.len(),
                "Swarm run finished"
            );
            Ok(())
        }
        Err(KernelError::Decomposition(reason)) => {
            tracing::warn!(%reason, "Decomposition failed, falling back to single-agent mode");
            session
                .sink()
                .emit(ProgressEvent::phase("fallback", Some(reason)))
                .await;
            run_single(session, request).await
        }
        Err(e) => {
            scheduler.report_failure(&e).await;
            Err(e)
        }
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<ProgressEvent>, format: Format) -> Result<()> {
    while let Some(event) = rx.recv().await {
        let rendered = match format {
            Format::Jsonl => format!("{}\n", event.to_json_line()),
            Format::Sse => event.to_sse(),
        };
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(rendered.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

fn show_capabilities(project_root: &Path) -> Result<()> {
    let config = load_config(project_root)?;
    let registry = CapabilityRegistry::builtin(&config.capabilities);
    registry.validate()?;
    println!("{}", serde_json::to_string_pretty(&registry.catalog())?);
    Ok(())
}

fn show_events(project_root: &Path, limit: usize) -> Result<()> {
    let config = load_config(project_root)?;
    let events = observability::read_recent(&config.events_path, limit);

    if events.is_empty() {
        println!("No events recorded at {}", config.events_path.display());
        return Ok(());
    }
    for event in &events {
        println!(
            "[{}] {} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event.kind(),
            event.event.to_json_line()
        );
    }
    Ok(())
}

fn init_project(project_root: &Path) -> Result<()> {
    let plexus_dir = project_root.join(".plexus");
    std::fs::create_dir_all(&plexus_dir)
        .with_context(|| format!("Failed to create {}", plexus_dir.display()))?;

    let config_path = plexus_dir.join("config.yaml");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }
    std::fs::write(&config_path, DEFAULT_CONFIG_YAML)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Initialized Plexus project at {}", project_root.display());
    println!();
    println!("Created:");
    println!("  .plexus/config.yaml - kernel configuration");
    println!();
    println!("Next steps:");
    println!("  1. Export the API key named by model.api_key_env");
    println!("  2. Run: plexus run \"list files in /tmp\"");

    Ok(())
}
