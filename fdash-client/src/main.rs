//! fdash - fund document dashboard client
//!
//! Command-line front end for the session client and the processing
//! orchestrator: log in, upload a fund document, follow its processing and
//! print the computed metrics and compliance results.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fdash_client::api::HttpJobApi;
use fdash_client::session::{SessionClient, SqliteSessionStore, UploadFile};
use fdash_client::{ClientError, Orchestrator, OrchestratorSettings, WorkItem};
use fdash_common::api::ExportFormat;
use fdash_common::config::{ClientConfig, ConfigResolver};
use fdash_common::events::{DashEvent, EventBus};
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for fdash
#[derive(Parser, Debug)]
#[command(name = "fdash")]
#[command(about = "Fund document processing dashboard client")]
#[command(version)]
struct Args {
    /// Service base URL (e.g. http://localhost:8000/api/v1)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Folder holding the local session database
    #[arg(long, global = true)]
    data_folder: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "FDASH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticate and store the session
    Login {
        #[arg(long, env = "FDASH_EMAIL")]
        email: String,

        /// Read from stdin when omitted
        #[arg(long, env = "FDASH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// End the stored session
    Logout,

    /// Show the current session
    Whoami,

    /// Upload a document, process it and wait for the results
    Process {
        file: PathBuf,

        #[arg(long, default_value = "private_equity")]
        fund_type: String,

        /// Return right after processing has started
        #[arg(long)]
        no_wait: bool,
    },

    /// Follow an existing work item until it settles
    Watch { id: String },

    /// Download an export of a work item
    Export {
        id: String,

        #[arg(long, default_value = "pdf")]
        format: String,

        /// Output file (defaults to <id>.<format>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Fallback warnings are held until the subscriber exists
    let resolution = ConfigResolver::new()
        .with_api_url(args.api_url.clone())
        .with_data_folder(args.data_folder.clone())
        .with_config_file(args.config.clone())
        .resolution();
    let config = &resolution.config;

    init_tracing(config)?;
    resolution.log_warnings();

    info!(version = %fdash_client::version_string(), "Starting fdash");
    debug!(
        api_base_url = %config.api_base_url,
        data_folder = %config.data_folder.display(),
        "Configuration resolved"
    );

    let event_bus = EventBus::new(256);
    spawn_event_printer(&event_bus);

    let session = open_session(config, event_bus.clone()).await?;

    match args.command {
        Command::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt_password()?,
            };
            let established = match session.authenticate(&email, &password).await {
                Ok(established) => established,
                Err(ClientError::InvalidCredentials) => bail!("Invalid email or password"),
                Err(e) => return Err(e).context("Login failed"),
            };
            println!("Logged in (tenant {})", established.tenant_id);
        }

        Command::Logout => {
            session.end_session().await.context("Failed to clear session")?;
            println!("Logged out");
        }

        Command::Whoami => match session.current_session().await {
            Some(current) => {
                let email = current
                    .profile
                    .as_ref()
                    .map(|p| p.email.as_str())
                    .unwrap_or("<unknown>");
                println!("{} (tenant {})", email, current.tenant_id);
            }
            None => println!("Not logged in"),
        },

        Command::Process {
            file,
            fund_type,
            no_wait,
        } => {
            let orchestrator = orchestrator(config, &session, event_bus.clone());
            let upload = UploadFile::from_path(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let item = orchestrator
                .submit(upload, &fund_type)
                .await
                .map_err(login_hint)
                .context("Submission failed")?;
            println!("Submitted {} as work item {}", file.display(), item.id);

            if !no_wait {
                let settled = settle(&orchestrator, &item.id).await;
                print_item(settled.as_ref())?;
            }
        }

        Command::Watch { id } => {
            let orchestrator = orchestrator(config, &session, event_bus.clone());
            orchestrator
                .select(&id)
                .await
                .map_err(login_hint)
                .with_context(|| format!("Failed to load work item {}", id))?;

            let settled = settle(&orchestrator, &id).await;
            print_item(settled.as_ref())?;
        }

        Command::Export { id, format, output } => {
            let format: ExportFormat = format.parse()?;
            let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.{}", id, format)));

            let orchestrator = orchestrator(config, &session, event_bus.clone());
            let bytes = orchestrator
                .export(&id, format)
                .await
                .map_err(login_hint)
                .with_context(|| format!("Failed to export work item {}", id))?;

            write_output(&output, &bytes)?;
            println!("Wrote {} bytes to {}", bytes.len(), output.display());
        }
    }

    Ok(())
}

/// Initialize tracing: `RUST_LOG` wins, then `logging.level` from config
fn init_tracing(config: &ClientConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

/// Open the session database and restore any persisted session
async fn open_session(config: &ClientConfig, event_bus: EventBus) -> Result<Arc<SessionClient>> {
    let db = fdash_common::db::init_database(&config.database_path())
        .await
        .context("Failed to open session database")?;

    let store = Arc::new(SqliteSessionStore::new(db));
    let session = SessionClient::from_config(config, store, event_bus)
        .context("Failed to build HTTP client")?;
    session
        .restore()
        .await
        .context("Failed to restore session")?;

    Ok(Arc::new(session))
}

fn orchestrator(
    config: &ClientConfig,
    session: &Arc<SessionClient>,
    event_bus: EventBus,
) -> Orchestrator<HttpJobApi> {
    Orchestrator::new(
        HttpJobApi::new(Arc::clone(session)),
        OrchestratorSettings::from(config),
        event_bus,
    )
}

/// Wait for the item to settle; Ctrl+C stops polling instead
async fn settle(orchestrator: &Orchestrator<HttpJobApi>, id: &str) -> Option<WorkItem> {
    tokio::select! {
        settled = orchestrator.wait_until_settled(id) => settled,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping");
            orchestrator.teardown();
            orchestrator.snapshot(id)
        }
    }
}

/// Print workflow events to stderr while a command runs
fn spawn_event_printer(event_bus: &EventBus) {
    let mut events = event_bus.subscribe();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DashEvent::WorkItemStateChanged {
                    work_item_id,
                    new_state,
                    lifecycle_status,
                    ..
                } => {
                    let lifecycle = lifecycle_status.map(|s| s.to_string()).unwrap_or_default();
                    eprintln!("[{}] {} ({})", work_item_id, new_state, lifecycle);
                }
                DashEvent::WorkItemProgress {
                    work_item_id,
                    progress,
                    stage,
                    ..
                } => {
                    let percent = progress.map(|p| format!("{:.0}%", p)).unwrap_or_default();
                    eprintln!(
                        "[{}] {} {}",
                        work_item_id,
                        percent,
                        stage.unwrap_or_default()
                    );
                }
                DashEvent::PollAbandoned {
                    work_item_id,
                    reason,
                    ..
                } => {
                    eprintln!("[{}] stopped: {}", work_item_id, reason);
                }
                DashEvent::SessionExpired { .. } => {
                    eprintln!("Session expired. Run `fdash login` to sign in again.");
                }
                _ => {}
            }
        }
    });
}

fn login_hint(err: ClientError) -> anyhow::Error {
    match err {
        ClientError::Unauthenticated => {
            anyhow::anyhow!("Not logged in. Run `fdash login` first.")
        }
        other => other.into(),
    }
}

fn prompt_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_item(item: Option<&WorkItem>) -> Result<()> {
    let Some(item) = item else {
        bail!("Work item not found");
    };

    println!("{}", serde_json::to_string_pretty(item)?);
    if let Some(reason) = &item.result_error {
        eprintln!("Results unavailable: {}", reason);
    }
    if !item.state.is_terminal() {
        eprintln!(
            "Polling stopped before {} finished. Run `fdash watch {}` to resume.",
            item.id, item.id
        );
    }
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}
