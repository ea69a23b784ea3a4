//! Marginalia
//!
//! HTTP server and command-line tools for editor content processing.

use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use marginalia_kernel::content::FilterPipeline;
use marginalia_kernel::content::diff::{HtmlDiff, join_snippets};
use marginalia_kernel::content_export::{MemoryContentStorage, import_content};
use marginalia_kernel::services::collaboration_token::{
    CollaborationRole, CollaborationTokenService, CollaborationUser,
};
use marginalia_kernel::{AppState, Config, build_router};

/// Editor content processing service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,

    /// Run HTML through a text format.
    Filter {
        /// Text format: plain_text, basic_html or full_html.
        #[arg(long, default_value = "full_html")]
        format: String,

        /// Input file; reads stdin when omitted.
        file: Option<PathBuf>,
    },

    /// Diff two HTML files.
    Diff {
        old: PathBuf,
        new: PathBuf,

        /// Words of context around each change.
        #[arg(long)]
        context: Option<usize>,
    },

    /// Issue a collaboration token.
    Token {
        /// User identifier (`sub` claim).
        #[arg(long)]
        user: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        /// reader, commentator or writer.
        #[arg(long)]
        role: Option<String>,
    },

    /// Content export tools.
    Content {
        #[command(subcommand)]
        command: ContentCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ContentCommand {
    /// Check an export directory without importing it.
    Validate { dir: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing
    init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Filter { format, file } => filter(&format, file.as_deref()),
        Command::Diff { old, new, context } => diff(&config, &old, &new, context),
        Command::Token {
            user,
            name,
            email,
            role,
        } => token(&config, user, name, email, role.as_deref()),
        Command::Content {
            command: ContentCommand::Validate { dir },
        } => validate_content(&dir).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting Marginalia");
    info!(?config, "Configuration loaded");

    let state = AppState::new(&config).context("failed to initialize application state")?;

    // Periodic cron
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cron_handle = (config.cron_interval_secs > 0).then(|| {
        tokio::spawn(
            Arc::clone(state.cron())
                .run_periodic(Duration::from_secs(config.cron_interval_secs), shutdown_rx),
        )
    });

    let app = build_router(state, &config);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = cron_handle {
        let _ = handle.await;
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("failed to read stdin")?;
            Ok(input)
        }
    }
}

fn filter(format: &str, file: Option<&Path>) -> Result<()> {
    let input = read_input(file)?;
    print!("{}", FilterPipeline::for_format(format).process(&input));
    Ok(())
}

fn diff(config: &Config, old: &Path, new: &Path, context: Option<usize>) -> Result<()> {
    let old = read_input(Some(old))?;
    let new = read_input(Some(new))?;

    let result = HtmlDiff::default().diff(&old, &new);
    if !result.has_changes() {
        info!("documents are identical");
        return Ok(());
    }

    println!("{}", result.html());
    let snippets = result.context_snippets(context.unwrap_or(config.diff_context_words));
    let joined = join_snippets(&snippets, &config.diff_snippet_separator);
    if !joined.is_empty() {
        println!();
        println!("{joined}");
    }
    Ok(())
}

fn token(
    config: &Config,
    user: String,
    name: Option<String>,
    email: Option<String>,
    role: Option<&str>,
) -> Result<()> {
    let service = CollaborationTokenService::new(
        config.ckeditor_environment_id.as_deref().unwrap_or_default(),
        config.ckeditor_access_key.as_deref().unwrap_or_default(),
        config.collaboration_default_role,
    )?;
    let role = role.map(str::parse::<CollaborationRole>).transpose()?;

    let mut user = CollaborationUser::new(user);
    if let Some(name) = name {
        user = user.with_name(name);
    }
    if let Some(email) = email {
        user = user.with_email(email);
    }

    println!("{}", service.issue(&user, role)?);
    Ok(())
}

async fn validate_content(dir: &Path) -> Result<()> {
    let report = import_content(&MemoryContentStorage::new(), dir, true).await?;

    for (entity_type, count) in &report.counts {
        println!("{entity_type}: {count}");
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }

    if !report.warnings.is_empty() {
        anyhow::bail!(
            "{} warning(s) in {} entities",
            report.warnings.len(),
            report.total()
        );
    }
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    // Logs go to stderr so CLI output on stdout stays clean
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
