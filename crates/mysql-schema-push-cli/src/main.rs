//! mysql-schema-push CLI - declarative schema push for MySQL and MariaDB.

use clap::{Args, Parser, Subcommand};
use mysql_schema_push::{Lifecycle, OptionSet, Orchestrator, PushError, RunOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mysql-schema-push")]
#[command(about = "Declarative schema push for MySQL and MariaDB")]
#[command(version)]
struct Cli {
    /// Output JSON summary to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the directory tree's definitions to every configured instance
    Push {
        #[command(flatten)]
        args: PushArgs,

        /// Print DDL without executing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the DDL that push would run, without executing it
    Diff {
        #[command(flatten)]
        args: PushArgs,
    },
}

#[derive(Args)]
struct PushArgs {
    /// Environment section of .push.yaml files to apply
    #[arg(default_value = "production")]
    environment: String,

    /// Root directory of schema definitions
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Override host (comma-separated, host:port allowed)
    #[arg(long)]
    host: Option<String>,

    /// Override port
    #[arg(long)]
    port: Option<u16>,

    /// Override user
    #[arg(short, long)]
    user: Option<String>,

    /// Override password
    #[arg(long, env = "MYSQL_PWD", hide_env_values = true)]
    password: Option<String>,

    /// Override schema name (comma-separated, or * for all)
    #[arg(long)]
    schema: Option<String>,

    /// Session variables for every connection, e.g. "innodb_lock_wait_timeout=5"
    #[arg(long)]
    connect_options: Option<String>,

    /// Permit destructive DDL
    #[arg(long)]
    allow_unsafe: bool,

    /// Permit destructive DDL on tables smaller than this size (e.g. 10M)
    #[arg(long)]
    safe_below_size: Option<String>,

    /// External command for ALTER TABLE, with {VAR} placeholders
    #[arg(long)]
    alter_wrapper: Option<String>,

    /// Only use the ALTER wrapper for tables at least this size
    #[arg(long)]
    alter_wrapper_min_size: Option<String>,

    /// External command for all DDL, with {VAR} placeholders
    #[arg(long)]
    ddl_wrapper: Option<String>,

    /// ALGORITHM clause for ALTER TABLE: inplace, copy, instant, nocopy, default
    #[arg(long)]
    alter_algorithm: Option<String>,

    /// LOCK clause for ALTER TABLE: none, shared, exclusive, default
    #[arg(long)]
    alter_lock: Option<String>,

    /// Also reconcile index order and foreign key names
    #[arg(long)]
    exact_match: bool,

    /// Ignore column order differences
    #[arg(long)]
    lax_column_order: bool,

    /// Partitioning handling: modify, keep, remove
    #[arg(long)]
    partitioning: Option<String>,

    /// Enable foreign key checks for ALTERs adding foreign keys
    #[arg(long)]
    foreign_key_checks: bool,

    /// Skip workspace verification of ALTERs
    #[arg(long)]
    skip_verify: bool,

    /// Workspace kind: temp-schema or docker
    #[arg(long)]
    workspace: Option<String>,

    /// Name of the workspace schema
    #[arg(long)]
    temp_schema: Option<String>,

    /// Keep the workspace schema between uses, dropping only its tables
    #[arg(long)]
    reuse_temp_schema: bool,

    /// Concurrent CREATE TABLEs in a workspace
    #[arg(long)]
    temp_schema_threads: Option<usize>,

    /// Maximum wait for the workspace lock (e.g. 30s)
    #[arg(long)]
    lock_wait_timeout: Option<String>,

    /// Docker workspace containers at exit: none, stop, destroy
    #[arg(long)]
    docker_cleanup: Option<String>,

    /// Database flavor for docker workspaces, e.g. mysql:8.0
    #[arg(long)]
    flavor: Option<String>,

    /// Only use the first host of each directory
    #[arg(long)]
    first_only: bool,

    /// Regular expression of table names to ignore
    #[arg(long)]
    ignore_table: Option<String>,

    /// Number of instances to push to concurrently
    #[arg(long)]
    concurrent_instances: Option<usize>,

    /// Only print the names of instances with differences
    #[arg(long)]
    brief: bool,

    /// Maximum subdirectory depth
    #[arg(long)]
    max_depth: Option<usize>,
}

impl PushArgs {
    /// Command-line values as option overrides.
    fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();
        let strings = [
            ("host", &self.host),
            ("user", &self.user),
            ("password", &self.password),
            ("schema", &self.schema),
            ("connect-options", &self.connect_options),
            ("safe-below-size", &self.safe_below_size),
            ("alter-wrapper", &self.alter_wrapper),
            ("alter-wrapper-min-size", &self.alter_wrapper_min_size),
            ("ddl-wrapper", &self.ddl_wrapper),
            ("alter-algorithm", &self.alter_algorithm),
            ("alter-lock", &self.alter_lock),
            ("partitioning", &self.partitioning),
            ("workspace", &self.workspace),
            ("temp-schema", &self.temp_schema),
            ("lock-wait-timeout", &self.lock_wait_timeout),
            ("docker-cleanup", &self.docker_cleanup),
            ("flavor", &self.flavor),
            ("ignore-table", &self.ignore_table),
        ];
        for (name, value) in strings {
            if let Some(v) = value {
                overrides.push((name, v.clone()));
            }
        }
        let flags = [
            ("allow-unsafe", self.allow_unsafe),
            ("exact-match", self.exact_match),
            ("lax-column-order", self.lax_column_order),
            ("foreign-key-checks", self.foreign_key_checks),
            ("reuse-temp-schema", self.reuse_temp_schema),
            ("first-only", self.first_only),
        ];
        for (name, set) in flags {
            if set {
                overrides.push((name, "true".to_string()));
            }
        }
        if self.skip_verify {
            overrides.push(("verify", "false".to_string()));
        }
        if let Some(port) = self.port {
            overrides.push(("port", port.to_string()));
        }
        if let Some(threads) = self.temp_schema_threads {
            overrides.push(("temp-schema-threads", threads.to_string()));
        }
        overrides
    }

    fn run_options(&self, dry_run: bool) -> RunOptions {
        RunOptions {
            environment: self.environment.clone(),
            concurrent_instances: self.concurrent_instances,
            dry_run,
            brief: self.brief,
            max_depth: self.max_depth,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, PushError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(PushError::Config)?;

    let (args, dry_run) = match &cli.command {
        Commands::Push { args, dry_run } => (args, *dry_run),
        Commands::Diff { args } => (args, true),
    };
    let options = OptionSet::new().with_overrides(args.overrides())?;
    let run_options = args.run_options(dry_run);

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler();

    let lifecycle = Arc::new(Lifecycle::new());
    let orchestrator = Orchestrator::new(&args.dir, options, run_options, lifecycle.clone());
    let outcome = orchestrator.run(cancel_token).await;

    // Containers and pools are torn down once, whatever the outcome.
    lifecycle.shutdown().await;
    orchestrator.registry().disconnect_all().await;

    let summary = outcome?;
    if cli.output_json {
        println!("{}", summary.to_json()?);
    } else {
        info!(
            "{} targets in {:.2}s: {}",
            summary.targets_total,
            summary.duration_seconds,
            if summary.result.differences {
                "differences found"
            } else {
                "no differences"
            }
        );
        if summary.result.skip_count > 0 || summary.result.unsupported_count > 0 {
            warn!(
                "Skipped {} and left {} unsupported",
                summary.result.skip_count, summary.result.unsupported_count
            );
        }
    }

    Ok(summary.result.exit_code(dry_run))
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("invalid verbosity \"{}\"", other)),
    };

    // Logs go to stderr; stdout carries DDL and JSON output.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("invalid log format \"{}\"", other)),
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!(
                        "\nReceived {}. Finishing in-flight statements before exiting...",
                        name
                    );
                    token.cancel();
                });
            }
            Err(e) => warn!("Unable to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight statements before exiting...");
            token.cancel();
        }
    });

    cancel_token
}
