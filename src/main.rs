use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use clusterd::app::export_no_proxy;
use clusterd::{ClusterConfig, ManifestAuthority, OsSignals, Role, RunOrchestrator};

const CA_COMMON_NAME: &str = "clusterd-ca";

#[derive(Parser, Debug)]
#[command(name = "clusterd")]
#[command(about = "Supervisor for a lightweight cluster runtime")]
#[command(version)]
#[command(long_about = "Runs the control-plane and node services of a small cluster in one \
process, waits for all of them to become ready, notifies systemd, and shuts them down \
gracefully on SIGINT or SIGTERM.")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging (most verbose)
    #[arg(short, long, global = true, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, global = true, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, global = true, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Write logs to a file instead of stdout
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cluster services for the selected roles
    Run {
        #[arg(short, long, default_value = "/etc/clusterd/config.toml", help = "Path to TOML configuration file")]
        config: PathBuf,

        #[arg(long, value_name = "DIR", help = "Directory for runtime data")]
        data_dir: Option<PathBuf>,

        #[arg(long, value_name = "DIR", help = "Directory for audit logs")]
        audit_log_dir: Option<PathBuf>,

        #[arg(long, value_delimiter = ',', help = "Roles to run: controlplane, node")]
        roles: Option<Vec<Role>>,
    },

    /// Print the default configuration in TOML format
    PrintConfig,

    /// Validate a configuration file and exit
    ValidateConfig {
        #[arg(short, long, default_value = "/etc/clusterd/config.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::PrintConfig = args.command {
        let default_config = toml::to_string_pretty(&ClusterConfig::default())
            .context("Failed to serialize default configuration")?;
        println!("# clusterd configuration file");
        println!();
        println!("{}", default_config);
        return Ok(());
    }

    let _guard = init_logging(&args)?;

    match args.command {
        Command::Run {
            config,
            data_dir,
            audit_log_dir,
            roles,
        } => {
            let mut config = load_config(&config)?;
            config.apply_overrides(data_dir, audit_log_dir, roles);
            config.validate().map_err(|e| {
                error!("Configuration validation failed: {}", e);
                e
            })?;

            // The environment is only written while this is the sole thread.
            export_no_proxy(&config);

            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(run(config))
        }
        Command::ValidateConfig { config } => {
            let config = load_config(&config)?;
            match config.validate() {
                Ok(()) => {
                    info!("Configuration validation successful");
                    println!("✓ Configuration is valid");
                    Ok(())
                }
                Err(e) => {
                    error!("Configuration validation failed: {}", e);
                    eprintln!("✗ Configuration validation failed: {}", e);
                    Err(e.into())
                }
            }
        }
        Command::PrintConfig => Ok(()),
    }
}

fn load_config(path: &Path) -> Result<ClusterConfig> {
    match ClusterConfig::load_from_file(path) {
        Ok(config) => {
            info!("Configuration loaded from: {}", path.display());
            Ok(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e.into())
        }
    }
}

async fn run(config: ClusterConfig) -> Result<()> {
    info!("Starting clusterd v{}", env!("CARGO_PKG_VERSION"));

    // Handlers go in first so an interrupt during startup is not lost
    let mut signals = OsSignals::register().context("Failed to register signal handlers")?;

    let mut orchestrator = RunOrchestrator::new(config);

    orchestrator
        .prepare(&ManifestAuthority::new(CA_COMMON_NAME))
        .await
        .map_err(|e| {
            error!("Failed to prepare host: {}", e);
            e
        })?;

    let registered = orchestrator.register_configured_services().map_err(|e| {
        error!("Failed to register services: {}", e);
        e
    })?;
    info!("Registered {} services", registered);

    let state = orchestrator.run(&mut signals).await.map_err(|e| {
        error!("clusterd failed: {}", e);
        e
    })?;

    info!("clusterd exited ({})", state);
    Ok(())
}

/// Log level selected by the flags. `run` reports its phase transitions at info.
fn default_log_level(args: &Args) -> &'static str {
    if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else if matches!(args.command, Command::Run { .. }) {
        "info"
    } else {
        "warn"
    }
}

fn init_logging(args: &Args) -> Result<WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = default_log_level(args);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("clusterd={}", log_level)));

    let (writer, guard) = match &args.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .context("--log-file must name a file")?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            tracing_appender::non_blocking(appender)
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };
    let ansi = args.log_file.is_none();

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi)
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_logs_phase_transitions_by_default() {
        let args = Args::parse_from(["clusterd", "run"]);
        assert_eq!(default_log_level(&args), "info");

        let args = Args::parse_from(["clusterd", "run", "--quiet"]);
        assert_eq!(default_log_level(&args), "error");

        let args = Args::parse_from(["clusterd", "validate-config"]);
        assert_eq!(default_log_level(&args), "warn");

        let args = Args::parse_from(["clusterd", "--debug", "validate-config"]);
        assert_eq!(default_log_level(&args), "debug");
    }

    #[test]
    fn test_roles_flag_accepts_a_list() {
        let args = Args::parse_from(["clusterd", "run", "--roles", "controlplane,node"]);
        match args.command {
            Command::Run { roles, .. } => {
                assert_eq!(roles, Some(vec![Role::Controlplane, Role::Node]))
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
