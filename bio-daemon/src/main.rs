//! Biometry Daemon (biometryd)
//!
//! Exposes the configured biometric device to confined applications over a
//! Unix domain socket.
//!
//! # Security Model
//! - **Socket**: Unix domain socket, symlink-checked before binding
//! - **Authentication**: Kernel peer credentials plus the confinement label
//!   of the calling process, resolved per call
//! - **Authorization**: Callers act only for their own user unless root
//! - **Limits**: Connection limits, message size limits, rate limiting
//! - **Signals**: Graceful shutdown on SIGINT and SIGTERM
//!
//! # Hardening Measures
//! - Environment sanitization (clear dangerous env vars)
//! - Restrictive umask (0077)
//! - No core dumps

use anyhow::{Context, Result};
use bio_core::constants::{env, paths, runtime::DEFAULT_WORKERS};
use bio_core::credentials::testing_override_from_env;
use bio_core::{
    serve_service, CredentialsResolver, DaemonConfig, DefaultService, DeviceRegistrar,
    DeviceRegistry, ObjectTable, PeerIdentityBroker, Runtime, Strand,
};
use bio_daemon::{plugin_dirs, run_server, ServerConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "biometryd", version, about = "Biometric device daemon")]
struct Cli {
    /// Daemon configuration file
    #[arg(short, long, default_value = paths::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Socket path to listen on
    #[arg(short, long, env = env::SOCKET, default_value = paths::DEFAULT_SOCKET)]
    socket: PathBuf,

    /// Worker threads serving device operations
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Plugin directory, may be repeated
    #[arg(long = "plugin-dir")]
    plugin_dirs: Vec<PathBuf>,

    /// Accept unconfined callers
    #[arg(long)]
    testing: bool,
}

// ============================================================================
// Security Hardening
// ============================================================================

/// Remove variables that alter dynamic linking or name resolution
fn sanitize_environment() {
    const DANGEROUS_VARS: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "LD_DEBUG",
        "LD_PROFILE",
        "MALLOC_CHECK_",
        "HOSTALIASES",
        "LOCALDOMAIN",
        "RES_OPTIONS",
        "IFS",
    ];

    for var in DANGEROUS_VARS {
        std::env::remove_var(var);
    }
    std::env::set_var("PATH", "/usr/sbin:/usr/bin:/sbin:/bin");
}

fn disable_core_dumps() {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: setrlimit is called with a known RLIMIT_* constant and a fully initialized struct.
    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) } != 0 {
        warn!("Failed to disable core dumps");
    }
}

fn set_secure_umask() {
    // SAFETY: umask only sets the file creation mask for the process.
    unsafe { libc::umask(0o077) };
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        // stderr ends up in the journal when running as a service
        eprintln!("PANIC at {}: {}", location, message);
    }));
}

// ============================================================================
// Logging
// ============================================================================

/// Log to the journal when it is reachable, otherwise to stdout.
/// Returns where the logs go.
fn init_logging() -> &'static str {
    let log_level = std::env::var(env::LOG).unwrap_or_else(|_| "info".to_string());
    let filter = || {
        tracing_subscriber::EnvFilter::try_new(&log_level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    if std::path::Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(filter())
                    .init();
                return "systemd journal";
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter())
        .init();
    "stdout"
}

// ============================================================================
// Signals
// ============================================================================

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to wait for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => info!("SIGNAL: Received SIGINT"),
        _ = terminate => info!("SIGNAL: Received SIGTERM"),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    install_panic_hook();
    let cli = Cli::parse();

    sanitize_environment();
    set_secure_umask();
    disable_core_dumps();

    let log_target = init_logging();
    info!("STARTUP: biometryd {} starting", VERSION);
    info!("STARTUP: Logging to {}", log_target);
    debug!("STARTUP: {:?}", cli);

    let config = DaemonConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let runtime = Runtime::with_workers(cli.workers).context("Invalid worker count")?;
    runtime.start().context("Failed to start worker pool")?;

    let registry = Arc::new(DeviceRegistry::new());
    let registrar = DeviceRegistrar::new(registry.clone(), &plugin_dirs(&cli.plugin_dirs));

    let allow_unconfined = cli.testing || testing_override_from_env();
    if allow_unconfined {
        warn!("STARTUP: Testing mode, unconfined callers are accepted");
    }
    let resolver = CredentialsResolver::new(Arc::new(PeerIdentityBroker::new()))
        .allow_unconfined(allow_unconfined);

    let strand = Strand::new(&runtime.handle()?);
    let service = DefaultService::new(registry, config.default_device.clone(), strand);

    let objects = ObjectTable::new();
    serve_service(objects.clone(), Arc::new(resolver), Arc::new(service))
        .context("Failed to export service")?;

    info!("STARTUP: Socket path: {}", cli.socket.display());
    info!("STARTUP: Default device: {}", config.default_device.id);
    info!("STARTUP: PID: {}", std::process::id());

    let server_config = ServerConfig::new(&cli.socket).with_tasks(runtime.tracker()?);
    let result = runtime.block_on(run_server(&server_config, objects.clone(), shutdown_signal()))?;

    // Withdrawn operations cancel themselves on the pool, so this runs before it stops
    runtime.block_on(async {
        for path in objects.paths() {
            objects.unregister(&path);
        }
    })?;
    runtime.stop();
    drop(registrar);
    info!("SHUTDOWN: Daemon terminated");

    result.context("Server error")
}
