use std::sync::Arc;

use sshmcp_server::auth::CredentialGate;
use sshmcp_server::coordinator::ExecutionCoordinator;
use sshmcp_server::executor::ssh::SshTransport;
use sshmcp_server::session::SessionRegistry;
use sshmcp_server::state::AppState;
use sshmcp_server::{config, routes};

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "sshmcp-server",
    version,
    about = "MCP server that runs commands on a remote host over SSH"
)]
struct Cli {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Do not test the default SSH target at startup
    #[arg(long, env = "SKIP_CONNECTION_TEST")]
    skip_connection_test: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sshmcp_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut cfg = config::Config::from_env();
    if let Some(host) = cli.host {
        cfg.host = host;
    }
    if let Some(port) = cli.port.filter(|p| *p != 0) {
        cfg.port = port;
    }
    tracing::debug!(config = ?cfg, "loaded configuration");

    let coordinator = Arc::new(ExecutionCoordinator::new(
        cfg.policy(),
        Arc::new(SshTransport::new(cfg.ssh_options())),
        cfg.default_target(),
        cfg.max_parallel,
        SessionRegistry::new(cfg.session_idle_timeout),
    ));
    let state = AppState {
        coordinator: Arc::clone(&coordinator),
        gate: Arc::new(CredentialGate::new(cfg.bearer_token.as_deref())),
    };

    let app = routes::create_router(state).layer(
        // Header capture stays off: requests carry the bearer token.
        TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().include_headers(false)),
    );
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = TcpListener::bind(&addr).await?;
    log_banner(&addr, &cfg, &coordinator);

    if cli.skip_connection_test {
        tracing::info!("startup connection test skipped");
    } else {
        tokio::spawn(connection_test(Arc::clone(&coordinator)));
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn log_banner(addr: &str, cfg: &config::Config, coordinator: &ExecutionCoordinator) {
    let target = coordinator.default_target();
    let policy = coordinator.policy();
    tracing::info!("sshmcp-server v{} listening on http://{addr}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        address = %target.address(),
        user = %target.username,
        key = cfg.ssh_private_key_path.is_some(),
        password = cfg.ssh_password.is_some(),
        "default SSH target"
    );
    if cfg.bearer_token.is_some() {
        tracing::info!("bearer token configured");
    } else {
        tracing::warn!("BEARER_TOKEN is not set; every authenticated request will fail");
    }
    tracing::info!(
        allowed = ?policy.allowed(),
        blocked = ?policy.blocked(),
        timeout = ?cfg.command_timeout,
        max_parallel = cfg.max_parallel,
        "command policy"
    );
}

async fn connection_test(coordinator: Arc<ExecutionCoordinator>) {
    let address = coordinator.default_target().address();
    match coordinator.test_connection().await {
        Ok(()) => tracing::info!(%address, "SSH connection test succeeded"),
        Err(e) => tracing::warn!(%address, "SSH connection test failed: {e}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl_c: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::warn!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
