use std::path::PathBuf;

use clap::Parser;
use libertycall_config::GatewaySettings;
use libertycall_gateway::state::AppState;
use libertycall_gateway::{build_router, run_esl_event_watcher, session_log};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "libertycall-gateway", about = "Real-time AI telephony gateway")]
struct Args {
    /// Path to a JSON settings file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = GatewaySettings::load(args.config.as_deref())?;
    info!(
        rtp_port = settings.network.rtp_port,
        ws_port = settings.network.ws_port,
        init_port = settings.network.init_port,
        "gateway starting"
    );

    let state = AppState::new(settings);

    // session retention janitor, daily at 03:17
    let scheduler = JobScheduler::new().await?;
    {
        let sessions_root = state.settings.paths.sessions_root.clone();
        let retention_days = state.settings.timers.session_retention_days;
        scheduler
            .add(Job::new_async("0 17 3 * * *", move |_id, _lock| {
                let sessions_root = sessions_root.clone();
                Box::pin(async move {
                    session_log::cleanup_stale_sessions(&sessions_root, retention_days);
                })
            })?)
            .await?;
    }
    scheduler.start().await?;

    {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = libertycall_gateway::ingress::rtp::run_rtp_receiver(state).await {
                error!(error = %e, "rtp receiver exited");
            }
        });
    }
    {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = libertycall_gateway::ingress::init::run_control_listener(state).await {
                error!(error = %e, "control listener exited");
            }
        });
    }
    {
        let state = state.clone();
        tokio::spawn(run_esl_event_watcher(state));
    }

    let ws_addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.settings.network.ws_port));
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(ws_addr).await?;
    info!(%ws_addr, "websocket server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
