use anyhow::Context;
use bambu_exporter::config::load_config;
use bambu_exporter::http::{build_router, AppState};
use bambu_exporter::mqtt::MqttTransport;
use bambu_exporter::{HealthTracker, ScrapeCollector, ScrapeSettings, SnapshotStore};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bambu_exporter=info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cfg = load_config().await.context("invalid exporter configuration")?;
    let addr = cfg.http.socket_addr()?;
    info!(
        broker = %cfg.mqtt.broker(),
        topic = %cfg.mqtt.topic,
        tls = cfg.mqtt.tls,
        "starting exporter"
    );

    let transport = MqttTransport::new(cfg.mqtt.clone(), cfg.scrape.connect_timeout());
    let collector = ScrapeCollector::new(
        transport,
        SnapshotStore::new(),
        HealthTracker::new(),
        ScrapeSettings::from(&cfg),
    );
    let app = build_router(AppState::new(collector, cfg.scrape.scrape_timeout()));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    info!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler, run until killed
        std::future::pending::<()>().await;
    }
}
