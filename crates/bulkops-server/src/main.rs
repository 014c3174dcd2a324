use std::{sync::Arc, time::Duration};

use bulkops_jobs::{
    ActionRegistry, EngineConfig, FileJobStore, HttpSessionExecutor, JobEngine, JobStore,
    MemoryJobStore, SessionAction,
};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bulkops", about = "Background bulk-operation job server")]
struct Cli {
    #[arg(long, env = "BULKOPS_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "BULKOPS_PORT", default_value = "8080")]
    port: u16,

    #[arg(long, env = "BULKOPS_DATA_DIR", default_value = "./data/jobs")]
    data_dir: String,

    /// Keep jobs in memory only; nothing survives a restart.
    #[arg(long, env = "BULKOPS_MEMORY_STORE", default_value_t = false)]
    memory_store: bool,

    #[arg(long, env = "BULKOPS_BATCH_SIZE", default_value_t = 5)]
    batch_size: usize,

    #[arg(long, env = "BULKOPS_ITEM_TIMEOUT_MS", default_value_t = 10_000)]
    item_timeout_ms: u64,

    #[arg(long, env = "BULKOPS_BATCH_PAUSE_MS", default_value_t = 100)]
    batch_pause_ms: u64,

    #[arg(long, env = "BULKOPS_LEASE_TTL_SECS", default_value_t = 30)]
    lease_ttl_secs: u64,

    #[arg(long, env = "BULKOPS_MAX_ITEMS", default_value_t = 1_000)]
    max_items: usize,

    #[arg(long, env = "BULKOPS_RECOVERY_INTERVAL_SECS", default_value_t = 60)]
    recovery_interval_secs: u64,

    #[arg(long, env = "BULKOPS_WORKER_ID")]
    worker_id: Option<String>,

    #[arg(
        long,
        env = "BULKOPS_MESSAGING_API_URL",
        default_value = "http://127.0.0.1:3000/api/v1"
    )]
    messaging_api_url: String,

    #[arg(long, env = "BULKOPS_MESSAGING_API_TOKEN", hide_env_values = true)]
    messaging_api_token: Option<String>,

    #[arg(long, env = "BULKOPS_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        let lease_ttl = Duration::from_secs(self.lease_ttl_secs);
        EngineConfig {
            batch_size: self.batch_size,
            item_timeout: Duration::from_millis(self.item_timeout_ms),
            batch_pause: Duration::from_millis(self.batch_pause_ms),
            lease_ttl,
            lease_renew_interval: lease_ttl / 3,
            max_items: self.max_items,
            // empty ids are replaced with a generated one
            worker_id: self.worker_id.clone().unwrap_or_default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::from_default_env().add_directive("bulkops=info".parse()?);
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let store: Arc<dyn JobStore> = if cli.memory_store {
        warn!("using in-memory job store; jobs are lost on restart");
        Arc::new(MemoryJobStore::new())
    } else {
        let store = FileJobStore::new(&cli.data_dir).await?;
        info!(root = %store.root().display(), "file job store ready");
        Arc::new(store)
    };

    let client = reqwest::Client::new();
    let mut registry = ActionRegistry::new();
    for action in SessionAction::ALL {
        registry.register(
            action.kind(),
            Arc::new(HttpSessionExecutor::new(
                client.clone(),
                cli.messaging_api_url.clone(),
                cli.messaging_api_token.clone(),
                action,
            )),
        );
    }
    if cli.messaging_api_token.is_none() {
        warn!("messaging api token is not set; session jobs will fail their preflight");
    }

    let engine = Arc::new(JobEngine::new(store, registry, cli.engine_config()));
    info!(
        worker_id = %engine.config().worker_id,
        kinds = ?engine.kinds(),
        batch_size = engine.config().batch_size,
        "job engine ready"
    );

    let recovery = Arc::clone(&engine);
    let recovery_interval = Duration::from_secs(cli.recovery_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(recovery_interval);
        loop {
            interval.tick().await;
            match recovery.recover_stale_jobs().await {
                Ok(0) => {}
                Ok(recovered) => info!(recovered, "stale jobs recovered"),
                Err(err) => warn!(error = %err, "stale job recovery failed"),
            }
        }
    });
    info!("stale job recovery enabled");

    let app = bulkops_api::router::api_router(engine).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("bulkops server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
