use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pkg_api::AppState;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::paths::{
    DEFAULT_COMPOSITE_ELASTIC_QUOTA_CONTROLLER, DEFAULT_ELASTIC_QUOTA_CONTROLLER,
    DEFAULT_NODE_REPORT_INTERVAL_SECS, DEFAULT_RESYNC_INTERVAL_SECS, DEFAULT_SERVER_CONFIG,
    DEFAULT_SERVER_DATA_DIR, DEFAULT_SERVER_PORT,
};
use pkg_constants::resources::DEFAULT_GPU_DEVICE_MEMORY_GB;
use pkg_constants::scheduler::DEFAULT_SCHEDULER_INTERVAL_SECS;
use pkg_controllers::{
    CompositeElasticQuotaReconciler, Controller, ElasticQuotaReconciler, SchedulerController,
};
use pkg_gpu::ResourceCalculator;
use pkg_metrics::MetricsRegistry;
use pkg_scheduler::Scheduler;
use pkg_state::StateStore;
use pkg_types::config::{LogFormat, ServerConfigFile, load_config_file, validate_server_settings};

#[derive(Parser, Debug)]
#[command(name = "elastiq-server", about = "GPU-aware elastic quota scheduler")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Memory (GB) of one whole GPU device
    #[arg(long)]
    gpu_memory_gb: Option<i64>,

    /// Log output format
    #[arg(long, value_parser = ["text", "json"])]
    log_format: Option<String>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ServerConfigFile = load_config_file(&cli.config)?;

    // Merge: CLI args > config file > defaults
    let log_format = match cli.log_format.as_deref() {
        Some("json") => LogFormat::Json,
        Some(_) => LogFormat::Text,
        None => file_cfg.log_format.unwrap_or_default(),
    };
    init_tracing(log_format);

    let port = cli.port.or(file_cfg.port).unwrap_or(DEFAULT_SERVER_PORT);
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_SERVER_DATA_DIR.to_string());
    let in_memory = file_cfg.in_memory.unwrap_or(false);
    let gpu_memory_gb = cli
        .gpu_memory_gb
        .or(file_cfg.nvidia_gpu_resource_memory_gb)
        .unwrap_or(DEFAULT_GPU_DEVICE_MEMORY_GB);
    let scheduler_interval_secs = file_cfg
        .scheduler_interval_secs
        .unwrap_or(DEFAULT_SCHEDULER_INTERVAL_SECS);
    let resync_interval_secs = file_cfg
        .resync_interval_secs
        .unwrap_or(DEFAULT_RESYNC_INTERVAL_SECS);
    validate_server_settings(gpu_memory_gb, scheduler_interval_secs, resync_interval_secs)
        .inspect_err(|e| error!("Invalid configuration: {}", e))?;
    let scheduler_interval = Duration::from_secs(scheduler_interval_secs);
    let resync_interval = Duration::from_secs(resync_interval_secs);
    let node_report_interval = file_cfg
        .node_report_interval_secs
        .unwrap_or(DEFAULT_NODE_REPORT_INTERVAL_SECS);
    let eq_controller = file_cfg
        .elastic_quota_controller_name
        .unwrap_or_else(|| DEFAULT_ELASTIC_QUOTA_CONTROLLER.to_string());
    let ceq_controller = file_cfg
        .composite_elastic_quota_controller_name
        .unwrap_or_else(|| DEFAULT_COMPOSITE_ELASTIC_QUOTA_CONTROLLER.to_string());

    info!("Starting elastiq-server");
    info!("  Config:          {}", cli.config);
    info!("  Port:            {}", port);
    if in_memory {
        info!("  Store:           in-memory");
    } else {
        info!("  Data dir:        {}", data_dir);
    }
    info!("  GPU memory:      {}GB", gpu_memory_gb);
    info!("  Scheduler tick:  {}s", scheduler_interval.as_secs());
    info!("  Resync:          {}s", resync_interval.as_secs());
    info!("  Node reports:    {}s", node_report_interval);

    let store = if in_memory {
        StateStore::in_memory()
    } else {
        StateStore::new(&data_dir).await.inspect_err(|e| {
            error!("Failed to open state store at {}: {}", data_dir, e);
        })?
    };

    let calculator = ResourceCalculator::new(gpu_memory_gb);
    let metrics = Arc::new(MetricsRegistry::elastiq());
    let scheduler = Arc::new(Scheduler::new(calculator));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tasks = vec![
        Controller::new(
            store.clone(),
            ElasticQuotaReconciler::new(&eq_controller, store.clone(), calculator, metrics.clone()),
            metrics.clone(),
            resync_interval,
        )
        .start(shutdown_rx.clone()),
        Controller::new(
            store.clone(),
            CompositeElasticQuotaReconciler::new(
                &ceq_controller,
                store.clone(),
                calculator,
                metrics.clone(),
            ),
            metrics.clone(),
            resync_interval,
        )
        .start(shutdown_rx.clone()),
        SchedulerController::new(store.clone(), scheduler, metrics.clone(), scheduler_interval)
            .start(shutdown_rx.clone()),
    ];

    let mut api = tokio::spawn(start_server(
        ServerConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
        },
        AppState {
            store: store.clone(),
            metrics,
        },
        shutdown_rx,
    ));

    // the API task only finishes early if it failed to start
    let early = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received");
            None
        }
        result = &mut api => Some(result),
    };
    let _ = shutdown_tx.send(true);
    let api_result = match early {
        Some(result) => result,
        None => api.await,
    };
    for task in tasks {
        if let Err(e) = task.await {
            error!("Controller task failed: {}", e);
        }
    }
    store.close().await?;

    api_result??;
    info!("elastiq-server stopped");
    Ok(())
}
