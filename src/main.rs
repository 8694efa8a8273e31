use futures::future::join_all;
use image_swapper::config::settings::Settings;
use image_swapper::copy::{CopyCoordinator, CopyRunner, SkopeoBackend};
use image_swapper::registry::EcrRegistry;
use image_swapper::secrets::KubePullSecrets;
use image_swapper::webhook::server;
use image_swapper::webhook::swapper::ImageSwapper;
use image_swapper::{settings, signals};
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{Level, info};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Registry, layer::SubscriberExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// Global init logger
fn init_logger() {
    let logger_config = &settings().logger;

    // Validate log level
    let log_level = match Level::from_str(&logger_config.level) {
        Ok(level) => level,
        Err(_) => panic!(
            "Invalid log level: '{}'. Valid values are: trace, debug, info, warn, error",
            logger_config.level
        ),
    };

    // Validate log format
    match logger_config.format.as_str() {
        "json" => {
            let console_layer = Layer::new()
                .with_writer(std::io::stdout.with_max_level(log_level))
                .json();
            Registry::default().with(console_layer).init();
        }
        "console" => {
            let console_layer = Layer::new()
                .with_writer(std::io::stdout.with_max_level(log_level))
                .pretty();
            Registry::default().with(console_layer).init();
        }
        other => panic!(
            "Invalid log format: '{}'. Valid values are: json, console",
            other
        ),
    }
}

// Init prometheus metrics server
fn prometheus_orchestrate(orchestrations: &mut Vec<JoinHandle<()>>) {
    if let Some(prometheus_config) = &settings().prometheus {
        if prometheus_config.enable {
            let port = prometheus_config.port;
            let handle = tokio::spawn(async move {
                image_swapper::prometheus::start_metrics_server(port).await;
            });
            orchestrations.push(handle);
        }
    }
}

// Init admission webhook
fn webhook_orchestrate(orchestrations: &mut Vec<JoinHandle<()>>, swapper: Arc<ImageSwapper>) {
    let handle = tokio::spawn(async move {
        server::serve(swapper, settings()).await;
    });
    orchestrations.push(handle);
}

// Main function
#[tokio::main]
async fn main() {
    // Initialize the global logging system
    init_logger();
    // Log the start
    let env = Settings::mode();
    info!(version = VERSION, env, "Starting image swapper admission controller");
    let setting = settings();
    // Fail fast: a webhook that cannot reach its target registry must not serve
    let registry = EcrRegistry::login(&setting.target)
        .await
        .expect("target registry login failed");
    registry.spawn_renewal();
    let client = kube::Client::try_default()
        .await
        .expect("kubernetes client initialization failed");
    let runner = CopyRunner::new(
        registry.clone(),
        Arc::new(KubePullSecrets::new(client)),
        Arc::new(SkopeoBackend),
    );
    let coordinator = CopyCoordinator::start(runner, &setting.copy);
    let swapper = Arc::new(ImageSwapper::new(registry, coordinator, setting));
    // Start threads
    let mut orchestrations = Vec::new();
    prometheus_orchestrate(&mut orchestrations);
    webhook_orchestrate(&mut orchestrations, swapper);
    // Wait for threads to terminate or a stop signal
    tokio::select! {
        _ = join_all(orchestrations) => {}
        _ = signals::handle_stop_signals() => {}
    }
}
