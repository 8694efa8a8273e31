use axum::{Router, routing::get};
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::LazyLock;
use tracing::info;

// Registry initialization
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// region Metrics initialization
pub static CONTAINERS_PROCESSED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "swapper_containers_processed_total",
        "Number of containers inspected at admission",
    )
    .expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("collector can be registered");
    counter
});

pub static IMAGES_SWAPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "swapper_images_swapped_total",
        "Number of container images rewritten to the mirror registry",
    )
    .expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("collector can be registered");
    counter
});

pub static COPIES_SUBMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "swapper_copies_submitted_total",
        "Number of image copy tasks submitted",
    )
    .expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("collector can be registered");
    counter
});

pub static COPIES_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "swapper_copies_dropped_total",
        "Number of image copy tasks dropped at queue saturation",
    )
    .expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("collector can be registered");
    counter
});

pub static COPY_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "swapper_copy_failures_total",
        "Number of image copies that ended with a non-zero exit",
    )
    .expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("collector can be registered");
    counter
});

pub static EXISTENCE_CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "swapper_existence_cache_hits_total",
        "Number of existence checks answered from the cache",
    )
    .expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("collector can be registered");
    counter
});
// endregion

// Functions
async fn metrics_handler() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

pub async fn start_metrics_server(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Prometheus server listening on {}/metrics", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
