mod config;
mod crypto;
mod dispatch;
mod error;
mod gateway_client;
mod health;
mod models;
mod queue;
mod retry;
mod routes;
mod store;
mod tasks;
mod wire;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::dispatch::DispatchHandler;
use crate::health::{HealthController, HttpHealthProbe, PgGatewayUrlResolver};
use crate::queue::KafkaProducer;
use crate::routes::AppState;
use crate::store::{GatewayDirectory, PgRepository};
use crate::tasks::BackgroundTasks;

const MAX_DB_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payment_gateway_relay=info,tower_http=info".into()),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[payment-gateway-relay] configuration error: {e}");
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    info!(
        address = %config.server_address,
        topic = %config.send_transaction_topic,
        gateways = config.gateways.len(),
        "starting payment-gateway-relay"
    );

    let pool = match store::connect(&config.postgres_uri, MAX_DB_CONNECTIONS).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[payment-gateway-relay] failed to connect to Postgres: {e}");
            std::process::exit(1);
        }
    };
    let repository: Arc<PgRepository> = Arc::new(PgRepository::new(pool));

    let producer = match KafkaProducer::new(&config.kafka_brokers_csv()) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("[payment-gateway-relay] failed to build Kafka producer: {e}");
            std::process::exit(1);
        }
    };

    let client = Arc::new(gateway_client::HttpGatewayClient::new());

    let shutdown = CancellationToken::new();
    // Shared detached-task tracker (republish, enqueue-on-deposit,
    // apply-callback-status) drained within the graceful window at shutdown.
    let background_tasks = BackgroundTasks::new();

    // Composition root (DESIGN.md: "module-level singletons -> dependency-
    // injected services"). Every long-lived task below is constructed with
    // the handles it needs rather than reaching for package globals.
    let dispatch_handler = Arc::new(DispatchHandler::new(
        config.clone(),
        repository.clone(),
        repository.clone(),
        repository.clone(),
        client,
        producer.clone(),
        config.send_transaction_topic.clone(),
        background_tasks.clone(),
    ));

    let consumer = match queue::build_consumer(
        &config.kafka_brokers_csv(),
        &config.kafka_group_id,
        &config.kafka_client_id,
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[payment-gateway-relay] failed to build Kafka consumer: {e}");
            std::process::exit(1);
        }
    };

    let consumer_shutdown = shutdown.clone();
    let consumer_topic = config.send_transaction_topic.clone();
    let consumer_handle = tokio::spawn(async move {
        queue::run_consumer_loop(consumer, consumer_topic, dispatch_handler, consumer_shutdown)
            .await;
    });

    // Health control loop (C11).
    let url_resolver = Arc::new(PgGatewayUrlResolver::new(
        repository.clone() as Arc<dyn GatewayDirectory>,
        config.clone(),
    ));
    let health_controller = Arc::new(HealthController::new(
        repository.clone() as Arc<dyn GatewayDirectory>,
        repository.clone(),
        Arc::new(HttpHealthProbe::new(Duration::from_secs(5))),
        url_resolver,
        Duration::from_secs(config.health_check_interval_secs),
    ));
    let health_shutdown = shutdown.clone();
    let health_handle = tokio::spawn(async move {
        health_controller.run(health_shutdown).await;
    });

    let state = Arc::new(AppState {
        transactions: repository.clone(),
        countries: repository.clone(),
        producer: producer.clone(),
        topic: config.send_transaction_topic.clone(),
        tasks: background_tasks.clone(),
    });

    let app = Router::new()
        .route("/transaction/deposit", axum::routing::post(routes::deposit))
        .route("/transaction/withdraw", axum::routing::post(routes::withdraw))
        .route("/transaction/callback", axum::routing::post(routes::callback))
        .route("/health", axum::routing::get(routes::healthz))
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .with_state(state);

    let addr: SocketAddr = config
        .server_address
        .parse()
        .expect("invalid SERVER_ADDRESS");

    info!(addr = %addr, "payment-gateway-relay listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    let graceful_shutdown_secs = config.graceful_shutdown_secs;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .expect("server error");

    // Give in-flight dispatch handlers, republishes, and other detached
    // writes the graceful window from §5 before the process exits (§9:
    // "detached background sends -> bounded fire-and-forget tasks tracked
    // for drain at shutdown").
    let deadline = std::time::Instant::now() + Duration::from_secs(graceful_shutdown_secs);
    let drain = tokio::time::timeout(
        Duration::from_secs(graceful_shutdown_secs),
        async {
            let _ = consumer_handle.await;
            let _ = health_handle.await;
        },
    )
    .await;
    if drain.is_err() {
        error!("graceful shutdown window elapsed before consumer/health loops finished");
    }
    let remaining = deadline.saturating_duration_since(std::time::Instant::now());
    background_tasks.drain(remaining).await;

    info!("payment-gateway-relay shut down");
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }

    shutdown.cancel();
}
