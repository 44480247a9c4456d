//! Process entry point: boots every component in dependency order, wires
//! them together, and serves HTTP until a shutdown signal arrives (§10.4).

mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use chronos_cache::RedisCache;
use chronos_common::{RetryPolicy, StdoutNotifier};
use chronos_config::AppConfig;
use chronos_queue::{AmqpProducer, ConsumerConfig, ConsumerPool, Producer, QueueTopology};
use chronos_reconciler::{Reconciler, ReconcilerConfig};
use chronos_scheduler::{Scheduler, SchedulerConfig};
use chronos_store::postgres::{PostgresStore, RetentionWindows};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chronos_common::logging::init_logging("chronos-server");

    let config = AppConfig::load()?;
    info!(port = config.http.port, "configuration loaded");

    let retention = RetentionWindows {
        canceled: std::time::Duration::from_secs(config.storage.retention.canceled_secs),
        completed: std::time::Duration::from_secs(config.storage.retention.completed_secs),
        failed: std::time::Duration::from_secs(config.storage.retention.failed_secs),
    };
    let store = Arc::new(
        PostgresStore::connect(
            &config.storage.dsn(),
            config.storage.max_open_conns,
            config.storage.retry.to_retry_policy(),
            config.storage.recover_limit,
            retention,
        )
        .await?,
    );
    store.init_schema().await?;
    info!("connected to store and verified schema");

    let cache = Arc::new(
        RedisCache::connect(
            &config.cache.url(),
            config.cache.expiration_time(),
            "notify:status",
            config.cache.retry.to_retry_policy(),
        )
        .await?,
    );
    info!("connected to cache");

    let topology = QueueTopology {
        amqp_url: config.queue.amqp_url.clone(),
        exchange_name: config.queue.exchange_name.clone(),
        main_queue_name: config.queue.main_queue_name.clone(),
        message_queue_ttl_grace: std::time::Duration::from_secs(
            config.queue.producer.message_queue_ttl_grace_secs,
        ),
    };
    let producer = Arc::new(
        AmqpProducer::connect(topology, config.queue.producer.retry.to_retry_policy()).await?,
    );
    info!("connected to delayed-delivery queue, topology declared");

    let scheduler = Scheduler::new(
        SchedulerConfig { urgent_window: config.scheduler.urgent_window() },
        store.clone(),
        cache.clone(),
        producer.clone() as Arc<dyn Producer>,
    );

    let notifier = Arc::new(StdoutNotifier);
    let consumer_retry = RetryPolicy::new(
        config.queue.consumer.retry.attempts,
        std::time::Duration::from_millis(config.queue.consumer.retry.delay_ms),
        config.queue.consumer.retry.backoff_factor,
    );
    let consumer_pool = Arc::new(ConsumerPool::new(
        ConsumerConfig {
            amqp_url: config.queue.amqp_url.clone(),
            main_queue_name: config.queue.main_queue_name.clone(),
            workers: config.queue.consumer.workers,
            prefetch: config.queue.consumer.prefetch,
            auto_ack: config.queue.consumer.auto_ack,
        },
        consumer_retry,
        store.clone(),
        cache.clone(),
        notifier,
    ));
    consumer_pool.clone().spawn().await?;
    info!(workers = config.queue.consumer.workers, "consumer pool started");

    let reconciler = Arc::new(Reconciler::new(
        ReconcilerConfig {
            cleanup_interval: config.reconciler.cleanup_interval(),
            healthcheck_interval: config.reconciler.healthcheck_interval(),
            recover_limit: config.storage.recover_limit,
        },
        store.clone(),
        cache.clone(),
        producer.clone() as Arc<dyn Producer>,
    ));
    let reconciler_task = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.run().await })
    };

    let state = Arc::new(http::AppState {
        scheduler,
        store: store.clone() as Arc<dyn chronos_store::Store>,
        cache: cache.clone() as Arc<dyn chronos_cache::Cache>,
        producer: producer.clone() as Arc<dyn Producer>,
    });
    let app = http::router(state, config.http.write_timeout());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(?addr, "HTTP server starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining consumer pool");
    consumer_pool.stop();
    reconciler.stop();
    if tokio::time::timeout(config.http.shutdown_timeout(), reconciler_task).await.is_err() {
        tracing::warn!("reconciler did not exit within the shutdown timeout");
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
