use search_orchestrator::{
    api::{build_router, AppState, HealthRegistry},
    backends::{
        clickhouse::ClickhouseClient, docstore::HttpDocumentStore, docstore::Hydrator,
        elasticsearch::ElasticsearchClient, AnalyticsStore,
    },
    cache::{RedisCache, ResultCache},
    config::Config,
    indexing::{ChangeConsumer, IndexingSettings, StreamProcessor},
    observability::{self, QueryPerformanceWriter, SlowQueryDetector},
    search::Orchestrator,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "search_orchestrator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    config.validate()?;

    tracing::info!(
        service = %config.observability.service_name,
        "starting search orchestrator v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = observability::init_metrics() {
        tracing::warn!(error = %e, "metrics initialization failed, continuing");
    }

    let shutdown = CancellationToken::new();

    // Result cache is load-bearing for the read path: fail fast without it
    let redis_cache = Arc::new(RedisCache::new(&config.redis).await?);
    tracing::info!("redis cache initialized");

    let es_client = Arc::new(ElasticsearchClient::new(
        &config.elasticsearch,
        &config.search,
        shutdown.clone(),
    )?);
    if let Err(e) = es_client.ping().await {
        return Err(format!("elasticsearch ping failed: {e}").into());
    }
    tracing::info!("elasticsearch client initialized");

    // Analytics store is optional: without it the service loses the
    // analytics intent and the degraded fallback tier, nothing else
    let ch_client = {
        let client = ClickhouseClient::new(&config.clickhouse);
        match client.ping().await {
            Ok(()) => {
                if let Err(e) = client.ensure_tables().await {
                    tracing::warn!(error = %e, "clickhouse table creation failed");
                }
                tracing::info!("clickhouse client initialized");
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::warn!(error = %e, "clickhouse unavailable, analytics disabled");
                None
            }
        }
    };

    // Document store is optional: without it results are never hydrated
    let hydrator = if config.docstore.enabled() {
        match HttpDocumentStore::new(&config.docstore) {
            Ok(store) => {
                tracing::info!("document store client initialized");
                Some(Hydrator::new(
                    Arc::new(store),
                    config.docstore.max_batch_size,
                    config.docstore.request_timeout(),
                ))
            }
            Err(e) => {
                tracing::warn!(error = %e, "document store unavailable, hydration disabled");
                None
            }
        }
    } else {
        None
    };

    let analytics_writer: Option<Arc<dyn QueryPerformanceWriter>> = ch_client
        .clone()
        .map(|c| c as Arc<dyn QueryPerformanceWriter>);
    let slow_query = Arc::new(SlowQueryDetector::new(
        config.search.slow_query.warning(),
        config.search.slow_query.critical(),
        analytics_writer,
    ));

    let analytics_store: Option<Arc<dyn AnalyticsStore>> = ch_client
        .clone()
        .map(|c| c as Arc<dyn AnalyticsStore>);

    let orchestrator = Arc::new(Orchestrator::new(
        es_client.clone(),
        analytics_store.clone(),
        redis_cache.clone(),
        hydrator,
        config.docstore.collection.clone(),
        slow_query,
        config.search.clone(),
        config.elasticsearch.index_prefix.clone(),
    ));

    // Indexing pipeline
    let processor = StreamProcessor::start(
        es_client.clone(),
        analytics_store,
        redis_cache.clone(),
        IndexingSettings::from_config(&config.elasticsearch),
    );

    let consumer_task = match ChangeConsumer::new(&config.kafka, processor.clone()) {
        Ok(consumer) => {
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                consumer.run(token).await;
            }))
        }
        Err(e) => {
            tracing::warn!(error = %e, "kafka consumer unavailable, indexing pipeline disabled");
            None
        }
    };

    // HTTP surface
    let mut health = HealthRegistry::new();
    health.register("redis", redis_cache.clone());
    health.register_index(es_client.clone());
    if let Some(ch) = &ch_client {
        health.register("clickhouse", ch.clone());
    }

    let state = AppState {
        orchestrator,
        cache: redis_cache.clone() as Arc<dyn ResultCache>,
    };
    let app = build_router(state, Arc::new(health), config.server.max_in_flight);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "http server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    // Drain order: HTTP is already stopped; stop the consumer, then flush
    // whatever the processor still buffers.
    tracing::info!(
        timeout_secs = config.server.shutdown_timeout_secs,
        "starting graceful shutdown"
    );

    if let Some(task) = consumer_task {
        let _ = tokio::time::timeout(config.server.shutdown_timeout(), task).await;
    }

    match tokio::time::timeout(config.server.shutdown_timeout(), processor.stop()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "final flush failed"),
        Err(_) => tracing::error!("final flush did not complete in time"),
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
