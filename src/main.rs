use std::{process, sync::Arc, time::Duration};

use contentproxy::{
    application::error::AppError,
    cache::{
        CacheConfig, CacheStore, ContentCache, FilesystemStore, MemoryStore, Observer,
        PostgresStore,
    },
    config::{self, CacheBackend, Settings},
    infra::{
        cms::CmsClient,
        db,
        error::InfraError,
        http::{self, ProxyState},
        notifier::ObserverBroker,
        telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Purge(_) => run_purge(settings).await,
    }
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn CacheStore>, AppError> {
    let store: Arc<dyn CacheStore> = match settings.cache.backend {
        CacheBackend::Filesystem => Arc::new(
            FilesystemStore::open(&settings.cache.directory)
                .await
                .map_err(InfraError::from)?,
        ),
        CacheBackend::Memory => Arc::new(MemoryStore::new()),
        CacheBackend::Postgres => {
            let pool = db::connect(&settings.database).await?;
            Arc::new(PostgresStore::open(pool).await.map_err(InfraError::from)?)
        }
    };
    info!(backend = store.backend(), "Cache store opened");
    Ok(store)
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let store = open_store(&settings).await?;
    let loader = Arc::new(CmsClient::new(settings.cms.url.clone())?);
    let broker = ObserverBroker::from_settings(&settings.observers)?;
    info!(
        cms = %loader.base(),
        observers = broker.len(),
        workspaces = ?settings.cms.workspaces,
        dimensions = ?settings.cms.dimensions,
        "Content source configured"
    );
    if settings.cms.dimensions.is_empty() {
        warn!("No dimensions configured; invalidation requests will be no-ops");
    }
    if settings.proxy.token.is_none() {
        warn!("No proxy token configured; administrative routes are unauthenticated");
    }

    let observer: Arc<dyn Observer> = Arc::new(broker);
    let cache = Arc::new(
        ContentCache::start(
            CacheConfig::from(&settings.cache),
            store,
            loader,
            observer,
        )
        .await?,
    );

    let state = ProxyState::new(
        Arc::clone(&cache),
        &settings.cms,
        settings.proxy.token.clone(),
    );
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %settings.server.addr, "Listening");

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown({
        let shutdown = Arc::clone(&shutdown);
        async move { shutdown.notified().await }
    });

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server.into_future() => result.map_err(InfraError::from)?,
        () = drain_after_signal(Arc::clone(&shutdown), grace) => {
            warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out");
        }
    }

    cache.shutdown();
    info!("Shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal, ask the server to drain, then give it `grace`.
async fn drain_after_signal(shutdown: Arc<Notify>, grace: Duration) {
    shutdown_signal().await;
    info!("Shutdown signal received, draining connections");
    shutdown.notify_one();
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn run_purge(settings: Settings) -> Result<(), AppError> {
    let store = open_store(&settings).await?;
    let before = store.count().await.map_err(InfraError::from)?;
    store.remove_all().await.map_err(InfraError::from)?;
    info!(backend = store.backend(), removed = before, "Cache store purged");
    Ok(())
}
