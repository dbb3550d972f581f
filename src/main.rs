use std::{process, sync::Arc};

use svgsnap::{
    application::{error::AppError, pool::SessionPool, staging::StagingStore},
    config,
    infra::{
        cdp::{DevToolsConnector, resolve_targets},
        error::InfraError,
        http::{BridgeState, build_router},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
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
    let (_cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::Infra(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    telemetry::init(&settings.logging)?;

    let targets = resolve_targets(&settings.engine.targets).await?;
    info!(
        target = "svgsnap::startup",
        targets = targets.len(),
        "bootstrapping rendering sessions"
    );

    // A fatal bootstrap prevents the service from ever accepting traffic;
    // there is no degraded mode with fewer sessions than configured.
    let connector = Arc::new(DevToolsConnector::new());
    let pool = SessionPool::bootstrap(connector, &targets, settings.engine.bootstrap_timeout)
        .await
        .map_err(|err| AppError::Infra(InfraError::Bootstrap(err)))?;

    let state = BridgeState {
        staging: Arc::new(StagingStore::new()),
        pool,
        bridge_base: settings.bridge.base_url.clone(),
    };
    let max_body_bytes = settings.uploads.max_request_bytes.get() as usize;
    let router = build_router(state, max_body_bytes);

    let listener = tokio::net::TcpListener::bind(settings.server.listen_addr)
        .await
        .map_err(|err| AppError::Infra(InfraError::from(err)))?;

    info!(
        target = "svgsnap::startup",
        addr = %settings.server.listen_addr,
        bridge_base = %settings.bridge.base_url,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::Infra(InfraError::from(err)))?;

    Ok(())
}
