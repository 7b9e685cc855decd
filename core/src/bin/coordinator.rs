use std::process::exit;
use std::sync::Arc;
use std::time::Duration;
use zbridge_core::cli;
use zbridge_core::context::BridgeContext;
use zbridge_core::server::run_server;
use zbridge_core::task::manager::BackgroundTaskManager;

#[tokio::main]
async fn main() {
    let (config, _) = cli::get_configuration_from_cli();

    let context = match BridgeContext::new(config.clone()).await {
        Ok(context) => context,
        Err(e) => {
            tracing::error!("Can't start the coordinator: {e}");
            exit(1);
        }
    };

    if let Err(e) = context.registry.refresh().await {
        tracing::error!("Can't read the operator registry: {e}");
        exit(1);
    }

    let orchestrator = Arc::new(context.orchestrator());
    if let Err(e) = orchestrator
        .preallocate_nonces(config.signing.nonce_preallocation)
        .await
    {
        tracing::error!("Can't preallocate nonces: {e}");
        exit(1);
    }

    let mut background_tasks = BackgroundTaskManager::default();
    context.spawn_background_tasks(&background_tasks).await;

    tokio::select! {
        result = run_server(&config.host, config.port, orchestrator) => {
            if let Err(e) = result {
                tracing::error!("Action server stopped: {e}");
            }
        }
        _ = context.supervise_background_tasks(
            &background_tasks,
            config.transient_retry_delay(),
        ) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down");
        }
    }

    background_tasks
        .graceful_shutdown_with_timeout(Duration::from_secs(30))
        .await;
}
