use anyhow::{Context, Result};
use attendance_service::{
    api,
    config::{AttendanceConfig, LocatorKind},
    vision::{
        locator::FramingLocator,
        onnx_locator::{OnnxFaceLocator, OnnxLocatorConfig},
        FaceLocator,
    },
    AttendanceService, AttendanceStore,
};
use std::sync::Arc;
use telemetry::LogConfig;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = AttendanceConfig::from_env()?;

    // Initialize telemetry; the guard keeps the file writer running
    let _log_guard = telemetry::init_structured_logging(
        LogConfig::new("attendance-service").with_node_id(config.node_id.clone()),
    );

    info!("Starting attendance service...");
    info!(
        "Attendance service configuration: bind={}, data_dir={}, node_id={}",
        config.bind_addr,
        config.data_dir.display(),
        config.node_id
    );

    let locator: Arc<dyn FaceLocator> = match &config.locator {
        LocatorKind::Framing => {
            info!("Using framing face locator");
            Arc::new(FramingLocator::new())
        }
        LocatorKind::Onnx { model_path } => {
            info!("Loading ONNX face detector from {}", model_path.display());
            let locator = OnnxFaceLocator::load(
                OnnxLocatorConfig::new(model_path.clone())
                    .with_execution_provider(config.execution_provider.clone()),
            )
            .context("Failed to load face detection model")?;
            info!(
                "ONNX face detector ready (execution provider: {})",
                locator.execution_provider()
            );
            Arc::new(locator)
        }
    };

    let store = AttendanceStore::open(&config.data_dir, config.settings);

    // Create application state
    let state = match config.debug_image_dir.clone() {
        Some(dir) => {
            info!("Writing annotated detection frames to {}", dir.display());
            AttendanceService::with_debug_images(config.node_id.clone(), locator, store, dir)
        }
        None => AttendanceService::new(config.node_id.clone(), locator, store),
    };

    // Build HTTP router
    let app = api::router_with_body_limit(state.clone(), config.max_body_bytes);

    // Bind and serve
    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Attendance service listening on {}", config.bind_addr);

    // Run with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: AttendanceService) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    if let Err(e) = state.shutdown().await {
        error!("Error during shutdown: {}", e);
    }
}
