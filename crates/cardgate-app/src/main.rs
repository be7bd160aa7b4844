#![warn(missing_docs)]
//! # cardgate-app binary
//!
//! Headless entry point: applies the configured key, analyzes each image path
//! given on the command line, and prints status and classification JSON.

use std::process::ExitCode;

use cardgate_app::logging::{LogConfig, init_logging};
use cardgate_app::{
    AppConfig, AppError, analyze_to_ui, app_version, apply_default_key, build_session,
};
use cardgate_core::ImageRef;
use cardgate_ui::UiState;
use tracing::{error, info};

/// CLI entry point.
#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "cardgate stopped");
            eprintln!("cardgate: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    init_logging(&LogConfig::default().with_format(config.log_format))?;
    info!(version = app_version(), "starting cardgate");

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(|error| AppError::Http(error.to_string()))?;
    let session = build_session(&config, client)?;
    let mut ui = UiState::new(app_version());

    let _ = apply_default_key(&session, &config).await;
    ui.sync_session(session.current_state());
    println!("cardgate {} ({})", ui.version, ui.session.name());

    for path in std::env::args().skip(1) {
        match ImageRef::new(&path) {
            Ok(image) => ui.image_loaded(image),
            Err(error) => {
                info!(%error, "image rejected");
                ui.image_load_failed();
                println!("{path}: {}", ui.status_text);
                continue;
            }
        }

        analyze_to_ui(&session, &mut ui).await;
        println!("{path}: {}", ui.status_text);
        if let Some(json) = &ui.result_json {
            println!("{json}");
        }
    }

    session.shutdown();
    Ok(())
}
