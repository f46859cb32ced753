//! Gesture server: loads the classifier and class map once, then answers
//! `landmark` events from any number of clients with `prediction` events,
//! over raw TCP (JSON lines) and WebSocket (browsers).
//!
//! Usage: gesture_server [config.toml]

use std::sync::Arc;

use anyhow::{Context, Result};

use sign_gesture::config::{Config, CONFIG_PATH};
use sign_gesture::inference::ServiceContext;
use sign_gesture::logging::open_log_file;
use sign_gesture::{log, server};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_PATH.to_string());
    let mut config = Config::load_or_default(&config_path)?;
    config.apply_env()?;
    let (logfile, _log_path) = open_log_file(&config.logging.dir, "gesture_server")?;

    log!(logfile, "Gesture Server ({})", env!("GIT_VERSION"));
    log!(logfile, "Config: {}", config_path);
    log!(logfile, "Model: {} ({:?})", config.model.path.display(), config.model.backend);
    log!(logfile, "Classes: {}", config.model.classes.display());
    if config.server.verbose { log!(logfile, "Verbose mode: ON"); }

    let ctx = ServiceContext::load(&config.model).context("failed to load model artifacts")?;
    let model = ctx.model();
    let outputs = model.output_width().map_or("dynamic".to_string(), |n| n.to_string());
    log!(logfile, "Model loaded: {} ({} inputs -> {} outputs)", model.name(), model.input_width(), outputs);
    log!(logfile, "Class map loaded: {} classes", ctx.classes().len());
    if let Some((classes, outputs)) = ctx.class_count_mismatch() {
        log!(
            logfile,
            "WARNING: class map has {} entries but the model outputs {} scores; unmapped indices report \"unknown\"",
            classes,
            outputs
        );
    }

    let listener = server::bind(&config.listen_addr()).await?;
    log!(logfile, "Listening on {} (JSON lines)", listener.local_addr()?);
    let ws_listener = if config.server.websocket {
        let l = server::bind(&config.ws_listen_addr()).await?;
        log!(logfile, "Listening on {} (WebSocket)", l.local_addr()?);
        Some(l)
    } else {
        None
    };
    log!(logfile, "");

    let ctx = Arc::new(ctx);
    let verbose = config.server.verbose;
    let websocket = async {
        match ws_listener {
            Some(l) => server::serve_websocket(l, Arc::clone(&ctx), Arc::clone(&logfile), verbose).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = server::serve(listener, Arc::clone(&ctx), Arc::clone(&logfile), verbose) => {}
        _ = websocket => {}
        _ = tokio::signal::ctrl_c() => log!(logfile, "Shutting down"),
    }

    Ok(())
}
