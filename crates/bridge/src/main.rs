mod advisor;
mod care;
mod channel;
mod config;
mod controller;
mod dispatcher;
mod error;
mod protocol;
mod schedule;
mod state;
mod web;

use anyhow::{Context, Result};
use std::{env, sync::Arc};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use advisor::{Advisor, ChatAdvisor};
use channel::{ChannelEvent, Topics};
use config::Credentials;
use controller::SyncController;
use dispatcher::Dispatcher;
use state::SystemState;

/// Channel events buffered between the MQTT pump and the dispatcher.
const EVENT_BUFFER: usize = 32;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "bridge.toml".to_string());
    let cfg = config::load(&config_path)?;
    let creds = Credentials::from_env()?;

    info!(
        device = %creds.device_id,
        broker = %cfg.mqtt.host,
        port = cfg.mqtt.port,
        model = %cfg.advisor.model,
        "plantcare bridge starting"
    );

    // ── Advisory capability ─────────────────────────────────────────
    let advisor: Arc<dyn Advisor> = Arc::new(ChatAdvisor::new(&cfg.advisor, creds.api_key.clone())?);

    // ── Cloud channel + controller ──────────────────────────────────
    let topics = Topics::new(&cfg.mqtt.base_topic, &creds.device_id);
    let (mqtt_channel, client, eventloop) = channel::connect(&cfg.mqtt, &creds, topics.clone());
    let controller = SyncController::new(Arc::new(mqtt_channel), cfg.schedule.anchor_epoch);

    // ── Shared status (ephemeral, for the status API) ───────────────
    let shared = SystemState::new(
        controller.config(),
        controller.light().clone(),
        controller.schedule(),
    )
    .shared();
    shared
        .write()
        .await
        .record_system("bridge started".to_string());

    // ── Web server ──────────────────────────────────────────────────
    if cfg.web.enabled {
        let web_state = Arc::clone(&shared);
        let port = cfg.web.port;
        tokio::spawn(async move {
            if let Err(e) = web::serve(web_state, port).await {
                error!("status api stopped: {e:#}");
            }
        });
    }

    // ── Dispatcher ──────────────────────────────────────────────────
    let (tx, rx) = mpsc::channel::<ChannelEvent>(EVENT_BUFFER);
    let dispatcher = Dispatcher::new(Arc::new(Mutex::new(controller)), advisor, shared);
    let dispatch = tokio::spawn(dispatcher.run(rx));

    // ── Channel pump (runs until a fatal channel error) ─────────────
    let result = channel::pump(eventloop, client, topics, tx).await;
    dispatch.abort();

    if let Err(e) = &result {
        error!("cloud channel failed: {e:#}");
    }
    result.context("cloud channel failed")
}
