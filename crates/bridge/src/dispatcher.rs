//! Request dispatcher: turns values written to the message property into
//! handler runs and replies.
//!
//! ## Per-request state machine
//!
//! ```text
//! Idle ──▶ Routing ──┬─▶ NameHandling ──────┐
//!                    ├─▶ WaterHandling ─────┤
//!                    ├─▶ DiagnosisHandling ─┼─▶ Responding ──▶ Idle
//!                    └─▶ UnknownHandling ───┘
//! ```
//!
//! Channel events are consumed one at a time, but each request runs in its
//! own task. Requests are not queued: two name requests waiting on the
//! advisor at the same time both apply their configuration, and whichever
//! finishes last wins.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::advisor::{Advisor, AdvisoryRequest};
use crate::care::{self, DeviceConfig};
use crate::channel::ChannelEvent;
use crate::controller::SyncController;
use crate::error::CareError;
use crate::protocol::{self, DecodedRequest, RequestTag};
use crate::state::SharedState;

const DIAGNOSIS_SYSTEM_INSTRUCTION: &str = "You are a plant doctor. Given a description of a \
house plant's symptoms, name the most likely cause and the single most useful remedy. Answer in \
plain text, at most three short sentences.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Idle,
    Routing,
    NameHandling,
    WaterHandling,
    DiagnosisHandling,
    UnknownHandling,
    Responding,
}

impl Stage {
    fn for_tag(tag: RequestTag) -> Self {
        match tag {
            RequestTag::Name => Self::NameHandling,
            RequestTag::Water => Self::WaterHandling,
            RequestTag::Diagnosis => Self::DiagnosisHandling,
            RequestTag::Unknown(_) => Self::UnknownHandling,
        }
    }
}

fn enter(stage: Stage, tag: RequestTag) {
    debug!(?stage, %tag, "dispatcher stage");
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub(crate) struct Dispatcher {
    controller: Arc<Mutex<SyncController>>,
    advisor: Arc<dyn Advisor>,
    shared: SharedState,
}

impl Dispatcher {
    pub(crate) fn new(
        controller: Arc<Mutex<SyncController>>,
        advisor: Arc<dyn Advisor>,
        shared: SharedState,
    ) -> Self {
        Self {
            controller,
            advisor,
            shared,
        }
    }

    /// Consume channel events until the sender is dropped.
    pub(crate) async fn run(self, mut rx: mpsc::Receiver<ChannelEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                ChannelEvent::Connected => {
                    {
                        let mut st = self.shared.write().await;
                        st.channel_connected = true;
                        st.record_system("channel connected".to_string());
                    }
                    // Retained properties may have been lost on the broker side.
                    let published = self.controller.lock().await.publish_snapshot().await;
                    if let Err(e) = published {
                        warn!("snapshot publish failed: {e:#}");
                        self.shared.write().await.record_error(format!("{e:#}"));
                    }
                }
                ChannelEvent::Disconnected => {
                    info!("channel disconnected");
                    let mut st = self.shared.write().await;
                    st.channel_connected = false;
                    st.record_system("channel disconnected".to_string());
                }
                ChannelEvent::Error(e) => {
                    let mut st = self.shared.write().await;
                    st.channel_connected = false;
                    st.record_error(format!("channel error: {e}"));
                }
                ChannelEvent::Request(raw) => {
                    let dispatcher = self.clone();
                    tokio::spawn(async move {
                        dispatcher.handle(&raw).await;
                    });
                }
            }
        }
        debug!("channel event stream closed");
    }

    /// Run one request through the state machine and publish the reply.
    /// Returns the formatted reply.
    pub(crate) async fn handle(&self, raw: &str) -> String {
        let request = protocol::parse(raw);
        enter(Stage::Routing, request.tag);
        info!(tag = %request.tag, content = %request.content, "request");
        self.shared
            .write()
            .await
            .record_request(protocol::format(request.tag, &request.content));

        enter(Stage::for_tag(request.tag), request.tag);
        let text = match request.tag {
            RequestTag::Name => self.handle_name(&request).await,
            RequestTag::Water => handle_water(&request),
            RequestTag::Diagnosis => self.handle_diagnosis(&request).await,
            RequestTag::Unknown(_) => handle_unknown(&request),
        };

        enter(Stage::Responding, request.tag);
        let reply = protocol::format(request.tag, &text);
        let published = self.controller.lock().await.reply(request.tag, &text).await;
        {
            let mut st = self.shared.write().await;
            match published {
                Ok(()) => st.record_reply(reply.clone()),
                Err(e) => {
                    warn!(tag = %request.tag, "reply publish failed: {e:#}");
                    st.record_error(format!("reply on tag {} not published: {e:#}", request.tag));
                }
            }
        }

        enter(Stage::Idle, request.tag);
        reply
    }

    async fn handle_name(&self, request: &DecodedRequest) -> String {
        let plant = request.content.as_str();

        // The advisor is called without holding the controller.
        let config = match care::resolve(self.advisor.as_ref(), plant).await {
            Ok(config) => config,
            Err(e) => {
                warn!(plant, "care lookup failed: {e}");
                self.shared
                    .write()
                    .await
                    .record_error(format!("name request '{plant}': {e}"));
                return name_failure_text(plant, &e);
            }
        };

        let published = {
            let mut controller = self.controller.lock().await;
            let published = controller.apply_config(config).await;
            // Still under the controller lock so status follows apply order.
            let mut st = self.shared.write().await;
            st.record_config(config, controller.light().clone(), controller.schedule());
            if let Err(e) = &published {
                st.record_error(format!("{e:#}"));
            }
            published
        };
        if let Err(e) = published {
            warn!(plant, "config applied but not fully published: {e:#}");
        }

        info!(plant, ?config, "care instructions applied");
        care_summary(plant, &config)
    }

    async fn handle_diagnosis(&self, request: &DecodedRequest) -> String {
        let symptoms = request.content.as_str();
        if symptoms.is_empty() {
            return "Describe the symptoms to get a diagnosis".to_string();
        }

        let advisory = AdvisoryRequest {
            system_instruction: DIAGNOSIS_SYSTEM_INSTRUCTION.to_string(),
            user_text: symptoms.to_string(),
        };
        match self.advisor.complete(&advisory).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("diagnosis failed: {e}");
                self.shared
                    .write()
                    .await
                    .record_error(format!("diagnosis request: {e}"));
                format!("Could not diagnose: {e}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reply texts
// ---------------------------------------------------------------------------

fn handle_water(request: &DecodedRequest) -> String {
    if request.content.is_empty() {
        "Watering request received".to_string()
    } else {
        format!("Watering request received: {}", request.content)
    }
}

fn handle_unknown(request: &DecodedRequest) -> String {
    format!(
        "Unrecognized request type {}; use 1 (plant name), 2 (water) or 3 (diagnosis)",
        request.tag
    )
}

fn care_summary(plant: &str, c: &DeviceConfig) -> String {
    format!(
        "{plant}: water when soil moisture drops below {}%, light {} time(s) a day for {} h, \
         water every {} day(s) for {} s",
        c.moisture_threshold,
        c.lighting_frequency,
        c.lighting_duration,
        c.watering_frequency,
        c.watering_duration
    )
}

fn name_failure_text(plant: &str, err: &CareError) -> String {
    match err {
        CareError::EmptyPlantName => "Send a plant name to get care instructions".to_string(),
        other => format!("Could not get care instructions for {plant}: {other}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
