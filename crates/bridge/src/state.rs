use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::care::DeviceConfig;
use crate::schedule::{DimmedLight, ScheduleMask, WaterSchedule};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// What the status endpoint shows. Mirrors the last published properties;
/// the controller owns the real configuration.
pub struct SystemState {
    pub started_at: Instant,
    pub channel_connected: bool,
    pub config: DeviceConfig,
    pub light: DimmedLight,
    pub schedule: WaterSchedule,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Request,
    Config,
    Reply,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub channel_connected: bool,
    pub config: DeviceConfig,
    pub dimmed_light: DimmedLight,
    pub water_schedule: WaterSchedule,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(config: DeviceConfig, light: DimmedLight, schedule: WaterSchedule) -> Self {
        Self {
            started_at: Instant::now(),
            channel_connected: false,
            config,
            light,
            schedule,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Record an inbound message on the message property.
    pub fn record_request(&mut self, detail: String) {
        self.push_event(EventKind::Request, detail);
    }

    /// Record a newly applied configuration.
    pub fn record_config(
        &mut self,
        config: DeviceConfig,
        light: DimmedLight,
        schedule: WaterSchedule,
    ) {
        self.config = config;
        self.light = light;
        self.schedule = schedule;
        self.push_event(
            EventKind::Config,
            format!(
                "moisture {}%, light {}x{}h, water every {}d for {}s (mask {} {})",
                config.moisture_threshold,
                config.lighting_frequency,
                config.lighting_duration,
                config.watering_frequency,
                config.watering_duration,
                schedule.mask,
                ScheduleMask::from_bits(schedule.mask).map_or("custom", ScheduleMask::name)
            ),
        );
    }

    /// Record an outbound reply.
    pub fn record_reply(&mut self, detail: String) {
        self.push_event(EventKind::Reply, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            channel_connected: self.channel_connected,
            config: self.config,
            dimmed_light: self.light.clone(),
            water_schedule: self.schedule,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
