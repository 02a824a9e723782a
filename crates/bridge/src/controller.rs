//! Owns the device configuration and everything derived from it, and
//! publishes it as cloud properties.
//!
//! Nothing else mutates the configuration: the dispatcher hands a validated
//! `DeviceConfig` to `apply_config`, which overwrites the current one,
//! recomputes the water schedule and publishes every structured property in
//! a fixed order.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::care::DeviceConfig;
use crate::channel::{PropertyChannel, MESSAGE_PROPERTY};
use crate::protocol::{self, RequestTag};
use crate::schedule::{build_schedule, DimmedLight, WaterSchedule};

pub(crate) const MOISTURE_THRESHOLD: &str = "moistureThreshold";
pub(crate) const LIGHTING_DURATION: &str = "lightingDuration";
pub(crate) const WATERING_FREQUENCY: &str = "wateringFrequency";
pub(crate) const WATERING_DURATION: &str = "wateringDuration";
pub(crate) const DIMMED_LIGHT: &str = "dimmedLight";
pub(crate) const WATER_SCHEDULE: &str = "waterSchedule";

pub(crate) struct SyncController {
    channel: Arc<dyn PropertyChannel>,
    anchor: i64,
    config: DeviceConfig,
    light: DimmedLight,
    schedule: WaterSchedule,
}

impl SyncController {
    /// Start from the default configuration. Nothing is published until
    /// `publish_snapshot` or `apply_config` is called.
    pub(crate) fn new(channel: Arc<dyn PropertyChannel>, anchor: i64) -> Self {
        let config = DeviceConfig::default();
        Self {
            channel,
            anchor,
            config,
            light: DimmedLight::default(),
            schedule: build_schedule(&config, anchor),
        }
    }

    pub(crate) fn config(&self) -> DeviceConfig {
        self.config
    }

    pub(crate) fn light(&self) -> &DimmedLight {
        &self.light
    }

    pub(crate) fn schedule(&self) -> WaterSchedule {
        self.schedule
    }

    /// Replace the configuration and publish it. The in-memory state is
    /// updated even if a publication fails.
    pub(crate) async fn apply_config(&mut self, config: DeviceConfig) -> Result<()> {
        self.config = config;
        self.schedule = build_schedule(&config, self.anchor);
        debug!(?config, mask = self.schedule.mask, "config applied");
        self.publish_snapshot().await
    }

    /// Publish every structured property. Keeps going past failures and
    /// reports them together.
    pub(crate) async fn publish_snapshot(&self) -> Result<()> {
        let mut failed: Vec<&str> = Vec::new();

        for (property, payload) in self.publications()? {
            if let Err(e) = self.channel.publish(property, payload).await {
                warn!(property, "publish failed: {e:#}");
                failed.push(property);
            }
        }

        if !failed.is_empty() {
            bail!("failed to publish: {}", failed.join(", "));
        }
        Ok(())
    }

    /// Publish a reply on the message property.
    pub(crate) async fn reply(&self, tag: RequestTag, text: &str) -> Result<()> {
        let message = protocol::format(tag, text);
        self.channel
            .publish(MESSAGE_PROPERTY, message.into_bytes())
            .await
    }

    fn publications(&self) -> Result<Vec<(&'static str, Vec<u8>)>> {
        let c = &self.config;
        Ok(vec![
            (MOISTURE_THRESHOLD, c.moisture_threshold.to_string().into_bytes()),
            (LIGHTING_DURATION, c.lighting_duration.to_string().into_bytes()),
            (WATERING_FREQUENCY, c.watering_frequency.to_string().into_bytes()),
            (WATERING_DURATION, c.watering_duration.to_string().into_bytes()),
            (
                DIMMED_LIGHT,
                serde_json::to_vec(&self.light).context("encode dimmedLight")?,
            ),
            (
                WATER_SCHEDULE,
                serde_json::to_vec(&self.schedule).context("encode waterSchedule")?,
            ),
        ])
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::RecordingChannel;
    use crate::schedule::DEFAULT_SCHEDULE_ANCHOR;
    use serde_json::Value;

    fn controller() -> (SyncController, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::default());
        (
            SyncController::new(channel.clone(), DEFAULT_SCHEDULE_ANCHOR),
            channel,
        )
    }

    fn pothos() -> DeviceConfig {
        DeviceConfig {
            moisture_threshold: 60,
            lighting_frequency: 6,
            lighting_duration: 10,
            watering_frequency: 2,
            watering_duration: 20,
        }
    }

    #[test]
    fn starts_from_defaults() {
        let (ctl, channel) = controller();
        assert_eq!(ctl.config(), DeviceConfig::default());
        assert_eq!(ctl.light(), &DimmedLight::default());
        assert_eq!(ctl.schedule(), build_schedule(&DeviceConfig::default(), DEFAULT_SCHEDULE_ANCHOR));
        assert!(channel.published().is_empty());
    }

    #[tokio::test]
    async fn apply_config_updates_state_and_schedule() {
        let (mut ctl, _channel) = controller();
        ctl.apply_config(pothos()).await.unwrap();

        assert_eq!(ctl.config(), pothos());
        assert_eq!(ctl.schedule().mask, 134_217_734);
        assert_eq!(ctl.schedule().length, 20);
        assert_eq!(ctl.schedule().from, DEFAULT_SCHEDULE_ANCHOR);
        assert_eq!(ctl.schedule().until, 0);
    }

    #[tokio::test]
    async fn apply_config_publishes_in_fixed_order() {
        let (mut ctl, channel) = controller();
        ctl.apply_config(pothos()).await.unwrap();

        let published = channel.published();
        let names: Vec<&str> = published.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            names,
            vec![
                MOISTURE_THRESHOLD,
                LIGHTING_DURATION,
                WATERING_FREQUENCY,
                WATERING_DURATION,
                DIMMED_LIGHT,
                WATER_SCHEDULE,
            ]
        );
        assert_eq!(published[0].1, "60");
        assert_eq!(published[1].1, "10");
        assert_eq!(published[2].1, "2");
        assert_eq!(published[3].1, "20");

        let light: Value = serde_json::from_str(&published[4].1).unwrap();
        assert_eq!(light["bri"], "0");
        assert_eq!(light["swi"], "false");

        let schedule: Value = serde_json::from_str(&published[5].1).unwrap();
        assert_eq!(schedule["frm"], DEFAULT_SCHEDULE_ANCHOR);
        assert_eq!(schedule["len"], 20);
        assert_eq!(schedule["to"], 0);
        assert_eq!(schedule["msk"], 134_217_734u32);
    }

    #[tokio::test]
    async fn weekly_frequency_publishes_daily_mask() {
        let (mut ctl, channel) = controller();
        let cfg = DeviceConfig {
            watering_frequency: 7,
            ..pothos()
        };
        ctl.apply_config(cfg).await.unwrap();

        let schedule: Value = serde_json::from_str(&channel.values(WATER_SCHEDULE)[0]).unwrap();
        assert_eq!(schedule["msk"], 3_288_334_337u32);
        assert_eq!(channel.values(WATERING_FREQUENCY), vec!["7".to_string()]);
    }

    #[tokio::test]
    async fn publish_failure_is_reported_but_others_go_out() {
        let channel = Arc::new(RecordingChannel::failing_on(DIMMED_LIGHT));
        let mut ctl = SyncController::new(channel.clone(), DEFAULT_SCHEDULE_ANCHOR);

        let err = ctl.apply_config(pothos()).await.unwrap_err();
        assert!(err.to_string().contains(DIMMED_LIGHT));

        // State still moved; every other property was published.
        assert_eq!(ctl.config(), pothos());
        assert_eq!(channel.published().len(), 5);
        assert_eq!(channel.values(WATER_SCHEDULE).len(), 1);
    }

    #[tokio::test]
    async fn publish_snapshot_sends_current_state() {
        let (ctl, channel) = controller();
        ctl.publish_snapshot().await.unwrap();
        assert_eq!(channel.published().len(), 6);
        assert_eq!(channel.values(MOISTURE_THRESHOLD), vec!["40".to_string()]);
    }

    #[tokio::test]
    async fn reply_formats_message() {
        let (ctl, channel) = controller();
        ctl.reply(RequestTag::Water, "on it").await.unwrap();
        assert_eq!(channel.replies(), vec!["PING:2:on it".to_string()]);
        assert_eq!(channel.published().len(), 1);
    }
}
