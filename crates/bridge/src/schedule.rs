//! Firmware-facing records: the watering schedule bitmask and the dimmed
//! light placeholder.
//!
//! The firmware only understands eight fixed schedule masks. A watering
//! frequency of 1-6 days selects its own mask; everything else, including 7
//! ("weekly", which has no mask of its own), falls back to the daily mask.

use serde::Serialize;

use crate::care::DeviceConfig;

/// Fixed `frm` anchor of the water schedule (2024-01-01T00:00:00Z).
pub(crate) const DEFAULT_SCHEDULE_ANCHOR: i64 = 1_704_067_200;

// ---------------------------------------------------------------------------
// Masks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScheduleMask {
    Daily,
    /// Known to the firmware; no watering frequency selects it.
    Hourly,
    OneDay,
    TwoDay,
    ThreeDay,
    FourDay,
    FiveDay,
    SixDay,
}

impl ScheduleMask {
    /// Every mask the firmware understands.
    pub(crate) const ALL: [Self; 8] = [
        Self::Daily,
        Self::Hourly,
        Self::OneDay,
        Self::TwoDay,
        Self::ThreeDay,
        Self::FourDay,
        Self::FiveDay,
        Self::SixDay,
    ];

    pub(crate) const fn bits(self) -> u32 {
        match self {
            Self::Daily => 3_288_334_337,
            Self::Hourly => 2_214_592_513,
            Self::OneDay => 134_217_729,
            Self::TwoDay => 134_217_734,
            Self::ThreeDay => 134_217_742,
            Self::FourDay => 134_217_758,
            Self::FiveDay => 134_217_790,
            Self::SixDay => 134_217_854,
        }
    }

    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Hourly => "hourly",
            Self::OneDay => "oneDay",
            Self::TwoDay => "twoDay",
            Self::ThreeDay => "threeDay",
            Self::FourDay => "fourDay",
            Self::FiveDay => "fiveDay",
            Self::SixDay => "sixDay",
        }
    }

    pub(crate) fn from_bits(bits: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.bits() == bits)
    }

    /// Mask for a watering frequency in days. Total: unmatched values get
    /// `Daily`.
    pub(crate) fn for_frequency(days: i64) -> Self {
        match days {
            1 => Self::OneDay,
            2 => Self::TwoDay,
            3 => Self::ThreeDay,
            4 => Self::FourDay,
            5 => Self::FiveDay,
            6 => Self::SixDay,
            _ => Self::Daily,
        }
    }
}

pub(crate) fn mask_for(days: i64) -> u32 {
    ScheduleMask::for_frequency(days).bits()
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Published as the `waterSchedule` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaterSchedule {
    #[serde(rename = "frm")]
    pub(crate) from: i64,
    #[serde(rename = "len")]
    pub(crate) length: i64,
    /// 0 = open-ended.
    #[serde(rename = "to")]
    pub(crate) until: i64,
    #[serde(rename = "msk")]
    pub(crate) mask: u32,
}

pub(crate) fn build_schedule(config: &DeviceConfig, anchor: i64) -> WaterSchedule {
    WaterSchedule {
        from: anchor,
        length: config.watering_duration,
        until: 0,
        mask: mask_for(config.watering_frequency),
    }
}

/// Lighting intent, published as `dimmedLight`. Static until a light sensor
/// feeds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimmedLight {
    #[serde(rename = "bri")]
    pub(crate) brightness: String,
    #[serde(rename = "swi")]
    pub(crate) switch_on: String,
}

impl Default for DimmedLight {
    fn default() -> Self {
        Self {
            brightness: "0".to_string(),
            switch_on: "false".to_string(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
