//! Device capability profiling
//!
//! The profiler reads platform signals through [`PlatformSignals`] and caches
//! a [`DeviceProfile`]. Readers get a cloned snapshot; only `refresh` writes.

use crate::config::ProfilerConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hardware tier, ordered from most to least constrained
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceTier {
    /// Thermal emergency; only the lightest backend may run
    Emergency,
    Budget,
    MidRange,
    HighEnd,
}

/// Platform thermal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    #[default]
    Nominal,
    Fair,
    Serious,
    Critical,
}

/// Hardware acceleration available to on-device runtimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Acceleration {
    pub gpu: bool,
    pub npu: bool,
}

impl Acceleration {
    pub fn any(&self) -> bool {
        self.gpu || self.npu
    }
}

/// Raw readings from the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSnapshot {
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    #[serde(default)]
    pub thermal: ThermalState,
    /// Battery charge, `None` on mains-powered hosts
    #[serde(default)]
    pub battery_percent: Option<u8>,
    #[serde(default)]
    pub charging: bool,
    #[serde(default)]
    pub acceleration: Acceleration,
}

impl Default for PlatformSnapshot {
    fn default() -> Self {
        Self {
            total_memory_mb: 4_096,
            available_memory_mb: 4_096,
            thermal: ThermalState::Nominal,
            battery_percent: None,
            charging: false,
            acceleration: Acceleration::default(),
        }
    }
}

/// Source of platform readings, injected by the host
pub trait PlatformSignals: Send + Sync {
    fn snapshot(&self) -> PlatformSnapshot;
}

/// Platform readings held in memory and updated by the host's callbacks
#[derive(Debug, Default)]
pub struct StaticSignals {
    current: RwLock<PlatformSnapshot>,
}

impl StaticSignals {
    pub fn new(snapshot: PlatformSnapshot) -> Self {
        Self {
            current: RwLock::new(snapshot),
        }
    }

    /// Replace the current readings
    pub fn set(&self, snapshot: PlatformSnapshot) {
        *self.current.write() = snapshot;
    }

    pub fn set_thermal(&self, thermal: ThermalState) {
        self.current.write().thermal = thermal;
    }

    pub fn set_available_memory_mb(&self, available_memory_mb: u64) {
        self.current.write().available_memory_mb = available_memory_mb;
    }

    pub fn set_battery(&self, percent: Option<u8>, charging: bool) {
        let mut current = self.current.write();
        current.battery_percent = percent;
        current.charging = charging;
    }
}

impl PlatformSignals for StaticSignals {
    fn snapshot(&self) -> PlatformSnapshot {
        self.current.read().clone()
    }
}

/// Classified capabilities of the executing device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub tier: DeviceTier,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub thermal: ThermalState,
    pub battery_percent: Option<u8>,
    pub charging: bool,
    pub acceleration: Acceleration,
    pub cpu_cores: usize,
}

impl DeviceProfile {
    /// Classify raw readings into a profile
    pub fn classify(snapshot: &PlatformSnapshot, config: &ProfilerConfig) -> Self {
        let tier = classify_tier(snapshot, config);
        Self {
            tier,
            total_memory_mb: snapshot.total_memory_mb,
            available_memory_mb: snapshot.available_memory_mb,
            thermal: snapshot.thermal,
            battery_percent: snapshot.battery_percent,
            charging: snapshot.charging,
            acceleration: snapshot.acceleration,
            cpu_cores: num_cpus::get(),
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.tier == DeviceTier::Emergency
    }
}

fn classify_tier(snapshot: &PlatformSnapshot, config: &ProfilerConfig) -> DeviceTier {
    if snapshot.thermal >= ThermalState::Critical {
        return DeviceTier::Emergency;
    }

    let by_hardware = if snapshot.total_memory_mb >= config.high_end_memory_mb
        && snapshot.acceleration.any()
    {
        DeviceTier::HighEnd
    } else if snapshot.total_memory_mb >= config.mid_range_memory_mb {
        DeviceTier::MidRange
    } else {
        DeviceTier::Budget
    };

    let low_battery = !snapshot.charging
        && snapshot
            .battery_percent
            .is_some_and(|p| p < config.low_battery_percent);

    if snapshot.thermal == ThermalState::Serious || low_battery {
        by_hardware.min(DeviceTier::MidRange)
    } else {
        by_hardware
    }
}

/// Caches the device profile and recomputes it on platform callbacks
pub struct DeviceCapabilityProfiler {
    signals: Arc<dyn PlatformSignals>,
    config: ProfilerConfig,
    cached: RwLock<DeviceProfile>,
}

impl DeviceCapabilityProfiler {
    pub fn new(signals: Arc<dyn PlatformSignals>, config: ProfilerConfig) -> Self {
        let profile = DeviceProfile::classify(&signals.snapshot(), &config);
        info!(tier = ?profile.tier, memory_mb = profile.total_memory_mb, "Device profiled");
        Self {
            signals,
            config,
            cached: RwLock::new(profile),
        }
    }

    /// Current cached profile
    pub fn profile(&self) -> DeviceProfile {
        self.cached.read().clone()
    }

    /// Re-read platform signals; safe to call repeatedly
    pub fn refresh(&self) -> DeviceProfile {
        let profile = DeviceProfile::classify(&self.signals.snapshot(), &self.config);
        let previous = std::mem::replace(&mut *self.cached.write(), profile.clone());

        if previous.tier != profile.tier {
            if profile.is_emergency() {
                warn!(thermal = ?profile.thermal, "Entering emergency tier");
            } else {
                info!(from = ?previous.tier, to = ?profile.tier, "Device tier changed");
            }
        } else {
            debug!(tier = ?profile.tier, "Device profile refreshed");
        }
        profile
    }
}
