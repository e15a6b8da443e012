//! Strategy selection
//!
//! Selection is a pure function of the device profile, the per-call context,
//! backend descriptors and health grades. It yields an [`ExecutionPlan`]: the
//! backends to run first and the ordered chain to fall back through.

use crate::config::AnalysisContext;
use crate::device::{DeviceProfile, DeviceTier};
use crate::performance::HealthGrade;
use hazardlens_core::{
    AnalysisStrategy, AvailabilityState, BackendDescriptor, BackendId, BackendKind, Connectivity,
    Error, IntegrityStatus, Result,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

/// A backend as seen by the selector
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCandidate {
    pub descriptor: BackendDescriptor,
    pub grade: HealthGrade,
}

impl BackendCandidate {
    pub fn new(descriptor: BackendDescriptor, grade: HealthGrade) -> Self {
        Self { descriptor, grade }
    }

    fn id(&self) -> &BackendId {
        &self.descriptor.id
    }

    fn kind(&self) -> BackendKind {
        self.descriptor.kind
    }

    fn in_cooldown(&self) -> bool {
        matches!(self.descriptor.availability, AvailabilityState::Cooldown { .. })
    }
}

/// Backends to invoke for one analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub strategy: AnalysisStrategy,

    /// Invoked first; more than one entry means concurrent fan-out
    pub first_wave: Vec<BackendId>,

    /// Tried one at a time, in order, once the first wave has failed
    pub fallback_chain: Vec<BackendId>,
}

impl ExecutionPlan {
    fn sequential(strategy: AnalysisStrategy, mut order: Vec<BackendId>) -> Option<Self> {
        if order.is_empty() {
            return None;
        }
        let first = order.remove(0);
        Some(Self {
            strategy,
            first_wave: vec![first],
            fallback_chain: order,
        })
    }

    /// Every backend in the plan, in invocation order
    pub fn backends(&self) -> impl Iterator<Item = &BackendId> {
        self.first_wave.iter().chain(self.fallback_chain.iter())
    }

    pub fn is_parallel(&self) -> bool {
        self.first_wave.len() > 1
    }
}

/// Deterministic rollout bucket in `0..100` for a photo
pub fn rollout_bucket(photo_id: &str) -> u8 {
    let digest = Sha256::digest(photo_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 100) as u8
}

/// Whether a backend could run at all on this device in this context
fn is_usable(candidate: &BackendCandidate, profile: &DeviceProfile, ctx: &AnalysisContext) -> bool {
    let d = &candidate.descriptor;
    if d.availability.is_disabled() || d.integrity == IntegrityStatus::Failed {
        return false;
    }
    match d.kind {
        BackendKind::Cloud => ctx.flags.cloud_enabled && ctx.connectivity != Connectivity::Offline,
        kind => {
            let accelerated = match kind {
                BackendKind::OnDeviceGpu => profile.acceleration.gpu,
                BackendKind::OnDeviceNpu => profile.acceleration.npu,
                _ => true,
            };
            accelerated && d.min_memory_mb <= profile.available_memory_mb
        }
    }
}

/// Preference order among on-device backends
fn on_device_order(a: &BackendCandidate, b: &BackendCandidate, tier: DeviceTier) -> Ordering {
    let footprint = |c: &BackendCandidate| (c.descriptor.min_memory_mb, c.kind().resource_rank());
    let by_size = if tier == DeviceTier::HighEnd {
        footprint(b).cmp(&footprint(a))
    } else {
        footprint(a).cmp(&footprint(b))
    };
    b.grade
        .cmp(&a.grade)
        .then(by_size)
        .then_with(|| a.id().cmp(b.id()))
}

fn ids<'a>(candidates: impl IntoIterator<Item = &'a BackendCandidate>) -> Vec<BackendId> {
    candidates.into_iter().map(|c| c.id().clone()).collect()
}

/// Choose a strategy and backend order
pub fn select_plan(
    profile: &DeviceProfile,
    ctx: &AnalysisContext,
    candidates: &[BackendCandidate],
    photo_id: &str,
) -> Result<ExecutionPlan> {
    let usable: Vec<&BackendCandidate> = candidates
        .iter()
        .filter(|c| is_usable(c, profile, ctx))
        .collect();

    if profile.is_emergency() {
        return emergency_plan(&usable);
    }

    let mut on_device: Vec<&BackendCandidate> = usable
        .iter()
        .copied()
        .filter(|c| c.kind().is_on_device() && !c.in_cooldown())
        .collect();
    on_device.sort_by(|a, b| on_device_order(a, b, profile.tier));

    // Last resort only; on-device first
    let mut cooling: Vec<&BackendCandidate> = usable
        .iter()
        .copied()
        .filter(|c| c.in_cooldown())
        .filter(|c| {
            c.kind().is_on_device()
                || !matches!(ctx.connectivity, Connectivity::Offline | Connectivity::Poor)
        })
        .collect();
    cooling.sort_by(|a, b| {
        b.kind()
            .is_on_device()
            .cmp(&a.kind().is_on_device())
            .then_with(|| on_device_order(a, b, profile.tier))
    });

    let cloud: Option<&BackendCandidate> = usable
        .iter()
        .copied()
        .find(|c| c.kind() == BackendKind::Cloud && !c.in_cooldown());

    let no_plan = || {
        Error::NoEligibleBackend(format!(
            "no usable backend for {:?} connectivity on a {:?} device",
            ctx.connectivity, profile.tier
        ))
    };

    // Forced cloud, when reachable
    if ctx.flags.force_cloud {
        if let Some(cloud) = cloud {
            let mut order = vec![cloud.id().clone()];
            if ctx.flags.on_device_fallback_enabled {
                order.extend(ids(on_device.iter().copied()));
                order.extend(ids(cooling.iter().copied()));
            } else {
                order.extend(ids(cooling.iter().copied().filter(|c| !c.kind().is_on_device())));
            }
            return ExecutionPlan::sequential(AnalysisStrategy::CloudOnly, order).ok_or_else(no_plan);
        }
    }

    // Nothing on the handset can run
    if on_device.is_empty() {
        let mut order: Vec<BackendId> = cloud.map(|c| c.id().clone()).into_iter().collect();
        let strategy = if cloud.is_some() {
            AnalysisStrategy::CloudOnly
        } else if cooling.first().is_some_and(|c| c.kind().is_on_device()) {
            AnalysisStrategy::OnDeviceOnly
        } else {
            AnalysisStrategy::CloudOnly
        };
        order.extend(ids(cooling.iter().copied()));
        return ExecutionPlan::sequential(strategy, order).ok_or_else(no_plan);
    }

    let primary = on_device[0];
    let rest = &on_device[1..];

    let on_device_only = || {
        let mut order = ids(on_device.iter().copied());
        order.extend(ids(cooling.iter().copied()));
        ExecutionPlan::sequential(AnalysisStrategy::OnDeviceOnly, order).ok_or_else(no_plan)
    };

    let Some(cloud) = cloud else {
        return on_device_only();
    };

    match ctx.connectivity {
        Connectivity::Offline | Connectivity::Poor => on_device_only(),
        Connectivity::Good
            if profile.tier == DeviceTier::HighEnd
                && ctx.flags.hybrid_enabled
                && rollout_bucket(photo_id) < ctx.flags.hybrid_rollout_percent =>
        {
            let mut fallback_chain = ids(rest.iter().copied());
            fallback_chain.extend(ids(cooling.iter().copied()));
            Ok(ExecutionPlan {
                strategy: AnalysisStrategy::HybridParallel,
                first_wave: vec![primary.id().clone(), cloud.id().clone()],
                fallback_chain,
            })
        }
        Connectivity::Marginal | Connectivity::Good => {
            let mut order = vec![primary.id().clone(), cloud.id().clone()];
            order.extend(ids(rest.iter().copied()));
            order.extend(ids(cooling.iter().copied()));
            ExecutionPlan::sequential(AnalysisStrategy::OnDevicePrimaryWithCloudFallback, order)
                .ok_or_else(no_plan)
        }
    }
}

/// Lightest runnable on-device backend, no fallback
fn emergency_plan(usable: &[&BackendCandidate]) -> Result<ExecutionPlan> {
    let lightest = usable
        .iter()
        .copied()
        .filter(|c| c.kind().is_on_device())
        .min_by(|a, b| {
            a.in_cooldown()
                .cmp(&b.in_cooldown())
                .then(a.descriptor.min_memory_mb.cmp(&b.descriptor.min_memory_mb))
                .then(a.kind().resource_rank().cmp(&b.kind().resource_rank()))
                .then_with(|| a.id().cmp(b.id()))
        })
        .ok_or_else(|| {
            Error::NoEligibleBackend("thermal emergency and no on-device backend can run".into())
        })?;

    Ok(ExecutionPlan {
        strategy: AnalysisStrategy::OnDeviceOnly,
        first_wave: vec![lightest.id().clone()],
        fallback_chain: Vec::new(),
    })
}
