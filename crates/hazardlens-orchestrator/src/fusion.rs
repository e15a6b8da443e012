//! Multi-backend result fusion
//!
//! Detections from every backend are clustered: two detections belong to the
//! same hazard when their types are compatible and their boxes overlap with
//! IoU at or above the configured threshold. Clustering is transitive and runs
//! over a canonically sorted candidate list, so the output does not depend on
//! which backend finished first.
//!
//! A cluster confirmed by two or more backends gets the larger of the
//! weighted mean and the best single score, plus the cross-validation bonus,
//! capped at 1.0. Clusters seen by one backend keep their best score.

use crate::config::FusionConfig;
use hazardlens_core::types::clamp_confidence;
use hazardlens_core::{
    BackendId, BackendKind, BoundingBox, Hazard, HazardType, RawDetection, RawDetectionSet,
    Severity, WorkType,
};
use hazardlens_regulations::default_severity;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

struct Candidate<'a> {
    backend: &'a BackendId,
    kind: BackendKind,
    detection: &'a RawDetection,
    severity: Severity,
}

fn box_cmp(a: &BoundingBox, b: &BoundingBox) -> Ordering {
    a.x_min
        .total_cmp(&b.x_min)
        .then(a.y_min.total_cmp(&b.y_min))
        .then(a.x_max.total_cmp(&b.x_max))
        .then(a.y_max.total_cmp(&b.y_max))
}

fn candidate_cmp(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.backend
        .cmp(b.backend)
        .then(a.detection.hazard_type.cmp(&b.detection.hazard_type))
        .then(b.detection.confidence.total_cmp(&a.detection.confidence))
        .then_with(|| box_cmp(&a.detection.bounding_box, &b.detection.bounding_box))
        .then(a.severity.cmp(&b.severity))
}

/// Canonical output order: severity, then confidence, both descending
pub fn hazard_order(a: &Hazard, b: &Hazard) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then(b.confidence.total_cmp(&a.confidence))
        .then(a.hazard_type.cmp(&b.hazard_type))
        .then_with(|| box_cmp(&a.bounding_box, &b.bounding_box))
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // lower index wins, keeping roots stable
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Merges detection sets into one canonical hazard list
#[derive(Debug, Clone, Default)]
pub struct ResultFusionEngine {
    config: FusionConfig,
}

impl ResultFusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse every set into sorted hazards.
    ///
    /// Detections without a backend-provided severity are graded by the
    /// work-type severity rules.
    pub fn fuse(&self, sets: &[RawDetectionSet], work_type: WorkType) -> Vec<Hazard> {
        let mut candidates: Vec<Candidate<'_>> = sets
            .iter()
            .flat_map(|set| {
                set.detections.iter().map(move |detection| Candidate {
                    backend: &set.backend,
                    kind: set.kind,
                    detection,
                    severity: detection
                        .severity
                        .unwrap_or_else(|| default_severity(detection.hazard_type, work_type)),
                })
            })
            .collect();
        candidates.sort_by(candidate_cmp);

        let mut clusters = DisjointSet::new(candidates.len());
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                let (a, b) = (candidates[i].detection, candidates[j].detection);
                if a.hazard_type.is_compatible_with(&b.hazard_type)
                    && a.bounding_box.iou(&b.bounding_box) >= self.config.iou_threshold
                {
                    clusters.union(i, j);
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<&Candidate<'_>>> = BTreeMap::new();
        for i in 0..candidates.len() {
            let root = clusters.find(i);
            groups.entry(root).or_default().push(&candidates[i]);
        }

        let mut hazards: Vec<Hazard> = groups.values().map(|members| self.merge(members)).collect();
        hazards.sort_by(hazard_order);

        debug!(
            sets = sets.len(),
            detections = candidates.len(),
            hazards = hazards.len(),
            "Fused detections"
        );
        hazards
    }

    fn merge(&self, members: &[&Candidate<'_>]) -> Hazard {
        let weights = &self.config.weights;

        // best score per backend
        let mut per_backend: BTreeMap<&BackendId, (f32, BackendKind)> = BTreeMap::new();
        for m in members {
            let entry = per_backend.entry(m.backend).or_insert((0.0, m.kind));
            entry.0 = entry.0.max(m.detection.confidence);
        }

        let best = per_backend.values().map(|(c, _)| *c).fold(0.0f32, f32::max);
        let confidence = if per_backend.len() > 1 {
            let (sum, weight) = per_backend
                .values()
                .fold((0.0f32, 0.0f32), |(sum, weight), (c, kind)| {
                    let w = weights.for_kind(*kind);
                    (sum + c * w, weight + w)
                });
            let mean = if weight > 0.0 { sum / weight } else { best };
            clamp_confidence(mean.max(best) + self.config.cross_validation_bonus)
        } else {
            best
        };

        Hazard {
            hazard_type: dominant_type(members),
            bounding_box: self.merged_box(members),
            confidence,
            severity: members
                .iter()
                .map(|m| m.severity)
                .max()
                .unwrap_or(Severity::Low),
            source_backends: members.iter().map(|m| m.backend.clone()).collect::<BTreeSet<_>>(),
        }
    }

    fn merged_box(&self, members: &[&Candidate<'_>]) -> BoundingBox {
        if let [only] = members {
            return only.detection.bounding_box;
        }

        let mut acc = [0.0f32; 4];
        let mut total = 0.0f32;
        for m in members {
            let w = self.config.weights.for_kind(m.kind) * m.detection.confidence;
            let b = &m.detection.bounding_box;
            for (slot, v) in acc.iter_mut().zip([b.x_min, b.y_min, b.x_max, b.y_max]) {
                *slot += v * w;
            }
            total += w;
        }

        if total <= 0.0 {
            acc = [0.0; 4];
            for m in members {
                let b = &m.detection.bounding_box;
                for (slot, v) in acc.iter_mut().zip([b.x_min, b.y_min, b.x_max, b.y_max]) {
                    *slot += v;
                }
            }
            total = members.len() as f32;
        }

        BoundingBox::clamped(acc[0] / total, acc[1] / total, acc[2] / total, acc[3] / total)
    }
}

/// Most confident specific type, falling back to the most confident generic one
fn dominant_type(members: &[&Candidate<'_>]) -> HazardType {
    let pick = |specific: bool| {
        members
            .iter()
            .filter(|m| m.detection.hazard_type.is_generic() != specific)
            .max_by(|a, b| {
                a.detection
                    .confidence
                    .total_cmp(&b.detection.confidence)
                    .then(b.detection.hazard_type.cmp(&a.detection.hazard_type))
            })
            .map(|m| m.detection.hazard_type)
    };
    pick(true)
        .or_else(|| pick(false))
        .unwrap_or(HazardType::PpeViolation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn det(hazard_type: HazardType, bbox: (f32, f32, f32, f32), confidence: f32) -> RawDetection {
        RawDetection::new(
            "test",
            hazard_type,
            BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3).unwrap(),
            confidence,
        )
    }

    fn set(backend: &str, kind: BackendKind, detections: Vec<RawDetection>) -> RawDetectionSet {
        let mut set = RawDetectionSet::new(BackendId::new(backend), kind);
        set.detections = detections;
        set
    }

    #[test]
    fn test_cross_validated_pair_collapses_with_bonus() {
        // IoU 0.6: [0.0, 0.5] vs [0.125, 0.625] on x, same y span
        let on_device = set(
            "full-npu",
            BackendKind::OnDeviceNpu,
            vec![det(HazardType::MissingHardHat, (0.0, 0.0, 0.5, 0.5), 0.6)],
        );
        let cloud = set(
            "cloud",
            BackendKind::Cloud,
            vec![det(HazardType::MissingHardHat, (0.125, 0.0, 0.625, 0.5), 0.7)],
        );

        let hazards = ResultFusionEngine::default().fuse(&[on_device, cloud], WorkType::default());
        assert_eq!(hazards.len(), 1);
        assert!((hazards[0].confidence - 0.85).abs() < 1e-5);
        assert!(hazards[0].is_cross_validated());
    }

    #[test]
    fn test_single_backend_keeps_confidence() {
        let only = set(
            "lite-cpu",
            BackendKind::OnDeviceCpu,
            vec![
                det(HazardType::FallHazard, (0.1, 0.1, 0.3, 0.3), 0.72),
                det(HazardType::Housekeeping, (0.6, 0.6, 0.9, 0.9), 0.4),
            ],
        );
        let hazards = ResultFusionEngine::default().fuse(&[only], WorkType::default());
        assert_eq!(hazards.len(), 2);
        assert_eq!(hazards[0].hazard_type, HazardType::FallHazard);
        assert_eq!(hazards[0].confidence, 0.72);
        assert_eq!(hazards[0].severity, Severity::Critical);
    }

    #[test]
    fn test_generic_type_yields_to_specific() {
        let a = set(
            "lite-cpu",
            BackendKind::OnDeviceCpu,
            vec![det(HazardType::PpeViolation, (0.2, 0.2, 0.4, 0.6), 0.9)],
        );
        let b = set(
            "cloud",
            BackendKind::Cloud,
            vec![det(HazardType::MissingSafetyVest, (0.2, 0.2, 0.4, 0.6), 0.5)],
        );
        let hazards = ResultFusionEngine::default().fuse(&[a, b], WorkType::Roadwork);
        assert_eq!(hazards.len(), 1);
        assert_eq!(hazards[0].hazard_type, HazardType::MissingSafetyVest);
        assert_eq!(hazards[0].confidence, 1.0);
    }

    #[test]
    fn test_incompatible_types_stay_apart() {
        let a = set(
            "lite-cpu",
            BackendKind::OnDeviceCpu,
            vec![det(HazardType::MissingHardHat, (0.2, 0.2, 0.4, 0.6), 0.8)],
        );
        let b = set(
            "cloud",
            BackendKind::Cloud,
            vec![det(HazardType::MissingSafetyVest, (0.2, 0.2, 0.4, 0.6), 0.8)],
        );
        let hazards = ResultFusionEngine::default().fuse(&[a, b], WorkType::default());
        assert_eq!(hazards.len(), 2);
        assert!(hazards.iter().all(|h| !h.is_cross_validated()));
    }

    #[test]
    fn test_backend_severity_wins_when_higher() {
        let a = set(
            "cloud",
            BackendKind::Cloud,
            vec![det(HazardType::Housekeeping, (0.2, 0.2, 0.4, 0.6), 0.8).with_severity(Severity::High)],
        );
        let hazards = ResultFusionEngine::default().fuse(&[a], WorkType::default());
        assert_eq!(hazards[0].severity, Severity::High);
    }

    #[test]
    fn test_sorted_by_severity_then_confidence() {
        let a = set(
            "lite-cpu",
            BackendKind::OnDeviceCpu,
            vec![
                det(HazardType::Housekeeping, (0.0, 0.0, 0.1, 0.1), 0.99),
                det(HazardType::MissingSafetyVest, (0.2, 0.2, 0.3, 0.3), 0.5),
                det(HazardType::MissingSafetyVest, (0.5, 0.5, 0.6, 0.6), 0.9),
                det(HazardType::ElectricalHazard, (0.7, 0.7, 0.8, 0.8), 0.3),
            ],
        );
        let hazards = ResultFusionEngine::default().fuse(&[a], WorkType::HighRiseConstruction);
        let order: Vec<_> = hazards.iter().map(|h| (h.hazard_type, h.confidence)).collect();
        assert_eq!(
            order,
            vec![
                (HazardType::ElectricalHazard, 0.3),
                (HazardType::MissingSafetyVest, 0.9),
                (HazardType::MissingSafetyVest, 0.5),
                (HazardType::Housekeeping, 0.99),
            ]
        );
    }

    fn arb_detection() -> impl Strategy<Value = RawDetection> {
        (
            prop::sample::select(HazardType::ALL.to_vec()),
            0.0f32..0.6,
            0.0f32..0.6,
            0.05f32..0.4,
            0.05f32..0.4,
            0.0f32..=1.0,
        )
            .prop_map(|(t, x, y, w, h, c)| det(t, (x, y, x + w, y + h), c))
    }

    fn arb_sets() -> impl Strategy<Value = Vec<RawDetectionSet>> {
        (
            prop::collection::vec(arb_detection(), 0..6),
            prop::collection::vec(arb_detection(), 0..6),
        )
            .prop_map(|(a, b)| {
                vec![
                    set("gpu", BackendKind::OnDeviceGpu, a),
                    set("cloud", BackendKind::Cloud, b),
                ]
            })
    }

    proptest! {
        #[test]
        fn prop_independent_of_arrival_order(sets in arb_sets()) {
            let engine = ResultFusionEngine::default();
            let forward = engine.fuse(&sets, WorkType::default());
            let reversed: Vec<_> = sets.iter().rev().cloned().collect();
            prop_assert_eq!(forward, engine.fuse(&reversed, WorkType::default()));
        }

        #[test]
        fn prop_fused_confidence_bounded(sets in arb_sets()) {
            let engine = ResultFusionEngine::default();
            for hazard in engine.fuse(&sets, WorkType::default()) {
                prop_assert!((0.0..=1.0).contains(&hazard.confidence));
            }
        }

        #[test]
        fn prop_overlapping_compatible_pair_is_one_hazard(
            d in arb_detection(),
            c in 0.0f32..=1.0,
            shift in 0.01f32..0.3,
        ) {
            // slide the twin sideways so the pair overlaps partially
            let b = d.bounding_box;
            let dx = (b.x_max - b.x_min) * shift;
            let dx = if b.x_max + dx <= 1.0 { dx } else { -dx };
            let moved = BoundingBox::new(b.x_min + dx, b.y_min, b.x_max + dx, b.y_max).unwrap();
            let overlap = b.iou(&moved);
            prop_assert!((0.5..1.0).contains(&overlap));

            let best = d.confidence.max(clamp_confidence(c));
            let twin = RawDetection::new("twin", d.hazard_type, moved, c);
            let sets = vec![
                set("lite-cpu", BackendKind::OnDeviceCpu, vec![d]),
                set("cloud", BackendKind::Cloud, vec![twin]),
            ];
            let hazards = ResultFusionEngine::default().fuse(&sets, WorkType::default());
            prop_assert_eq!(hazards.len(), 1);
            prop_assert_eq!(hazards[0].source_backends.len(), 2);
            prop_assert!(hazards[0].confidence >= best);
            prop_assert!(hazards[0].confidence <= 1.0);
        }
    }
}
