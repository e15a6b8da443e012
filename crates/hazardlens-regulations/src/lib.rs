//! HazardLens Regulations
//!
//! Pure, deterministic translation of detected hazards into regulatory
//! citations and an overall risk level.
//!
//! - Rules map a hazard type to an OSHA construction standard (29 CFR 1926)
//! - Each hazard category carries a reporting confidence threshold, with
//!   stricter per-item thresholds for PPE the work type makes mandatory
//! - Work type adjusts default severity (e.g. hard hats on general sites)

pub mod mapper;
pub mod rule;
pub mod severity;

pub use mapper::{fine_range, HazardRegulationMapper};
pub use rule::{reporting_threshold, reporting_threshold_for, RegulationRule, RegulationTable};
pub use severity::{default_severity, requires_item};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::mapper::HazardRegulationMapper;
    pub use crate::rule::{RegulationRule, RegulationTable};
    pub use crate::severity::default_severity;
}
