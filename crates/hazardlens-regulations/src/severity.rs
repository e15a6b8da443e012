//! Default hazard severity by work type

use hazardlens_core::{HazardType, Severity, WorkType};

/// Severity assigned to a hazard whose backend did not grade it.
///
/// PPE that is mandatory for the work type escalates one level.
pub fn default_severity(hazard_type: HazardType, work_type: WorkType) -> Severity {
    let base = match hazard_type {
        HazardType::FallHazard | HazardType::ElectricalHazard | HazardType::Excavation => {
            Severity::Critical
        }
        HazardType::MissingHardHat
        | HazardType::HeavyMachinery
        | HazardType::StruckByVehicle
        | HazardType::FireHazard => Severity::High,
        HazardType::MissingSafetyVest | HazardType::PpeViolation => Severity::Medium,
        HazardType::Housekeeping => Severity::Low,
    };

    if requires_item(hazard_type, work_type) {
        base.escalate()
    } else {
        base
    }
}

/// Whether the work type makes the missing PPE item mandatory
pub fn requires_item(hazard_type: HazardType, work_type: WorkType) -> bool {
    match hazard_type {
        HazardType::MissingHardHat => matches!(
            work_type,
            WorkType::GeneralConstruction | WorkType::HighRiseConstruction
        ),
        HazardType::MissingSafetyVest => {
            matches!(work_type, WorkType::Roadwork | WorkType::GeneralConstruction)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_hat_escalates_where_required() {
        assert_eq!(
            default_severity(HazardType::MissingHardHat, WorkType::GeneralConstruction),
            Severity::Critical
        );
        assert_eq!(
            default_severity(HazardType::MissingHardHat, WorkType::Electrical),
            Severity::High
        );
    }

    #[test]
    fn test_vest_escalates_on_roadwork() {
        assert_eq!(
            default_severity(HazardType::MissingSafetyVest, WorkType::Roadwork),
            Severity::High
        );
        assert_eq!(
            default_severity(HazardType::MissingSafetyVest, WorkType::Roofing),
            Severity::Medium
        );
    }

    #[test]
    fn test_fall_hazard_is_critical_everywhere() {
        assert_eq!(
            default_severity(HazardType::FallHazard, WorkType::Demolition),
            Severity::Critical
        );
    }
}
