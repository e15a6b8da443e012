//! Hazard to regulation mapping

use hazardlens_core::{Hazard, RegulationViolation, RiskLevel, Severity, WorkType};
use tracing::debug;

use crate::rule::{reporting_threshold_for, RegulationTable};

/// Penalty range quoted for a violation of the given severity
pub fn fine_range(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "Up to $16,131 per other-than-serious violation",
        Severity::Medium => "$1,190 - $16,131 per serious violation",
        Severity::High => "$1,190 - $16,131 per serious violation; citation likely",
        Severity::Critical => "$11,524 - $161,323 per willful or repeated violation",
    }
}

/// Deterministic mapper from hazards to citations
///
/// Holds only the immutable rule table; identical input always yields
/// identical output regardless of hazard order.
#[derive(Debug, Clone, Default)]
pub struct HazardRegulationMapper {
    table: RegulationTable,
}

impl HazardRegulationMapper {
    /// Mapper over the built-in OSHA table
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapper over a custom table
    pub fn with_table(table: RegulationTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RegulationTable {
        &self.table
    }

    /// Citations for every hazard that meets its reporting threshold on a
    /// site of `work_type`.
    ///
    /// Several hazards citing the same code collapse into one violation at
    /// the worst severity. Output is ordered by severity descending, then code.
    pub fn map(&self, hazards: &[Hazard], work_type: WorkType) -> Vec<RegulationViolation> {
        let mut violations: Vec<RegulationViolation> = Vec::new();

        for hazard in hazards {
            let threshold = reporting_threshold_for(hazard.hazard_type, work_type);
            if hazard.confidence < threshold {
                debug!(
                    hazard_type = ?hazard.hazard_type,
                    confidence = hazard.confidence,
                    threshold,
                    "Hazard below reporting threshold"
                );
                continue;
            }

            let Some(rule) = self.table.rule_for(hazard.hazard_type) else {
                debug!(hazard_type = ?hazard.hazard_type, "No regulation mapped");
                continue;
            };

            match violations.iter_mut().find(|v| v.code == rule.code) {
                Some(existing) if hazard.severity > existing.severity => {
                    existing.severity = hazard.severity;
                    existing.fine_range = fine_range(hazard.severity).to_string();
                    existing.hazard_type = hazard.hazard_type;
                }
                Some(_) => {}
                None => violations.push(RegulationViolation {
                    code: rule.code.clone(),
                    title: rule.title.clone(),
                    description: rule.description.clone(),
                    severity: hazard.severity,
                    fine_range: fine_range(hazard.severity).to_string(),
                    corrective_action: rule.corrective_action.clone(),
                    hazard_type: hazard.hazard_type,
                }),
            }
        }

        violations.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.code.cmp(&b.code)));
        violations
    }

    /// Worst severity across all hazards
    pub fn aggregate_severity(&self, hazards: &[Hazard]) -> Option<Severity> {
        hazards.iter().map(|h| h.severity).max()
    }

    /// Overall site risk from the worst hazard severity
    pub fn overall_risk(&self, hazards: &[Hazard]) -> RiskLevel {
        RiskLevel::from_severity(self.aggregate_severity(hazards))
    }
}
