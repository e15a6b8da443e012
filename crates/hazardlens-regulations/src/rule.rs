//! Regulation rules and the built-in OSHA table

use crate::severity::requires_item;
use hazardlens_core::{Error, HazardCategory, HazardType, Result, WorkType};
use serde::{Deserialize, Serialize};

/// Maps one hazard type to the standard it violates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulationRule {
    /// Hazard type this rule applies to
    pub hazard_type: HazardType,

    /// Citation code, e.g. `29 CFR 1926.100(a)`
    pub code: String,

    /// Short title of the standard
    pub title: String,

    /// What the standard requires
    pub description: String,

    /// What the site must do to abate the hazard
    pub corrective_action: String,
}

impl RegulationRule {
    fn osha(
        hazard_type: HazardType,
        section: &str,
        title: &str,
        description: &str,
        corrective_action: &str,
    ) -> Self {
        Self {
            hazard_type,
            code: format!("29 CFR {section}"),
            title: title.to_string(),
            description: description.to_string(),
            corrective_action: corrective_action.to_string(),
        }
    }
}

/// Lookup table of regulation rules, one per hazard type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulationTable {
    pub rules: Vec<RegulationRule>,
}

impl RegulationTable {
    /// The built-in OSHA construction table
    pub fn builtin() -> Self {
        use HazardType::*;

        let rules = vec![
            RegulationRule::osha(
                MissingHardHat,
                "1926.100(a)",
                "Head protection",
                "Employees exposed to falling or flying objects, impact, or electrical shock must wear protective helmets.",
                "Stop work in the area and issue ANSI Z89.1 hard hats to every exposed worker.",
            ),
            RegulationRule::osha(
                MissingSafetyVest,
                "1926.201(a)",
                "High-visibility apparel",
                "Workers exposed to vehicular traffic must wear high-visibility warning garments.",
                "Provide ANSI/ISEA 107 high-visibility vests and enforce them at traffic interfaces.",
            ),
            RegulationRule::osha(
                PpeViolation,
                "1926.95(a)",
                "Personal protective equipment",
                "Protective equipment must be provided, used, and maintained wherever hazards require it.",
                "Perform a PPE hazard assessment and equip workers accordingly.",
            ),
            RegulationRule::osha(
                FallHazard,
                "1926.501(b)(1)",
                "Fall protection: unprotected sides and edges",
                "Employees on walking/working surfaces 6 feet or more above a lower level must be protected from falling.",
                "Install guardrails, safety nets, or personal fall arrest systems before work continues.",
            ),
            RegulationRule::osha(
                ElectricalHazard,
                "1926.416(a)(1)",
                "Electrical: protection of employees",
                "No employee may work near any part of an electric power circuit unless protected against shock.",
                "De-energize and lock out the circuit, or guard it with insulation or barriers.",
            ),
            RegulationRule::osha(
                HeavyMachinery,
                "1926.600(a)(6)",
                "Equipment: general requirements",
                "Equipment must be operated with workers kept clear of swing radius and pinch points.",
                "Barricade the swing radius and assign a spotter for equipment movements.",
            ),
            RegulationRule::osha(
                StruckByVehicle,
                "1926.601(b)(4)",
                "Motor vehicles: backing and obstructed view",
                "Vehicles with an obstructed rear view must have a backup alarm or an observer.",
                "Verify backup alarms and station a signal person where vehicles reverse.",
            ),
            RegulationRule::osha(
                Excavation,
                "1926.652(a)(1)",
                "Excavations: protective systems",
                "Each employee in an excavation must be protected from cave-ins by an adequate protective system.",
                "Remove workers from the trench until shoring, shielding, or sloping is in place.",
            ),
            RegulationRule::osha(
                FireHazard,
                "1926.151(a)",
                "Fire prevention: ignition hazards",
                "Ignition sources must be controlled around flammable materials and fuel.",
                "Remove ignition sources, provide a rated extinguisher, and post a fire watch.",
            ),
            RegulationRule::osha(
                Housekeeping,
                "1926.25(a)",
                "Housekeeping",
                "Scrap and debris must be kept cleared from work areas, passageways, and stairs.",
                "Clear debris from walkways and schedule recurring site cleanup.",
            ),
        ];

        Self { rules }
    }

    /// Load a table from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid regulation table: {e}")))?;
        table.validate()?;
        Ok(table)
    }

    /// Rule for a hazard type
    pub fn rule_for(&self, hazard_type: HazardType) -> Option<&RegulationRule> {
        self.rules.iter().find(|r| r.hazard_type == hazard_type)
    }

    /// Reject tables that map a hazard type twice
    fn validate(&self) -> Result<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            if self.rules[..i].iter().any(|r| r.hazard_type == rule.hazard_type) {
                return Err(Error::config(format!(
                    "hazard type {:?} is mapped more than once",
                    rule.hazard_type
                )));
            }
        }
        Ok(())
    }
}

impl Default for RegulationTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Minimum confidence for a hazard in this category to be cited
pub fn reporting_threshold(category: HazardCategory) -> f32 {
    match category {
        HazardCategory::Ppe => 0.6,
        HazardCategory::Fall => 0.7,
        HazardCategory::Electrical => 0.65,
        HazardCategory::Equipment => 0.6,
        HazardCategory::Excavation => 0.7,
        HazardCategory::Fire => 0.6,
        HazardCategory::General => 0.5,
    }
}

/// Minimum confidence for a hazard to be cited on a site of this work type.
///
/// Mandatory PPE items use their own, stricter threshold.
pub fn reporting_threshold_for(hazard_type: HazardType, work_type: WorkType) -> f32 {
    let item = match hazard_type {
        HazardType::MissingHardHat => Some(0.8),
        HazardType::MissingSafetyVest => Some(0.7),
        _ => None,
    };
    match item {
        Some(threshold) if requires_item(hazard_type, work_type) => threshold,
        _ => reporting_threshold(hazard_type.category()),
    }
}
