use serde::{Deserialize, Serialize};

use crate::models::{AggregateRow, Reason, Reasons, RiskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Ordered per-field bands with informational labels.
    #[default]
    Banded,
    /// A single OR over the three risk triggers.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandedThresholds {
    pub low_attendance: f64,
    pub excellent_attendance: f64,
    pub low_score: f64,
    pub strong_score: f64,
}

impl Default for BandedThresholds {
    fn default() -> Self {
        Self {
            low_attendance: 75.0,
            excellent_attendance: 90.0,
            low_score: 40.0,
            strong_score: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnyThresholds {
    pub low_attendance: f64,
    pub low_score: f64,
}

impl Default for AnyThresholds {
    fn default() -> Self {
        Self {
            low_attendance: 75.0,
            low_score: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleSet {
    Banded(BandedThresholds),
    Any(AnyThresholds),
}

impl Default for RuleSet {
    fn default() -> Self {
        RuleSet::Banded(BandedThresholds::default())
    }
}

impl RuleSet {
    pub fn name(&self) -> &'static str {
        match self {
            RuleSet::Banded(_) => "banded",
            RuleSet::Any(_) => "any",
        }
    }

    pub fn classify(&self, row: &AggregateRow) -> (RiskStatus, Reasons) {
        match self {
            RuleSet::Banded(thresholds) => classify_banded(row, thresholds),
            RuleSet::Any(thresholds) => classify_any(row, thresholds),
        }
    }
}

/// Evaluates attendance, then score, then fees. Within a field the low and
/// high bands are exclusive. The informational labels are reported but only
/// a negative label marks the row at risk. Attendance and score bands only
/// apply to students with observations.
pub fn classify_banded(
    row: &AggregateRow,
    thresholds: &BandedThresholds,
) -> (RiskStatus, Reasons) {
    let mut reasons = Vec::new();

    if row.attendance_samples > 0 {
        if row.avg_attendance < thresholds.low_attendance {
            reasons.push(Reason::LowAttendance);
        } else if row.avg_attendance >= thresholds.excellent_attendance {
            reasons.push(Reason::ExcellentAttendance);
        }
    }

    if row.score_samples > 0 {
        if row.avg_score < thresholds.low_score {
            reasons.push(Reason::LowTestScore);
        } else if row.avg_score >= thresholds.strong_score {
            reasons.push(Reason::StrongTestScore);
        }
    }

    if row.due_amount > 0.0 {
        reasons.push(Reason::PendingFees);
    }

    finish(reasons)
}

pub fn classify_any(row: &AggregateRow, thresholds: &AnyThresholds) -> (RiskStatus, Reasons) {
    let mut reasons = Vec::new();

    // defaults of 0 count here, so a student with no rows for a field trips it
    if row.avg_attendance < thresholds.low_attendance {
        reasons.push(Reason::LowAttendance);
    }
    if row.avg_score < thresholds.low_score {
        reasons.push(Reason::LowTestScore);
    }
    if row.due_amount > 0.0 {
        reasons.push(Reason::PendingFees);
    }

    finish(reasons)
}

fn finish(reasons: Vec<Reason>) -> (RiskStatus, Reasons) {
    let status = if reasons.iter().any(|reason| reason.is_risk()) {
        RiskStatus::AtRisk
    } else {
        RiskStatus::Safe
    };
    (status, Reasons(reasons))
}
