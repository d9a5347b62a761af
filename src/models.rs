use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRecord {
    pub student_id: i64,
    pub name: String,
    pub class: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttendanceEvent {
    pub student_id: i64,
    pub attendance_percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestEvent {
    pub student_id: i64,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeEvent {
    pub student_id: i64,
    pub pending_amount: f64,
}

/// One roster row after the left join, before classification.
///
/// The sample counts record how many events fed each mean; a zero count
/// means the value is the join default rather than an observation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateRow {
    pub avg_attendance: f64,
    pub attendance_samples: usize,
    pub avg_score: f64,
    pub score_samples: usize,
    pub due_amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RiskStatus {
    Safe,
    #[serde(rename = "At Risk")]
    AtRisk,
}

impl RiskStatus {
    pub fn label(self) -> &'static str {
        match self {
            RiskStatus::Safe => "Safe",
            RiskStatus::AtRisk => "At Risk",
        }
    }
}

impl fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Reason {
    #[serde(rename = "Low Attendance")]
    LowAttendance,
    #[serde(rename = "Excellent Attendance")]
    ExcellentAttendance,
    #[serde(rename = "Low Test Score")]
    LowTestScore,
    #[serde(rename = "Strong Test Score")]
    StrongTestScore,
    #[serde(rename = "Pending Fees")]
    PendingFees,
}

impl Reason {
    pub fn label(self) -> &'static str {
        match self {
            Reason::LowAttendance => "Low Attendance",
            Reason::ExcellentAttendance => "Excellent Attendance",
            Reason::LowTestScore => "Low Test Score",
            Reason::StrongTestScore => "Strong Test Score",
            Reason::PendingFees => "Pending Fees",
        }
    }

    /// False for the informational "Excellent"/"Strong" labels.
    pub fn is_risk(self) -> bool {
        matches!(
            self,
            Reason::LowAttendance | Reason::LowTestScore | Reason::PendingFees
        )
    }
}

pub const NO_ISSUES: &str = "No issues";

/// Ordered reason labels; renders as `"No issues"` when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reasons(pub Vec<Reason>);

impl fmt::Display for Reasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str(NO_ISSUES);
        }
        for (idx, reason) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            f.write_str(reason.label())?;
        }
        Ok(())
    }
}

impl Serialize for Reasons {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentProfile {
    pub student_id: i64,
    pub name: String,
    pub class: Option<String>,
    pub avg_attendance: f64,
    pub avg_score: f64,
    pub due_amount: f64,
    pub status: RiskStatus,
    pub reasons: Reasons,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub safe: usize,
    pub at_risk: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: RiskStatus) {
        match status {
            RiskStatus::Safe => self.safe += 1,
            RiskStatus::AtRisk => self.at_risk += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.safe + self.at_risk
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GradeSummary {
    pub grade: String,
    pub count: usize,
    pub by_status: StatusCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub bins: Vec<HistogramBin>,
}

impl Histogram {
    pub fn total(&self) -> usize {
        self.bins.iter().map(|bin| bin.count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reasons_render_as_no_issues() {
        assert_eq!(Reasons::default().to_string(), "No issues");
    }

    #[test]
    fn reasons_join_in_order() {
        let reasons = Reasons(vec![Reason::LowAttendance, Reason::PendingFees]);
        assert_eq!(reasons.to_string(), "Low Attendance; Pending Fees");
    }

    #[test]
    fn only_negative_labels_are_risks() {
        assert!(Reason::LowAttendance.is_risk());
        assert!(Reason::LowTestScore.is_risk());
        assert!(Reason::PendingFees.is_risk());
        assert!(!Reason::ExcellentAttendance.is_risk());
        assert!(!Reason::StrongTestScore.is_risk());
    }

    #[test]
    fn profile_serializes_display_labels() {
        let profile = StudentProfile {
            student_id: 7,
            name: "Avery Lee".to_string(),
            class: Some("Grade 10".to_string()),
            avg_attendance: 72.5,
            avg_score: 55.0,
            due_amount: 0.0,
            status: RiskStatus::AtRisk,
            reasons: Reasons(vec![Reason::LowAttendance]),
        };
        let value = serde_json::to_value(&profile).unwrap();
        assert_eq!(value["status"], "At Risk");
        assert_eq!(value["reasons"], "Low Attendance");
        assert_eq!(value["class"], "Grade 10");
    }
}
