use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{
    GradeSummary, Histogram, HistogramBin, RiskStatus, StatusCounts, StudentProfile,
};

pub const DEFAULT_BINS: usize = 10;
pub const DEFAULT_PAGE_SIZE: usize = 15;
pub const UNASSIGNED_GRADE: &str = "Unassigned";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusFilter {
    #[default]
    All,
    Safe,
    AtRisk,
}

impl StatusFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_token(raw).as_str() {
            "all" => Some(StatusFilter::All),
            "safe" => Some(StatusFilter::Safe),
            "at_risk" | "atrisk" => Some(StatusFilter::AtRisk),
            _ => None,
        }
    }

    fn admits(self, status: RiskStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Safe => status == RiskStatus::Safe,
            StatusFilter::AtRisk => status == RiskStatus::AtRisk,
        }
    }
}

/// Quick filters over the aggregated values. They apply the same way under
/// either rule set, independent of which reasons the row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Flag {
    FeesPending,
    LowAttendance,
    LowScores,
}

impl Flag {
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_token(raw).as_str() {
            "fees_pending" | "pending_fees" => Some(Flag::FeesPending),
            "low_attendance" => Some(Flag::LowAttendance),
            "low_scores" | "low_score" | "low_test_score" => Some(Flag::LowScores),
            _ => None,
        }
    }

    fn admits(self, profile: &StudentProfile, thresholds: &FlagThresholds) -> bool {
        match self {
            Flag::FeesPending => profile.due_amount > 0.0,
            Flag::LowAttendance => profile.avg_attendance < thresholds.low_attendance,
            Flag::LowScores => profile.avg_score < thresholds.low_score,
        }
    }
}

/// Strict upper bounds used by the `low_attendance` and `low_scores` flags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagThresholds {
    pub low_attendance: f64,
    pub low_score: f64,
}

impl Default for FlagThresholds {
    fn default() -> Self {
        Self {
            low_attendance: 75.0,
            low_score: 60.0,
        }
    }
}

fn normalize_token(raw: &str) -> String {
    raw.trim().to_lowercase().replace(['-', ' '], "_")
}

/// Inclusive bound on one numeric column. Either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Range {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl Range {
    pub fn new(low: Option<f64>, high: Option<f64>) -> Self {
        Self { low, high }
    }

    /// An inverted or NaN range restricts nothing.
    fn is_active(&self) -> bool {
        if self.low.is_some_and(f64::is_nan) || self.high.is_some_and(f64::is_nan) {
            return false;
        }
        match (self.low, self.high) {
            (None, None) => false,
            (Some(low), Some(high)) => low <= high,
            _ => true,
        }
    }

    fn admits(&self, value: f64) -> bool {
        if !self.is_active() {
            return true;
        }
        self.low.map_or(true, |low| value >= low)
            && self.high.map_or(true, |high| value <= high)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub search: Option<String>,
    pub attendance: Range,
    pub score: Range,
    pub due_amount: Range,
    pub status: StatusFilter,
    pub grades: Vec<String>,
    pub flag: Option<Flag>,
    pub flag_thresholds: FlagThresholds,
}

impl Criteria {
    fn search_needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_lowercase)
    }
}

fn matches(profile: &StudentProfile, criteria: &Criteria, needle: Option<&str>) -> bool {
    if let Some(needle) = needle {
        let hit = profile.student_id.to_string().contains(needle)
            || profile.name.to_lowercase().contains(needle);
        if !hit {
            return false;
        }
    }

    if !criteria.status.admits(profile.status) {
        return false;
    }

    if !criteria.grades.is_empty() {
        let in_selection = profile
            .class
            .as_ref()
            .is_some_and(|class| criteria.grades.iter().any(|grade| grade == class));
        if !in_selection {
            return false;
        }
    }

    if let Some(flag) = criteria.flag {
        if !flag.admits(profile, &criteria.flag_thresholds) {
            return false;
        }
    }

    criteria.attendance.admits(profile.avg_attendance)
        && criteria.score.admits(profile.avg_score)
        && criteria.due_amount.admits(profile.due_amount)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub rows: Vec<StudentProfile>,
    pub status_counts: StatusCounts,
    pub grade_counts: Vec<GradeSummary>,
    pub attendance_histogram: Histogram,
    pub score_histogram: Histogram,
}

/// Stable filter over `profiles` plus the chart summaries for the subset.
pub fn project(profiles: &[StudentProfile], criteria: &Criteria, bins: usize) -> Projection {
    let needle = criteria.search_needle();
    let rows: Vec<StudentProfile> = profiles
        .iter()
        .filter(|profile| matches(profile, criteria, needle.as_deref()))
        .cloned()
        .collect();

    let mut status_counts = StatusCounts::default();
    for row in &rows {
        status_counts.record(row.status);
    }

    Projection {
        status_counts,
        grade_counts: grade_counts(&rows),
        attendance_histogram: histogram(
            rows.iter().map(|r| r.avg_attendance),
            bins,
            0.0,
            100.0,
        ),
        score_histogram: histogram(rows.iter().map(|r| r.avg_score), bins, 0.0, 100.0),
        rows,
    }
}

pub fn grade_counts(rows: &[StudentProfile]) -> Vec<GradeSummary> {
    let mut map: BTreeMap<&str, StatusCounts> = BTreeMap::new();
    for row in rows {
        let grade = row.class.as_deref().unwrap_or(UNASSIGNED_GRADE);
        map.entry(grade).or_default().record(row.status);
    }
    map.into_iter()
        .map(|(grade, by_status)| GradeSummary {
            grade: grade.to_string(),
            count: by_status.total(),
            by_status,
        })
        .collect()
}

/// Equal-width histogram over `[lower, upper]`. Out-of-range values are
/// clamped into the edge bins; `upper` itself lands in the last bin.
pub fn histogram<I>(values: I, bins: usize, lower: f64, upper: f64) -> Histogram
where
    I: IntoIterator<Item = f64>,
{
    let bins = if bins == 0 { DEFAULT_BINS } else { bins };
    let width = (upper - lower) / bins as f64;
    let mut buckets: Vec<HistogramBin> = (0..bins)
        .map(|idx| HistogramBin {
            lower: lower + width * idx as f64,
            upper: lower + width * (idx + 1) as f64,
            count: 0,
        })
        .collect();

    for value in values {
        if !value.is_finite() {
            continue;
        }
        let raw = ((value - lower) / width).floor();
        let idx = if raw <= 0.0 {
            0
        } else {
            (raw as usize).min(bins - 1)
        };
        buckets[idx].count += 1;
    }

    Histogram { bins: buckets }
}

/// Sorted distinct class labels, for the grade selector.
pub fn grade_options(profiles: &[StudentProfile]) -> Vec<String> {
    let mut grades: Vec<String> = profiles.iter().filter_map(|p| p.class.clone()).collect();
    grades.sort();
    grades.dedup();
    grades
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SortKey {
    #[default]
    StudentId,
    Name,
    Class,
    Attendance,
    Score,
    DueAmount,
    Status,
}

pub fn sort_profiles(rows: &mut [StudentProfile], key: SortKey, descending: bool) {
    rows.sort_by(|a, b| {
        let ordering = compare(a, b, key);
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

fn compare(a: &StudentProfile, b: &StudentProfile, key: SortKey) -> Ordering {
    match key {
        SortKey::StudentId => a.student_id.cmp(&b.student_id),
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortKey::Class => a.class.cmp(&b.class),
        SortKey::Attendance => a.avg_attendance.total_cmp(&b.avg_attendance),
        SortKey::Score => a.avg_score.total_cmp(&b.avg_score),
        SortKey::DueAmount => a.due_amount.total_cmp(&b.due_amount),
        SortKey::Status => a.status.cmp(&b.status),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<'a> {
    /// Zero-based, clamped to the last page.
    pub index: usize,
    pub size: usize,
    pub total_pages: usize,
    pub rows: &'a [StudentProfile],
}

pub fn paginate(rows: &[StudentProfile], index: usize, size: usize) -> Page<'_> {
    let size = if size == 0 { DEFAULT_PAGE_SIZE } else { size };
    let total_pages = rows.len().div_ceil(size).max(1);
    let index = index.min(total_pages - 1);
    let start = (index * size).min(rows.len());
    let end = (start + size).min(rows.len());
    Page {
        index,
        size,
        total_pages,
        rows: &rows[start..end],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Reason, Reasons};

    fn profile(
        student_id: i64,
        name: &str,
        class: Option<&str>,
        values: (f64, f64, f64),
        reasons: Vec<Reason>,
    ) -> StudentProfile {
        let (attendance, score, due) = values;
        let status = if reasons.iter().any(|reason| reason.is_risk()) {
            RiskStatus::AtRisk
        } else {
            RiskStatus::Safe
        };
        StudentProfile {
            student_id,
            name: name.to_string(),
            class: class.map(str::to_string),
            avg_attendance: attendance,
            avg_score: score,
            due_amount: due,
            status,
            reasons: Reasons(reasons),
        }
    }

    fn sample() -> Vec<StudentProfile> {
        use Reason::*;
        vec![
            profile(
                101,
                "Avery Lee",
                Some("Grade 9"),
                (70.0, 85.0, 0.0),
                vec![LowAttendance, StrongTestScore],
            ),
            profile(202, "Jules Moreno", Some("Grade 10"), (80.0, 60.0, 0.0), vec![]),
            profile(
                310,
                "Kiara Patel",
                Some("Grade 9"),
                (95.0, 35.0, 500.0),
                vec![ExcellentAttendance, LowTestScore, PendingFees],
            ),
            profile(
                411,
                "Sam Ortiz",
                None,
                (100.0, 100.0, 0.0),
                vec![ExcellentAttendance, StrongTestScore],
            ),
        ]
    }

    fn ids(projection: &Projection) -> Vec<i64> {
        projection.rows.iter().map(|p| p.student_id).collect()
    }

    #[test]
    fn empty_criteria_returns_everything_in_order() {
        let profiles = sample();
        let projection = project(&profiles, &Criteria::default(), DEFAULT_BINS);
        assert_eq!(projection.rows, profiles);
        assert_eq!(projection.status_counts.total(), 4);
    }

    #[test]
    fn search_matches_id_or_name_case_insensitively() {
        let profiles = sample();
        let by_id = Criteria {
            search: Some("31".to_string()),
            ..Criteria::default()
        };
        assert_eq!(ids(&project(&profiles, &by_id, DEFAULT_BINS)), vec![310]);

        let by_name = Criteria {
            search: Some("  moreNO ".to_string()),
            ..Criteria::default()
        };
        assert_eq!(ids(&project(&profiles, &by_name, DEFAULT_BINS)), vec![202]);

        let neither = Criteria {
            search: Some("zzz".to_string()),
            ..Criteria::default()
        };
        assert!(project(&profiles, &neither, DEFAULT_BINS).rows.is_empty());
    }

    #[test]
    fn blank_search_is_no_restriction() {
        let criteria = Criteria {
            search: Some("   ".to_string()),
            ..Criteria::default()
        };
        assert_eq!(project(&sample(), &criteria, DEFAULT_BINS).rows.len(), 4);
    }

    #[test]
    fn criteria_combine_with_and() {
        let criteria = Criteria {
            status: StatusFilter::AtRisk,
            grades: vec!["Grade 9".to_string()],
            score: Range::new(Some(50.0), None),
            ..Criteria::default()
        };
        assert_eq!(ids(&project(&sample(), &criteria, DEFAULT_BINS)), vec![101]);
    }

    #[test]
    fn grade_selection_excludes_unassigned_students() {
        let criteria = Criteria {
            grades: vec!["Grade 10".to_string(), "Grade 9".to_string()],
            ..Criteria::default()
        };
        let selected = ids(&project(&sample(), &criteria, DEFAULT_BINS));
        assert_eq!(selected, vec![101, 202, 310]);
    }

    #[test]
    fn ranges_are_inclusive() {
        let criteria = Criteria {
            attendance: Range::new(Some(80.0), Some(95.0)),
            ..Criteria::default()
        };
        assert_eq!(ids(&project(&sample(), &criteria, DEFAULT_BINS)), vec![202, 310]);
    }

    #[test]
    fn inverted_or_nan_range_is_identity() {
        let inverted = Criteria {
            due_amount: Range::new(Some(100.0), Some(1.0)),
            ..Criteria::default()
        };
        assert_eq!(project(&sample(), &inverted, DEFAULT_BINS).rows.len(), 4);

        let nan = Criteria {
            score: Range::new(Some(f64::NAN), Some(50.0)),
            ..Criteria::default()
        };
        assert_eq!(project(&sample(), &nan, DEFAULT_BINS).rows.len(), 4);
    }

    fn flagged(profiles: &[StudentProfile], flag: Flag, thresholds: FlagThresholds) -> Vec<i64> {
        let criteria = Criteria {
            flag: Some(flag),
            flag_thresholds: thresholds,
            ..Criteria::default()
        };
        ids(&project(profiles, &criteria, DEFAULT_BINS))
    }

    #[test]
    fn flags_select_by_value() {
        let defaults = FlagThresholds::default();
        assert_eq!(flagged(&sample(), Flag::FeesPending, defaults), vec![310]);
        assert_eq!(flagged(&sample(), Flag::LowAttendance, defaults), vec![101]);
        assert_eq!(flagged(&sample(), Flag::LowScores, defaults), vec![310]);
    }

    #[test]
    fn low_scores_flag_ignores_banded_labels() {
        // 50 is a middle-band score: no reason, status Safe
        let middling = vec![profile(
            512,
            "Rae Quinn",
            Some("Grade 10"),
            (80.0, 50.0, 0.0),
            vec![],
        )];
        assert_eq!(middling[0].status, RiskStatus::Safe);
        let defaults = FlagThresholds::default();
        assert_eq!(flagged(&middling, Flag::LowScores, defaults), vec![512]);
        assert!(flagged(&middling, Flag::LowAttendance, defaults).is_empty());
    }

    #[test]
    fn flag_thresholds_are_configurable() {
        let strict = FlagThresholds {
            low_attendance: 85.0,
            low_score: 90.0,
        };
        assert_eq!(flagged(&sample(), Flag::LowAttendance, strict), vec![101, 202]);
        assert_eq!(flagged(&sample(), Flag::LowScores, strict), vec![101, 202, 310]);
    }

    #[test]
    fn summaries_describe_the_filtered_subset() {
        let criteria = Criteria {
            status: StatusFilter::AtRisk,
            ..Criteria::default()
        };
        let projection = project(&sample(), &criteria, DEFAULT_BINS);
        assert_eq!(projection.status_counts, StatusCounts { safe: 0, at_risk: 2 });
        let grades: Vec<(&str, usize)> = projection
            .grade_counts
            .iter()
            .map(|g| (g.grade.as_str(), g.count))
            .collect();
        assert_eq!(grades, vec![("Grade 9", 2)]);
        assert_eq!(projection.attendance_histogram.total(), 2);
    }

    #[test]
    fn histogram_uses_equal_width_bins() {
        let hist = histogram(vec![0.0, 9.99, 10.0, 55.0, 100.0], 10, 0.0, 100.0);
        assert_eq!(hist.bins.len(), 10);
        assert_eq!(hist.bins[0].count, 2);
        assert_eq!(hist.bins[1].count, 1);
        assert_eq!(hist.bins[5].count, 1);
        assert_eq!(hist.bins[9].count, 1);
        assert_eq!(hist.bins[9].upper, 100.0);
    }

    #[test]
    fn status_filter_and_flag_parse_loosely() {
        assert_eq!(StatusFilter::parse("At Risk"), Some(StatusFilter::AtRisk));
        assert_eq!(StatusFilter::parse("at-risk"), Some(StatusFilter::AtRisk));
        assert_eq!(StatusFilter::parse("bogus"), None);
        assert_eq!(Flag::parse("fees_pending"), Some(Flag::FeesPending));
        assert_eq!(Flag::parse("Low Scores"), Some(Flag::LowScores));
    }

    #[test]
    fn grade_options_are_sorted_and_distinct() {
        assert_eq!(grade_options(&sample()), vec!["Grade 10", "Grade 9"]);
    }

    #[test]
    fn sorting_is_explicit_and_stable() {
        let mut rows = sample();
        sort_profiles(&mut rows, SortKey::Score, true);
        let ids: Vec<i64> = rows.iter().map(|p| p.student_id).collect();
        assert_eq!(ids, vec![411, 101, 202, 310]);

        sort_profiles(&mut rows, SortKey::Status, false);
        let ids: Vec<i64> = rows.iter().map(|p| p.student_id).collect();
        assert_eq!(ids, vec![411, 202, 101, 310]);
    }

    #[test]
    fn pagination_clamps_to_last_page() {
        let rows = sample();
        let page = paginate(&rows, 1, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.rows.len(), 1);
        let clamped = paginate(&rows, 9, 3);
        assert_eq!(clamped.index, 1);
        let empty = paginate(&[], 0, 15);
        assert_eq!(empty.total_pages, 1);
        assert!(empty.rows.is_empty());
    }
}
