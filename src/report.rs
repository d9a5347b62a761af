use std::fmt::Write;

use crate::models::{Histogram, RiskStatus, StudentProfile};
use crate::projection::{Page, Projection};
use crate::snapshot::Snapshot;

const AT_RISK_LIMIT: usize = 25;

/// At-risk rows with the most triggered reasons first; ties keep input order.
pub fn highest_risk(rows: &[StudentProfile]) -> Vec<&StudentProfile> {
    let mut at_risk: Vec<&StudentProfile> = rows
        .iter()
        .filter(|row| row.status == RiskStatus::AtRisk)
        .collect();
    at_risk.sort_by(|a, b| b.reasons.0.len().cmp(&a.reasons.0.len()));
    at_risk
}

pub fn build_report(snapshot: &Snapshot, scope: Option<&str>, projection: &Projection) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all students");

    let _ = writeln!(output, "# Student Risk Report");
    let _ = writeln!(
        output,
        "Generated for {} from data loaded {} ({} rules)",
        scope_label,
        snapshot.loaded_at.format("%Y-%m-%d %H:%M UTC"),
        snapshot.rule_set
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");

    let counts = projection.status_counts;
    if counts.total() == 0 {
        let _ = writeln!(output, "No students match this filter.");
    } else {
        let _ = writeln!(output, "- Safe: {}", counts.safe);
        let _ = writeln!(output, "- At Risk: {}", counts.at_risk);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Mix");

    if projection.grade_counts.is_empty() {
        let _ = writeln!(output, "No students match this filter.");
    } else {
        for summary in projection.grade_counts.iter() {
            let _ = writeln!(
                output,
                "- {}: {} students ({} at risk)",
                summary.grade, summary.count, summary.by_status.at_risk
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students At Risk");

    let at_risk = highest_risk(&projection.rows);
    if at_risk.is_empty() {
        let _ = writeln!(output, "No students at risk in this selection.");
    } else {
        for row in at_risk.iter().take(AT_RISK_LIMIT) {
            let _ = writeln!(
                output,
                "- {} (#{}, {}): {} | attendance {:.2}%, score {:.2}, due {:.2}",
                row.name,
                row.student_id,
                row.class.as_deref().unwrap_or("unassigned"),
                row.reasons,
                row.avg_attendance,
                row.avg_score,
                row.due_amount
            );
        }
        if at_risk.len() > AT_RISK_LIMIT {
            let _ = writeln!(output, "- ...and {} more", at_risk.len() - AT_RISK_LIMIT);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Attendance Distribution");
    write_histogram(&mut output, &projection.attendance_histogram);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Score Distribution");
    write_histogram(&mut output, &projection.score_histogram);

    output
}

fn write_histogram(output: &mut String, histogram: &Histogram) {
    if histogram.total() == 0 {
        let _ = writeln!(output, "No values in this selection.");
        return;
    }
    for bin in histogram.bins.iter() {
        let _ = writeln!(
            output,
            "- {:>5.1} to {:>5.1}: {}",
            bin.lower, bin.upper, bin.count
        );
    }
}

pub fn render_summary(projection: &Projection) -> String {
    let mut output = String::new();
    let counts = projection.status_counts;
    let _ = writeln!(
        output,
        "{} students: {} safe, {} at risk",
        counts.total(),
        counts.safe,
        counts.at_risk
    );
    for summary in projection.grade_counts.iter() {
        let _ = writeln!(
            output,
            "  {:<12} {:>4} ({} safe, {} at risk)",
            summary.grade, summary.count, summary.by_status.safe, summary.by_status.at_risk
        );
    }
    let _ = writeln!(output, "Attendance:");
    write_bars(&mut output, &projection.attendance_histogram);
    let _ = writeln!(output, "Scores:");
    write_bars(&mut output, &projection.score_histogram);
    output
}

fn write_bars(output: &mut String, histogram: &Histogram) {
    for bin in histogram.bins.iter() {
        let _ = writeln!(
            output,
            "  {:>3.0}-{:<3.0} {:>4} {}",
            bin.lower,
            bin.upper,
            bin.count,
            "#".repeat(bin.count.min(60))
        );
    }
}

pub fn render_table(page: &Page<'_>, total_rows: usize) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:>8}  {:<24} {:<10} {:>8} {:>7} {:>9}  {:<8} Reasons",
        "ID", "Name", "Class", "Attend%", "Score", "Due", "Status"
    );
    for row in page.rows {
        let _ = writeln!(
            output,
            "{:>8}  {:<24} {:<10} {:>8.2} {:>7.2} {:>9.2}  {:<8} {}",
            row.student_id,
            truncate(&row.name, 24),
            truncate(row.class.as_deref().unwrap_or("-"), 10),
            row.avg_attendance,
            row.avg_score,
            row.due_amount,
            row.status.label(),
            row.reasons
        );
    }
    let _ = writeln!(
        output,
        "Page {} of {} ({} matching students)",
        page.index + 1,
        page.total_pages,
        total_rows
    );
    output
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut cut: String = value.chars().take(width.saturating_sub(1)).collect();
        cut.push('~');
        cut
    }
}
