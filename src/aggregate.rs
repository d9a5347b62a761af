use std::collections::HashMap;

use crate::models::{
    AggregateRow, AttendanceEvent, FeeEvent, StudentProfile, StudentRecord, TestEvent,
};
use crate::risk::RuleSet;

#[derive(Debug, Clone, Copy, Default)]
struct Mean {
    total: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

pub fn mean_by_student<I>(events: I) -> HashMap<i64, (f64, usize)>
where
    I: IntoIterator<Item = (i64, f64)>,
{
    let mut groups: HashMap<i64, Mean> = HashMap::new();
    for (student_id, value) in events {
        groups.entry(student_id).or_default().push(value);
    }
    groups
        .into_iter()
        .map(|(student_id, mean)| (student_id, (mean.value(), mean.count)))
        .collect()
}

pub fn max_by_student<I>(events: I) -> HashMap<i64, f64>
where
    I: IntoIterator<Item = (i64, f64)>,
{
    let mut groups: HashMap<i64, f64> = HashMap::new();
    for (student_id, value) in events {
        let entry = groups.entry(student_id).or_insert(value);
        if value > *entry {
            *entry = value;
        }
    }
    groups
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Zero for anything non-finite or negative.
fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Left-joins the three per-student aggregates onto the roster and classifies
/// every row. Output order follows the roster.
pub fn build(
    roster: &[StudentRecord],
    attendance: &[AttendanceEvent],
    tests: &[TestEvent],
    fees: &[FeeEvent],
    rules: &RuleSet,
) -> Vec<StudentProfile> {
    let attendance = mean_by_student(
        attendance
            .iter()
            .map(|event| (event.student_id, event.attendance_percentage)),
    );
    let scores = mean_by_student(tests.iter().map(|event| (event.student_id, event.score)));
    let dues = max_by_student(fees.iter().map(|event| (event.student_id, event.pending_amount)));

    roster
        .iter()
        .map(|student| {
            let (avg_attendance, attendance_samples) =
                attendance.get(&student.student_id).copied().unwrap_or((0.0, 0));
            let (avg_score, score_samples) =
                scores.get(&student.student_id).copied().unwrap_or((0.0, 0));
            let due_amount = dues.get(&student.student_id).copied().unwrap_or(0.0);

            let row = AggregateRow {
                avg_attendance: sanitize(avg_attendance),
                attendance_samples,
                avg_score: sanitize(avg_score),
                score_samples,
                due_amount: sanitize(due_amount),
            };
            let (status, reasons) = rules.classify(&row);

            StudentProfile {
                student_id: student.student_id,
                name: student.name.clone(),
                class: student.class.clone(),
                avg_attendance: round2(row.avg_attendance),
                avg_score: round2(row.avg_score),
                due_amount: round2(row.due_amount),
                status,
                reasons,
            }
        })
        .collect()
}
