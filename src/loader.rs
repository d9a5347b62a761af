use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{AttendanceEvent, FeeEvent, StudentRecord, TestEvent};

pub const STUDENT_ID: &str = "student_id";
pub const NAME: &str = "name";
pub const CLASS: &str = "class";
pub const ATTENDANCE: &str = "attendance_percentage";
pub const SCORE: &str = "score";
pub const DUE_AMOUNT: &str = "due_amount";

pub const ROSTER_COLUMNS: &[&str] = &[STUDENT_ID, NAME];
pub const ATTENDANCE_COLUMNS: &[&str] = &[STUDENT_ID, ATTENDANCE];
pub const TEST_COLUMNS: &[&str] = &[STUDENT_ID, SCORE];
pub const FEE_COLUMNS: &[&str] = &[STUDENT_ID, DUE_AMOUNT];

/// Value written into back-filled required columns.
const FILL_VALUE: &str = "0";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed source {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error(
        "invalid roster row {row} in {}: student_id {value:?} is not an integer",
        path.display()
    )]
    InvalidRoster {
        path: PathBuf,
        row: usize,
        value: String,
    },
}

/// Synonyms seen across source exports, mapped onto the canonical schema.
pub fn default_renames() -> BTreeMap<String, String> {
    [
        ("id", STUDENT_ID),
        ("full_name", NAME),
        ("student_name", NAME),
        ("grade", CLASS),
        ("attendance", ATTENDANCE),
        ("test_score", SCORE),
        ("pending_amount", DUE_AMOUNT),
        ("amount_due", DUE_AMOUNT),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    origin: PathBuf,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn empty(origin: &Path, columns: &[&str]) -> Self {
        Self {
            origin: origin.to_path_buf(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterates one column's cells; `None` when the column does not exist.
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a str> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| row[idx].as_str()))
    }

    fn backfill(&mut self, required: &[&str]) {
        for name in required {
            if self.column_index(name).is_some() {
                continue;
            }
            debug!(source = %self.origin.display(), column = name, "back-filling missing column");
            self.columns.push(name.to_string());
            for row in self.rows.iter_mut() {
                row.push(FILL_VALUE.to_string());
            }
        }
    }
}

/// Lowercases, trims and snake-cases a header before renaming.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Reads a CSV source into a [`Table`] with canonical column names.
///
/// A missing file yields an empty table with exactly `required` columns. Any
/// parse failure inside an existing file is fatal.
pub fn load(
    path: &Path,
    renames: &BTreeMap<String, String>,
    required: &[&str],
) -> Result<Table, LoadError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(source = %path.display(), "source missing; using an empty table");
            return Ok(Table::empty(path, required));
        }
        Err(source) => {
            return Err(LoadError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let malformed = |source: csv::Error| LoadError::Malformed {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let columns: Vec<String> = reader
        .headers()
        .map_err(malformed)?
        .iter()
        .map(|raw| {
            let header = normalize_header(raw);
            renames.get(&header).cloned().unwrap_or(header)
        })
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(malformed)?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    let mut table = Table {
        origin: path.to_path_buf(),
        columns,
        rows,
    };
    table.backfill(required);
    info!(
        source = %path.display(),
        rows = table.len(),
        columns = table.columns().len(),
        "source loaded"
    );
    Ok(table)
}

/// Numeric coercion with the zero default: unparseable, non-finite and
/// negative inputs all become `0.0`.
pub fn coerce_number(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value,
        _ => 0.0,
    }
}

/// Accepts `12` as well as float-formatted ids such as `12.0`.
pub fn parse_student_id(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Some(id);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

pub fn roster(table: &Table) -> Result<Vec<StudentRecord>, LoadError> {
    let ids = table.column_index(STUDENT_ID);
    let names = table.column_index(NAME);
    let (Some(ids), Some(names)) = (ids, names) else {
        return Ok(Vec::new());
    };
    let classes = table.column_index(CLASS);

    let mut seen = HashSet::new();
    let mut students = Vec::with_capacity(table.len());
    for (row_idx, row) in table.rows.iter().enumerate() {
        let raw_id = &row[ids];
        let student_id = parse_student_id(raw_id).ok_or_else(|| LoadError::InvalidRoster {
            path: table.origin.clone(),
            // header is line 1
            row: row_idx + 2,
            value: raw_id.clone(),
        })?;
        if !seen.insert(student_id) {
            warn!(student_id, "duplicate roster entry ignored");
            continue;
        }
        let class = classes
            .map(|idx| row[idx].trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        students.push(StudentRecord {
            student_id,
            name: row[names].trim().to_string(),
            class,
        });
    }
    Ok(students)
}

pub fn attendance_events(table: &Table) -> Vec<AttendanceEvent> {
    numeric_events(table, ATTENDANCE)
        .into_iter()
        .map(|(student_id, attendance_percentage)| AttendanceEvent {
            student_id,
            attendance_percentage,
        })
        .collect()
}

pub fn test_events(table: &Table) -> Vec<TestEvent> {
    numeric_events(table, SCORE)
        .into_iter()
        .map(|(student_id, score)| TestEvent { student_id, score })
        .collect()
}

pub fn fee_events(table: &Table) -> Vec<FeeEvent> {
    numeric_events(table, DUE_AMOUNT)
        .into_iter()
        .map(|(student_id, pending_amount)| FeeEvent {
            student_id,
            pending_amount,
        })
        .collect()
}

fn numeric_events(table: &Table, value_column: &str) -> Vec<(i64, f64)> {
    let (Some(ids), Some(values)) = (table.column(STUDENT_ID), table.column(value_column)) else {
        return Vec::new();
    };
    let mut skipped = 0usize;
    let events = ids
        .zip(values)
        .filter_map(|(raw_id, raw_value)| match parse_student_id(raw_id) {
            Some(id) => Some((id, coerce_number(raw_value))),
            None => {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        debug!(
            source = %table.origin.display(),
            skipped,
            "skipped events with unusable student_id"
        );
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn missing_source_yields_empty_table_with_required_columns() {
        let dir = tempfile::tempdir().unwrap();
        let table = load(&dir.path().join("fees.csv"), &default_renames(), FEE_COLUMNS).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns(), &["student_id", "due_amount"]);
    }

    #[test]
    fn headers_are_normalized_and_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let body = " Student ID ,Full Name,Grade\n1,Avery Lee,Grade 9\n";
        let path = write_csv(&dir, "students.csv", body);
        let table = load(&path, &default_renames(), ROSTER_COLUMNS).unwrap();
        assert_eq!(table.columns(), &["student_id", "name", "class"]);
    }

    #[test]
    fn absent_required_column_is_zero_filled() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "fees.csv", "student_id,term\n1,spring\n2,fall\n");
        let table = load(&path, &default_renames(), FEE_COLUMNS).unwrap();
        let dues: Vec<&str> = table.column(DUE_AMOUNT).unwrap().collect();
        assert_eq!(dues, vec!["0", "0"]);
    }

    #[test]
    fn ragged_rows_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "tests.csv", "student_id,score\n1,80\n2,70,extra\n");
        let err = load(&path, &default_renames(), TEST_COLUMNS).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn coercion_defaults_to_zero() {
        assert_eq!(coerce_number("81.5"), 81.5);
        assert_eq!(coerce_number(" 40 "), 40.0);
        assert_eq!(coerce_number("n/a"), 0.0);
        assert_eq!(coerce_number(""), 0.0);
        assert_eq!(coerce_number("NaN"), 0.0);
        assert_eq!(coerce_number("-5"), 0.0);
    }

    #[test]
    fn student_ids_accept_float_formatting() {
        assert_eq!(parse_student_id("12"), Some(12));
        assert_eq!(parse_student_id("12.0"), Some(12));
        assert_eq!(parse_student_id("12.5"), None);
        assert_eq!(parse_student_id("abc"), None);
    }

    #[test]
    fn roster_rejects_non_integer_ids_and_drops_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_csv(
            &dir,
            "students.csv",
            "student_id,name,class\n1,Avery,Grade 9\n1,Avery Again,\n2,Jules,\n",
        );
        let table = load(&good, &default_renames(), ROSTER_COLUMNS).unwrap();
        let students = roster(&table).unwrap();
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].name, "Avery");
        assert_eq!(students[1].class, None);

        let bad = write_csv(&dir, "bad.csv", "student_id,name\nx1,Kiara\n");
        let table = load(&bad, &default_renames(), ROSTER_COLUMNS).unwrap();
        let err = roster(&table).unwrap_err();
        assert!(matches!(err, LoadError::InvalidRoster { row: 2, .. }));
    }

    #[test]
    fn events_skip_unjoinable_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "attendance.csv",
            "student_id,date,attendance_percentage\n\
             1,2025-01-01,90\n\
             ,2025-01-08,80\n\
             1,2025-01-15,oops\n",
        );
        let table = load(&path, &default_renames(), ATTENDANCE_COLUMNS).unwrap();
        let events = attendance_events(&table);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].attendance_percentage, 0.0);
    }

    #[test]
    fn events_from_a_table_missing_the_value_column_are_empty() {
        let table = Table::empty(Path::new("tests.csv"), &[STUDENT_ID]);
        assert!(test_events(&table).is_empty());
        assert_eq!(table.column(SCORE).map(|cells| cells.count()), None);
    }
}
