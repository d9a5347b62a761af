use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::aggregate;
use crate::config::Config;
use crate::loader;
use crate::models::StudentProfile;
use crate::projection::{self, Criteria, Projection};

/// Immutable result of one load cycle. `run_id` and `loaded_at` describe the
/// run and never feed into classification.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub run_id: Uuid,
    pub loaded_at: DateTime<Utc>,
    pub rule_set: &'static str,
    #[serde(skip)]
    pub histogram_bins: usize,
    pub profiles: Arc<[StudentProfile]>,
}

impl Snapshot {
    pub fn project(&self, criteria: &Criteria) -> Projection {
        projection::project(&self.profiles, criteria, self.histogram_bins)
    }

    pub fn grade_options(&self) -> Vec<String> {
        projection::grade_options(&self.profiles)
    }
}

/// Loads every source and builds the classified profiles.
pub fn initialize(config: &Config) -> anyhow::Result<Snapshot> {
    let renames = config.rename_map();
    let sources = &config.sources;

    let students = loader::load(
        &config.source_path(&sources.students),
        &renames,
        loader::ROSTER_COLUMNS,
    )?;
    let attendance = loader::load(
        &config.source_path(&sources.attendance),
        &renames,
        loader::ATTENDANCE_COLUMNS,
    )?;
    let tests = loader::load(
        &config.source_path(&sources.tests),
        &renames,
        loader::TEST_COLUMNS,
    )?;
    let fees = loader::load(
        &config.source_path(&sources.fees),
        &renames,
        loader::FEE_COLUMNS,
    )?;

    let roster = loader::roster(&students).context("failed to read the student roster")?;
    let rules = config.rules.rule_set();
    let profiles = aggregate::build(
        &roster,
        &loader::attendance_events(&attendance),
        &loader::test_events(&tests),
        &loader::fee_events(&fees),
        &rules,
    );

    let snapshot = Snapshot {
        run_id: Uuid::new_v4(),
        loaded_at: Utc::now(),
        rule_set: rules.name(),
        histogram_bins: config.histogram_bins,
        profiles: profiles.into(),
    };
    info!(
        run_id = %snapshot.run_id,
        students = snapshot.profiles.len(),
        rule_set = snapshot.rule_set,
        "snapshot built"
    );
    Ok(snapshot)
}
