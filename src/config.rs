use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::loader;
use crate::projection::{FlagThresholds, DEFAULT_BINS, DEFAULT_PAGE_SIZE};
use crate::risk::{AnyThresholds, BandedThresholds, RuleKind, RuleSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub sources: SourceFiles,
    /// Extra header synonyms, merged over the built-in rename table.
    pub renames: BTreeMap<String, String>,
    pub rules: RulesConfig,
    /// Cut-offs for the quick filters, separate from the rule thresholds.
    pub flags: FlagThresholds,
    pub histogram_bins: usize,
    pub page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sources: SourceFiles::default(),
            renames: BTreeMap::new(),
            rules: RulesConfig::default(),
            flags: FlagThresholds::default(),
            histogram_bins: DEFAULT_BINS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFiles {
    pub students: String,
    pub attendance: String,
    pub tests: String,
    pub fees: String,
}

impl Default for SourceFiles {
    fn default() -> Self {
        Self {
            students: "students.csv".to_string(),
            attendance: "attendance.csv".to_string(),
            tests: "tests.csv".to_string(),
            fees: "fees.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub kind: RuleKind,
    pub banded: BandedThresholds,
    pub any: AnyThresholds,
}

impl RulesConfig {
    pub fn rule_set(&self) -> RuleSet {
        match self.kind {
            RuleKind::Banded => RuleSet::Banded(self.banded),
            RuleKind::Any => RuleSet::Any(self.any),
        }
    }
}

impl Config {
    /// Built-in defaults, or the TOML file at `path` layered over them.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn source_path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    pub fn rename_map(&self) -> BTreeMap<String, String> {
        let mut renames = loader::default_renames();
        for (from, to) in &self.renames {
            renames.insert(loader::normalize_header(from), to.clone());
        }
        renames
    }
}
