//! Coverage record model.
//!
//! Records are the raw line-execution data emitted by the test run: a JSON
//! document mapping source paths to executed and missing line numbers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::{CoverageError, CoverageTotals};

/// Line-execution data for a single source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Lines that executed at least once
    pub executed: Vec<u32>,

    /// Measurable lines that never executed
    pub missing: Vec<u32>,
}

impl FileRecord {
    /// Total measurable statements in the file
    pub fn statements(&self) -> u64 {
        (self.executed.len() + self.missing.len()) as u64
    }

    /// Statements never executed
    pub fn missed(&self) -> u64 {
        self.missing.len() as u64
    }

    /// Covered percentage. Files with no measurable lines count as fully
    /// covered.
    pub fn percent(&self) -> f64 {
        let statements = self.statements();
        if statements == 0 {
            return 100.0;
        }
        let covered = statements - self.missed();
        (covered as f64 / statements as f64) * 100.0
    }
}

/// Coverage records for a whole run.
///
/// Files are keyed by relative source path in a BTreeMap so every renderer
/// sees the same deterministic ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecords {
    pub files: BTreeMap<String, FileRecord>,
}

impl CoverageRecords {
    /// Parse records from JSON
    pub fn from_json(json: &str) -> Result<Self, CoverageError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load records from a file
    pub fn from_file(path: &Path) -> Result<Self, CoverageError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// True when no files were recorded
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Aggregate totals across all files
    pub fn totals(&self) -> CoverageTotals {
        let statements: u64 = self.files.values().map(FileRecord::statements).sum();
        let missed: u64 = self.files.values().map(FileRecord::missed).sum();
        let percent = if statements == 0 {
            100.0
        } else {
            ((statements - missed) as f64 / statements as f64) * 100.0
        };
        CoverageTotals {
            statements,
            missed,
            percent,
        }
    }
}
