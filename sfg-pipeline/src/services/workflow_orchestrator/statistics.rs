//! Per-stage processing counters

use serde::{Deserialize, Serialize};

/// Counters for one stage of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    /// Units handed to the stage function
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Units, or whole stages, with nothing to do
    pub skipped: usize,
}

impl StageStats {
    pub fn skipped() -> Self {
        Self {
            skipped: 1,
            ..Self::default()
        }
    }

    pub fn record(&mut self, succeeded: bool) {
        if succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} attempted, {} succeeded, {} failed, {} skipped",
            self.attempted, self.succeeded, self.failed, self.skipped
        )
    }
}

/// Counters for a whole run, in stage execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStatistics {
    pub stages: Vec<(String, StageStats)>,
}

impl ProcessingStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: &str, stats: StageStats) {
        match self.stages.iter_mut().find(|(name, _)| name == stage) {
            Some((_, existing)) => *existing = stats,
            None => self.stages.push((stage.to_string(), stats)),
        }
    }

    pub fn get(&self, stage: &str) -> Option<&StageStats> {
        self.stages
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, stats)| stats)
    }

    pub fn total_failed(&self) -> usize {
        self.stages.iter().map(|(_, s)| s.failed).sum()
    }

    pub fn display_lines(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|(name, stats)| format!("{}: {}", name, stats.display_string()))
            .collect()
    }
}
