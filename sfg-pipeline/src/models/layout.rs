//! On-disk layout under the data root folder

use super::asset::Scope;
use std::path::{Path, PathBuf};

/// Resolves catalog, series-store and per-campaign directories
#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    root: PathBuf,
}

impl DirectoryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_db(&self) -> PathBuf {
        self.root.join("catalog.db")
    }

    pub fn timeseries_db(&self) -> PathBuf {
        self.root.join("timeseries.db")
    }

    pub fn campaign_dir(&self, scope: &Scope) -> PathBuf {
        self.root
            .join(&scope.network)
            .join(&scope.station)
            .join(&scope.campaign)
    }

    pub fn raw_dir(&self, scope: &Scope) -> PathBuf {
        self.campaign_dir(scope).join("raw")
    }

    /// Destination for files produced by stage functions
    pub fn intermediate_dir(&self, scope: &Scope) -> PathBuf {
        self.campaign_dir(scope).join("intermediate")
    }

    pub fn logs_dir(&self, scope: &Scope) -> PathBuf {
        self.campaign_dir(scope).join("logs")
    }
}
