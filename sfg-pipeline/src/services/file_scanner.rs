//! Raw file discovery and filename classification
//!
//! Directory traversal is sequential; size checks and classification of the
//! candidate list run in parallel.

use crate::models::{Asset, AssetType, Scope};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Ordered filename rules; the first match wins
static CLASSIFICATION_RULES: Lazy<Vec<(Regex, AssetType)>> = Lazy::new(|| {
    [
        (r"\.\d{2}O$", AssetType::Rinex),
        (r"sonardyne", AssetType::Sonardyne),
        (r"novatel.*pin", AssetType::NovatelPin),
        (r"novatel", AssetType::Novatel),
        (r"kin", AssetType::Kin),
        (r"NOV000", AssetType::Novatel000),
        (r"\.\d{2}o$", AssetType::Rinex),
        (r"NOV770", AssetType::Novatel770),
        (r"DFOP00\.raw", AssetType::Dfop00),
        (r"lever_arms", AssetType::LeverArm),
        (r"master", AssetType::Master),
        (r"\.pin$", AssetType::QcPin),
        (r"CTD", AssetType::Ctd),
        (r"svpavg", AssetType::Seabird),
        (r"\.res$", AssetType::KinResiduals),
    ]
    .into_iter()
    .filter_map(|(pattern, asset_type)| match Regex::new(pattern) {
        Ok(re) => Some((re, asset_type)),
        Err(e) => {
            tracing::error!(pattern, error = %e, "Invalid classification pattern");
            None
        }
    })
    .collect()
});

/// Coarse asset kind from a file name
pub fn classify_filename(file_name: &str) -> Option<AssetType> {
    CLASSIFICATION_RULES
        .iter()
        .find(|(re, _)| re.is_match(file_name))
        .map(|(_, asset_type)| *asset_type)
}

/// Outcome of scanning one campaign directory
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Classified, non-empty files as unregistered assets
    pub assets: Vec<Asset>,
    /// Non-empty files no rule recognized
    pub unclassified: Vec<PathBuf>,
    /// Zero-length files left out
    pub empty: Vec<PathBuf>,
}

impl ScanResult {
    pub fn counts_by_type(&self) -> BTreeMap<AssetType, usize> {
        let mut counts = BTreeMap::new();
        for asset in &self.assets {
            *counts.entry(asset.asset_type).or_insert(0) += 1;
        }
        counts
    }
}

enum Classified {
    Asset(Asset),
    Unclassified(PathBuf),
    Empty(PathBuf),
}

pub struct FileScanner {
    ignore_patterns: Vec<String>,
    max_depth: Option<usize>,
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FileScanner {
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "__MACOSX".to_string(),
            ],
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// All regular files under `root`, skipping hidden and ignored entries
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if !root.exists() {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(self.max_depth.unwrap_or(usize::MAX))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || self.should_process_entry(e));

        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Error accessing entry"),
            }
        }

        tracing::debug!(root = %root.display(), files = files.len(), "Directory walk complete");
        Ok(files)
    }

    /// Scan `root` and build local assets for `scope`
    pub fn scan_scope(&self, root: &Path, scope: &Scope) -> Result<ScanResult, ScanError> {
        let files = self.scan(root)?;

        let classified: Vec<Classified> = files
            .into_par_iter()
            .map(|path| {
                let is_empty = match std::fs::metadata(&path) {
                    Ok(meta) => meta.len() == 0,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Cannot stat file");
                        true
                    }
                };
                if is_empty {
                    return Classified::Empty(path);
                }
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                match classify_filename(&name) {
                    Some(asset_type) => {
                        Classified::Asset(Asset::local(scope.clone(), asset_type, path))
                    }
                    None => Classified::Unclassified(path),
                }
            })
            .collect();

        let mut result = ScanResult::default();
        for item in classified {
            match item {
                Classified::Asset(asset) => result.assets.push(asset),
                Classified::Unclassified(path) => result.unclassified.push(path),
                Classified::Empty(path) => result.empty.push(path),
            }
        }

        tracing::info!(
            scope = %scope,
            classified = result.assets.len(),
            unclassified = result.unclassified.len(),
            empty = result.empty.len(),
            "Scan complete"
        );
        Ok(result)
    }

    fn should_process_entry(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return false;
        }
        !self.ignore_patterns.iter().any(|p| name.contains(p.as_str()))
    }
}
