//! Data models for the processing pipeline

pub mod asset;
pub mod layout;
pub mod merge_job;

pub use asset::{graph_fingerprint, Asset, AssetState, AssetType, Scope, SeriesKind};
pub use layout::DirectoryLayout;
pub use merge_job::{MergeJob, MergeKey, MERGE_KEY_DELIMITER};
