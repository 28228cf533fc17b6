//! Catalog database access for sfg-pipeline

pub mod assets;
pub mod catalog;
pub mod merge_jobs;

pub use catalog::{reconcile_dependency_graph, CatalogHandler, Registration};
