//! Test Helper Utilities
//!
//! Shared utilities for testing sfg-pipeline

#![allow(dead_code)]

pub mod db_utils;
pub mod fixtures;
pub mod log_capture;

pub use db_utils::{
    create_test_catalog, create_test_orchestrator, get_table_columns, has_column,
    open_test_orchestrator,
};
pub use fixtures::{fake_tool, imu_row, kin_row, seed_files, shot_row, test_scope};
pub use log_capture::LogCapture;
