//! Pipeline services: ingestion, stage functions and orchestration

pub mod file_scanner;
pub mod stages;
pub mod workflow_orchestrator;

pub use file_scanner::{classify_filename, FileScanner, ScanResult};
pub use stages::{StageContext, StageFunction, StageOutput, STAGES};
pub use workflow_orchestrator::{PipelineOrchestrator, ProcessingStatistics, StageStats};
