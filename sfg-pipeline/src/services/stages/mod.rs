//! Stage functions and the static stage table
//!
//! A stage function turns local input files into derived artifacts and/or
//! time-series rows. It never touches the catalog: the orchestrator records
//! whatever the function returns.

pub mod external_tool;
pub mod kin_parser;

pub use external_tool::ExternalTool;
pub use kin_parser::KinFileParser;

use crate::config::ToolSlot;
use crate::error::ToolError;
use crate::models::{Asset, AssetType, Scope, SeriesKind};
use crate::timeseries::SeriesBatch;
use std::path::PathBuf;

/// Where a stage invocation runs and writes
#[derive(Debug, Clone)]
pub struct StageContext {
    pub scope: Scope,
    pub output_dir: PathBuf,
}

/// What one invocation produced
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// Derived files, not yet catalogued
    pub assets: Vec<Asset>,
    pub rows: Option<SeriesBatch>,
}

impl StageOutput {
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty() && self.rows.as_ref().map_or(true, |r| r.is_empty())
    }
}

/// Pure, blocking transformation from input files to products
pub trait StageFunction: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, inputs: &[Asset], ctx: &StageContext) -> Result<StageOutput, ToolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// One invocation per parent
    Single,
    /// One invocation over every parent of the scope
    Merge,
}

/// How a stage's work is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Tool(ToolSlot),
    KinParser,
    /// Shot refinement over the time-series store
    Fusion,
}

#[derive(Debug, Clone, Copy)]
pub struct StageDescriptor {
    pub name: &'static str,
    pub parents: &'static [AssetType],
    /// File kinds the stage registers; empty for row-only stages
    pub children: &'static [AssetType],
    pub kind: StageKind,
    pub rows: Option<SeriesKind>,
    pub driver: Driver,
    /// Register products with `add_entry` instead of `add_or_update`
    pub insert_only: bool,
}

impl StageDescriptor {
    /// Child type used to decide whether a parent still needs work
    pub fn completion_child(&self) -> Option<AssetType> {
        self.children.first().copied()
    }
}

/// Every stage in execution order
pub static STAGES: [StageDescriptor; 8] = [
    StageDescriptor {
        name: "decode_novatel_770",
        parents: &[AssetType::Novatel770],
        children: &[AssetType::GnssObsTdb],
        kind: StageKind::Merge,
        rows: None,
        driver: Driver::Tool(ToolSlot::NovaDecoder),
        insert_only: false,
    },
    StageDescriptor {
        name: "decode_novatel_000",
        parents: &[AssetType::Novatel000],
        children: &[AssetType::GnssObsTdb],
        kind: StageKind::Merge,
        rows: Some(SeriesKind::ImuPosition),
        driver: Driver::Tool(ToolSlot::NovaDecoder),
        insert_only: false,
    },
    StageDescriptor {
        name: "build_rinex",
        parents: &[AssetType::GnssObsTdb],
        children: &[AssetType::Rinex],
        kind: StageKind::Merge,
        rows: None,
        driver: Driver::Tool(ToolSlot::RinexBuilder),
        insert_only: true,
    },
    StageDescriptor {
        name: "solve_rinex",
        parents: &[AssetType::Rinex],
        children: &[AssetType::Kin, AssetType::KinResiduals],
        kind: StageKind::Single,
        rows: None,
        driver: Driver::Tool(ToolSlot::PrideSolver),
        insert_only: false,
    },
    StageDescriptor {
        name: "ingest_kin",
        parents: &[AssetType::Kin],
        children: &[],
        kind: StageKind::Single,
        rows: Some(SeriesKind::KinPosition),
        driver: Driver::KinParser,
        insert_only: false,
    },
    StageDescriptor {
        name: "decode_dfop00",
        parents: &[AssetType::Dfop00],
        children: &[],
        kind: StageKind::Single,
        rows: Some(SeriesKind::ShotData),
        driver: Driver::Tool(ToolSlot::Dfop00Decoder),
        insert_only: false,
    },
    StageDescriptor {
        name: "refine_shotdata",
        parents: &[AssetType::KinPosition],
        children: &[AssetType::ShotData],
        kind: StageKind::Merge,
        rows: Some(SeriesKind::ShotData),
        driver: Driver::Fusion,
        insert_only: false,
    },
    StageDescriptor {
        name: "build_svp",
        parents: &[AssetType::Ctd, AssetType::Seabird],
        children: &[AssetType::Svp],
        kind: StageKind::Single,
        rows: None,
        driver: Driver::Tool(ToolSlot::SvpBuilder),
        insert_only: false,
    },
];

pub fn find_stage(name: &str) -> Option<&'static StageDescriptor> {
    STAGES.iter().find(|s| s.name == name)
}

pub fn stage_names() -> Vec<&'static str> {
    STAGES.iter().map(|s| s.name).collect()
}
