//! Pipeline configuration (`[pipeline]` table of the shared TOML file)

use crate::error::{PipelineError, PipelineResult};
use crate::fusion::FusionConfig;
use serde::{Deserialize, Serialize};
use sfg_common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// External programs a stage may need
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSlot {
    NovaDecoder,
    RinexBuilder,
    PrideSolver,
    Dfop00Decoder,
    SvpBuilder,
}

impl ToolSlot {
    /// Program looked up on PATH when no explicit path is configured
    pub fn default_program(&self) -> &'static str {
        match self {
            ToolSlot::NovaDecoder => "nova2tile",
            ToolSlot::RinexBuilder => "tdb2rnx",
            ToolSlot::PrideSolver => "pdp3",
            ToolSlot::Dfop00Decoder => "dfop00_decoder",
            ToolSlot::SvpBuilder => "svp_builder",
        }
    }

    pub fn config_key(&self) -> &'static str {
        match self {
            ToolSlot::NovaDecoder => "nova_decoder",
            ToolSlot::RinexBuilder => "rinex_builder",
            ToolSlot::PrideSolver => "pride_solver",
            ToolSlot::Dfop00Decoder => "dfop00_decoder",
            ToolSlot::SvpBuilder => "svp_builder",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub nova_decoder: Option<PathBuf>,
    pub rinex_builder: Option<PathBuf>,
    pub pride_solver: Option<PathBuf>,
    pub dfop00_decoder: Option<PathBuf>,
    pub svp_builder: Option<PathBuf>,
    /// Extra arguments per stage name, placed before `--output-dir`
    pub extra_args: BTreeMap<String, Vec<String>>,
}

impl ToolsConfig {
    pub fn configured(&self, slot: ToolSlot) -> Option<&Path> {
        match slot {
            ToolSlot::NovaDecoder => self.nova_decoder.as_deref(),
            ToolSlot::RinexBuilder => self.rinex_builder.as_deref(),
            ToolSlot::PrideSolver => self.pride_solver.as_deref(),
            ToolSlot::Dfop00Decoder => self.dfop00_decoder.as_deref(),
            ToolSlot::SvpBuilder => self.svp_builder.as_deref(),
        }
    }

    pub fn args_for(&self, stage: &str) -> Vec<String> {
        self.extra_args.get(stage).cloned().unwrap_or_default()
    }

    /// Locate the program for `slot`
    ///
    /// A configured path must point at an existing file; otherwise the default
    /// program name must be found on PATH.
    pub fn resolve(&self, slot: ToolSlot) -> PipelineResult<PathBuf> {
        if let Some(path) = self.configured(slot) {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(PipelineError::Configuration(format!(
                "{} is set to {} but no such file exists",
                slot.config_key(),
                path.display()
            )));
        }

        find_on_path(slot.default_program()).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "{} not found on PATH; set [pipeline.tools] {}",
                slot.default_program(),
                slot.config_key()
            ))
        })
    }
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn default_workers() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker pool size for one-to-one stages
    #[serde(default = "default_workers")]
    pub n_workers: usize,
    /// Re-run every stage regardless of catalog state
    pub override_all: bool,
    /// Re-run only the named stages
    pub override_stages: BTreeSet<String>,
    pub tools: ToolsConfig,
    pub fusion: FusionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            n_workers: default_workers(),
            override_all: false,
            override_stages: BTreeSet::new(),
            tools: ToolsConfig::default(),
            fusion: FusionConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    pipeline: PipelineConfig,
}

impl PipelineConfig {
    pub fn overrides(&self, stage: &str) -> bool {
        self.override_all || self.override_stages.contains(stage)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.n_workers == 0 {
            return Err(PipelineError::Configuration(
                "n_workers must be at least 1".to_string(),
            ));
        }
        self.fusion
            .validate()
            .map_err(|e| PipelineError::Configuration(e.to_string()))
    }

    /// Read the `[pipeline]` table; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using pipeline defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str::<ConfigFile>(content).map(|file| file.pipeline)
    }
}
