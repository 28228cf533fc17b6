//! Stage function backed by an external program
//!
//! Invocation: `<program> [args] --output-dir <dir> <inputs...>`. Files that
//! appear in the output directory are the products; row-producing tools print
//! newline-delimited JSON on stdout.

use super::{StageContext, StageFunction, StageOutput};
use crate::error::ToolError;
use crate::models::{Asset, AssetType, SeriesKind};
use crate::services::file_scanner::classify_filename;
use crate::timeseries::SeriesBatch;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ExternalTool {
    stage: String,
    program: PathBuf,
    args: Vec<String>,
    children: &'static [AssetType],
    rows: Option<SeriesKind>,
}

impl ExternalTool {
    pub fn new(
        stage: impl Into<String>,
        program: impl Into<PathBuf>,
        args: Vec<String>,
        children: &'static [AssetType],
        rows: Option<SeriesKind>,
    ) -> Self {
        Self {
            stage: stage.into(),
            program: program.into(),
            args,
            children,
            rows,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Kind of a produced file, restricted to this stage's children
    ///
    /// Names no rule recognizes fall to the only child kind when there is one.
    fn classify_product(&self, path: &Path) -> Option<AssetType> {
        let name = path.file_name()?.to_string_lossy();
        match classify_filename(&name) {
            Some(kind) if self.children.contains(&kind) => Some(kind),
            _ if self.children.len() == 1 => Some(self.children[0]),
            _ => None,
        }
    }
}

fn list_entries(dir: &Path) -> Result<BTreeSet<PathBuf>, ToolError> {
    let mut entries = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        entries.insert(entry?.path());
    }
    Ok(entries)
}

impl StageFunction for ExternalTool {
    fn name(&self) -> &str {
        &self.stage
    }

    fn run(&self, inputs: &[Asset], ctx: &StageContext) -> Result<StageOutput, ToolError> {
        let input_paths: Vec<&Path> = inputs
            .iter()
            .map(|asset| {
                asset.local_path.as_deref().ok_or_else(|| {
                    ToolError::InvalidInput(format!(
                        "{} asset {:?} has no local file",
                        asset.asset_type, asset.id
                    ))
                })
            })
            .collect::<Result<_, _>>()?;
        if input_paths.is_empty() {
            return Err(ToolError::InvalidInput(format!("{}: no inputs", self.stage)));
        }

        std::fs::create_dir_all(&ctx.output_dir)?;
        let before = list_entries(&ctx.output_dir)?;

        debug!(
            stage = %self.stage,
            program = %self.program.display(),
            inputs = input_paths.len(),
            output_dir = %ctx.output_dir.display(),
            "Running external tool"
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--output-dir")
            .arg(&ctx.output_dir)
            .args(&input_paths)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ToolError::Spawn {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ToolError::ExitStatus {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let after = list_entries(&ctx.output_dir)?;
        let mut assets = Vec::new();
        for path in after.difference(&before) {
            match self.classify_product(path) {
                Some(kind) => assets.push(Asset::local(ctx.scope.clone(), kind, path.clone())),
                None => warn!(
                    stage = %self.stage,
                    path = %path.display(),
                    "Unrecognized tool product ignored"
                ),
            }
        }

        let rows = match self.rows {
            Some(kind) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let batch = SeriesBatch::from_ndjson(kind, &stdout)
                    .map_err(|message| ToolError::parse(&self.program, message))?;
                Some(batch)
            }
            None => None,
        };

        let produced = StageOutput { assets, rows };
        if produced.is_empty() {
            return Err(ToolError::NoOutput(format!(
                "{} on {} input(s)",
                self.stage,
                input_paths.len()
            )));
        }
        Ok(produced)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::Scope;
    use serial_test::serial;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    // Scripts rely on PATH, which one config test swaps out
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn input(dir: &Path, name: &str) -> Asset {
        let path = dir.join(name);
        std::fs::write(&path, b"raw").unwrap();
        let mut asset = Asset::local(Scope::new("net1", "st1", "camp1"), AssetType::Rinex, path);
        asset.id = Some(1);
        asset
    }

    fn context(dir: &Path) -> StageContext {
        StageContext {
            scope: Scope::new("net1", "st1", "camp1"),
            output_dir: dir.join("out"),
        }
    }

    #[test]
    #[serial]
    fn test_new_files_become_children() {
        let dir = TempDir::new().unwrap();
        // $2 is the output directory
        let tool = script(
            dir.path(),
            "solver",
            r#"touch "$2/kin_2024153_st1" "$2/res_2024153_st1.res""#,
        );
        let stage = ExternalTool::new(
            "solve_rinex",
            tool,
            Vec::new(),
            &[AssetType::Kin, AssetType::KinResiduals],
            None,
        );

        let out = stage
            .run(&[input(dir.path(), "st11530.24o")], &context(dir.path()))
            .unwrap();
        let mut kinds: Vec<AssetType> = out.assets.iter().map(|a| a.asset_type).collect();
        kinds.sort();
        assert_eq!(kinds, vec![AssetType::Kin, AssetType::KinResiduals]);
        assert!(out.rows.is_none());
    }

    #[test]
    #[serial]
    fn test_rows_parsed_from_stdout() {
        let dir = TempDir::new().unwrap();
        let row = r#"{"transponder_id":"5209","ping_time":"2024-06-01T00:00:00Z","return_time":"2024-06-01T00:00:04Z","travel_time":4.0,"east0":1.0,"north0":2.0,"up0":3.0,"east1":1.0,"north1":2.0,"up1":3.0}"#;
        let tool = script(dir.path(), "decoder", &format!("echo '{}'", row));
        let stage = ExternalTool::new("decode_dfop00", tool, Vec::new(), &[], Some(SeriesKind::ShotData));

        let out = stage
            .run(&[input(dir.path(), "a_DFOP00.raw")], &context(dir.path()))
            .unwrap();
        assert!(out.assets.is_empty());
        assert_eq!(out.rows.map(|r| r.len()), Some(1));
    }

    #[test]
    #[serial]
    fn test_failure_and_empty_output() {
        let dir = TempDir::new().unwrap();
        let failing = script(dir.path(), "failing", "echo boom >&2; exit 3");
        let stage = ExternalTool::new("build_svp", failing, Vec::new(), &[AssetType::Svp], None);
        let err = stage
            .run(&[input(dir.path(), "CTD_1.txt")], &context(dir.path()))
            .unwrap_err();
        match err {
            ToolError::ExitStatus { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {}", other),
        }

        let silent = script(dir.path(), "silent", "true");
        let stage = ExternalTool::new("build_svp", silent, Vec::new(), &[AssetType::Svp], None);
        let err = stage
            .run(&[input(dir.path(), "CTD_2.txt")], &context(dir.path()))
            .unwrap_err();
        assert!(matches!(err, ToolError::NoOutput(_)));
    }

    #[test]
    #[serial]
    fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let stage = ExternalTool::new(
            "build_svp",
            dir.path().join("absent"),
            Vec::new(),
            &[AssetType::Svp],
            None,
        );
        let err = stage
            .run(&[input(dir.path(), "CTD_3.txt")], &context(dir.path()))
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
