//! Asset model
//!
//! An asset is one physical file or derived artifact under a survey scope. The
//! set of asset kinds is closed: every kind knows which kinds may be derived
//! from it and whether its rows live in the time-series store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sfg_common::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One survey deployment: (network, station, campaign)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub network: String,
    pub station: String,
    pub campaign: String,
}

impl Scope {
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        campaign: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            campaign: campaign.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.network, self.station, self.campaign)
    }
}

/// Schema of rows held in the time-series store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    KinPosition,
    ImuPosition,
    ShotData,
}

/// Closed set of raw and derived asset kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AssetType {
    // Raw instrument and field files
    Novatel,
    Novatel770,
    Novatel000,
    Dfop00,
    Sonardyne,
    Rinex,
    Kin,
    Seabird,
    Ctd,
    LeverArm,
    Master,
    QcPin,
    NovatelPin,
    BcOffload,
    // Derived files
    GnssObsTdb,
    KinResiduals,
    Svp,
    AtdOffset,
    SiteConfig,
    // Time-series datasets
    KinPosition,
    ImuPosition,
    ShotData,
    Acoustic,
}

impl AssetType {
    pub const ALL: [AssetType; 23] = [
        AssetType::Novatel,
        AssetType::Novatel770,
        AssetType::Novatel000,
        AssetType::Dfop00,
        AssetType::Sonardyne,
        AssetType::Rinex,
        AssetType::Kin,
        AssetType::Seabird,
        AssetType::Ctd,
        AssetType::LeverArm,
        AssetType::Master,
        AssetType::QcPin,
        AssetType::NovatelPin,
        AssetType::BcOffload,
        AssetType::GnssObsTdb,
        AssetType::KinResiduals,
        AssetType::Svp,
        AssetType::AtdOffset,
        AssetType::SiteConfig,
        AssetType::KinPosition,
        AssetType::ImuPosition,
        AssetType::ShotData,
        AssetType::Acoustic,
    ];

    /// Value stored in the `type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Novatel => "novatel",
            AssetType::Novatel770 => "novatel770",
            AssetType::Novatel000 => "novatel000",
            AssetType::Dfop00 => "dfop00",
            AssetType::Sonardyne => "sonardyne",
            AssetType::Rinex => "rinex",
            AssetType::Kin => "kin",
            AssetType::Seabird => "seabird",
            AssetType::Ctd => "ctd",
            AssetType::LeverArm => "leverarm",
            AssetType::Master => "master",
            AssetType::QcPin => "qcpin",
            AssetType::NovatelPin => "novatelpin",
            AssetType::BcOffload => "bcoffload",
            AssetType::GnssObsTdb => "GNSSOBSTDB",
            AssetType::KinResiduals => "kinresiduals",
            AssetType::Svp => "svp",
            AssetType::AtdOffset => "atdoffset",
            AssetType::SiteConfig => "siteconfig",
            AssetType::KinPosition => "kinposition",
            AssetType::ImuPosition => "imuposition",
            AssetType::ShotData => "shotdata",
            AssetType::Acoustic => "acoustic",
        }
    }

    /// Kinds that may be derived directly from this kind
    ///
    /// This table is the dependency graph. Changing it changes
    /// [`graph_fingerprint`], which invalidates `is_processed` for the affected
    /// parents when the catalog is next opened.
    pub fn legal_children(&self) -> &'static [AssetType] {
        match self {
            AssetType::Novatel770 => &[AssetType::GnssObsTdb],
            AssetType::Novatel000 => &[AssetType::GnssObsTdb, AssetType::ImuPosition],
            AssetType::GnssObsTdb => &[AssetType::Rinex],
            AssetType::Rinex => &[AssetType::Kin, AssetType::KinResiduals],
            AssetType::Kin => &[AssetType::KinPosition],
            AssetType::Dfop00 => &[AssetType::ShotData],
            AssetType::KinPosition => &[AssetType::ShotData],
            AssetType::Ctd | AssetType::Seabird => &[AssetType::Svp],
            AssetType::Novatel
            | AssetType::Sonardyne
            | AssetType::LeverArm
            | AssetType::Master
            | AssetType::QcPin
            | AssetType::NovatelPin
            | AssetType::BcOffload
            | AssetType::KinResiduals
            | AssetType::Svp
            | AssetType::AtdOffset
            | AssetType::SiteConfig
            | AssetType::ImuPosition
            | AssetType::ShotData
            | AssetType::Acoustic => &[],
        }
    }

    /// Time-series schema for kinds whose rows live in the series store
    pub fn series_kind(&self) -> Option<SeriesKind> {
        match self {
            AssetType::KinPosition => Some(SeriesKind::KinPosition),
            AssetType::ImuPosition => Some(SeriesKind::ImuPosition),
            AssetType::ShotData => Some(SeriesKind::ShotData),
            _ => None,
        }
    }

    pub fn can_derive(&self, child: AssetType) -> bool {
        self.legal_children().contains(&child)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AssetType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown asset type: {}", s)))
    }
}

impl TryFrom<String> for AssetType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AssetType> for String {
    fn from(value: AssetType) -> Self {
        value.as_str().to_string()
    }
}

/// SHA-256 over the canonical `parent>child,child` listing of the dependency graph
pub fn graph_fingerprint() -> String {
    let mut hasher = Sha256::new();
    for parent in AssetType::ALL {
        hasher.update(graph_line(parent).as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Canonical listing line for one parent, e.g. `rinex>kin,kinresiduals`
pub fn graph_line(parent: AssetType) -> String {
    let children: Vec<&str> = parent.legal_children().iter().map(|c| c.as_str()).collect();
    format!("{}>{}", parent.as_str(), children.join(","))
}

/// Catalog lifecycle of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    /// Known to a caller but not yet stored
    Unregistered,
    /// Catalogued, not on local disk
    Registered,
    /// Catalogued with a local path
    Materialized,
    /// Every expected child has been derived
    Processed,
}

/// One catalogued file or derived artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Assigned by the catalog on insert
    pub id: Option<i64>,
    pub scope: Scope,
    pub asset_type: AssetType,
    pub local_path: Option<PathBuf>,
    pub remote_path: Option<String>,
    pub remote_type: Option<String>,
    pub parent_id: Option<i64>,
    pub is_processed: bool,
    pub timestamp_data_start: Option<DateTime<Utc>>,
    pub timestamp_data_end: Option<DateTime<Utc>>,
    pub timestamp_created: Option<DateTime<Utc>>,
}

impl Asset {
    fn bare(scope: Scope, asset_type: AssetType) -> Self {
        Self {
            id: None,
            scope,
            asset_type,
            local_path: None,
            remote_path: None,
            remote_type: None,
            parent_id: None,
            is_processed: false,
            timestamp_data_start: None,
            timestamp_data_end: None,
            timestamp_created: None,
        }
    }

    /// Asset materialized on local disk
    pub fn local(scope: Scope, asset_type: AssetType, path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: Some(path.into()),
            ..Self::bare(scope, asset_type)
        }
    }

    /// Asset known only by its archive location
    pub fn remote(scope: Scope, asset_type: AssetType, remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: Some(remote_path.into()),
            ..Self::bare(scope, asset_type)
        }
    }

    pub fn with_parent(mut self, parent_id: Option<i64>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_data_span(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.timestamp_data_start = start;
        self.timestamp_data_end = end;
        self
    }

    /// Reject records that no store could ever locate
    pub fn validate(&self) -> Result<()> {
        if self.local_path.is_none() && self.remote_path.is_none() {
            return Err(Error::InvalidInput(format!(
                "Asset {} {} has neither local_path nor remote_path",
                self.scope, self.asset_type
            )));
        }
        for (label, value) in [
            ("network", &self.scope.network),
            ("station", &self.scope.station),
            ("campaign", &self.scope.campaign),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidInput(format!("Asset {} is empty", label)));
            }
        }
        if let (Some(start), Some(end)) = (self.timestamp_data_start, self.timestamp_data_end) {
            if end < start {
                return Err(Error::InvalidInput(format!(
                    "Asset data span ends ({}) before it starts ({})",
                    end, start
                )));
            }
        }
        Ok(())
    }

    pub fn state(&self) -> AssetState {
        if self.id.is_none() {
            AssetState::Unregistered
        } else if self.is_processed {
            AssetState::Processed
        } else if self.local_path.is_some() {
            AssetState::Materialized
        } else {
            AssetState::Registered
        }
    }

    /// File name of the local path, or of the remote path when not materialized
    pub fn file_name(&self) -> Option<String> {
        if let Some(name) = self
            .local_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
        {
            return Some(name);
        }
        self.remote_path
            .as_ref()
            .and_then(|r| r.rsplit('/').next())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope::new("net1", "st1", "camp1")
    }

    #[test]
    fn test_asset_type_string_roundtrip() {
        for kind in AssetType::ALL {
            assert_eq!(kind.as_str().parse::<AssetType>().unwrap(), kind);
        }
        assert!("not_a_type".parse::<AssetType>().is_err());
    }

    #[test]
    fn test_asset_type_serializes_as_storage_string() {
        let json = serde_json::to_string(&AssetType::GnssObsTdb).unwrap();
        assert_eq!(json, "\"GNSSOBSTDB\"");
        let parsed: AssetType = serde_json::from_str("\"rinex\"").unwrap();
        assert_eq!(parsed, AssetType::Rinex);
    }

    #[test]
    fn test_validate_requires_a_path() {
        let mut asset = Asset::local(scope(), AssetType::Rinex, "/data/a.23o");
        assert!(asset.validate().is_ok());

        asset.local_path = None;
        assert!(matches!(asset.validate(), Err(Error::InvalidInput(_))));

        asset.remote_path = Some("https://archive/a.23o".to_string());
        assert!(asset.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_span() {
        let start = Utc::now();
        let end = start - chrono::Duration::hours(1);
        let asset = Asset::local(scope(), AssetType::Kin, "/data/a.kin")
            .with_data_span(Some(start), Some(end));
        assert!(asset.validate().is_err());
    }

    #[test]
    fn test_state_transitions() {
        let mut asset = Asset::remote(scope(), AssetType::Novatel770, "s3://bucket/NOV770.raw");
        assert_eq!(asset.state(), AssetState::Unregistered);

        asset.id = Some(1);
        assert_eq!(asset.state(), AssetState::Registered);

        asset.local_path = Some(PathBuf::from("/data/NOV770.raw"));
        assert_eq!(asset.state(), AssetState::Materialized);

        asset.is_processed = true;
        assert_eq!(asset.state(), AssetState::Processed);
    }

    #[test]
    fn test_legal_children_match_series_kinds() {
        assert!(AssetType::Rinex.can_derive(AssetType::Kin));
        assert!(!AssetType::Kin.can_derive(AssetType::Rinex));
        assert_eq!(AssetType::ShotData.series_kind(), Some(SeriesKind::ShotData));
        assert_eq!(AssetType::Rinex.series_kind(), None);
    }

    #[test]
    fn test_graph_fingerprint_is_stable() {
        assert_eq!(graph_fingerprint(), graph_fingerprint());
        assert_eq!(graph_fingerprint().len(), 64);
        assert_eq!(graph_line(AssetType::Rinex), "rinex>kin,kinresiduals");
    }

    #[test]
    fn test_file_name_prefers_local() {
        let asset = Asset::remote(scope(), AssetType::Kin, "https://host/dir/remote.kin");
        assert_eq!(asset.file_name().as_deref(), Some("remote.kin"));

        let mut asset = asset;
        asset.local_path = Some(PathBuf::from("/tmp/local.kin"));
        assert_eq!(asset.file_name().as_deref(), Some("local.kin"));
    }
}
