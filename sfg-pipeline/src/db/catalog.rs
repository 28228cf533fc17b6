//! Catalog handler
//!
//! Single point of truth for what data exists, where it lives and what has
//! already been derived from it.
//!
//! **Failure semantics:** every operation that touches the store catches
//! provider errors, logs them with the scope and asset type, and reports a
//! boolean (or empty) result. Stage workers treat "already exists" as a normal
//! outcome, so nothing here returns a conflict as an error.

use super::{assets, merge_jobs};
use crate::models::{asset::graph_line, graph_fingerprint, Asset, AssetType, MergeJob, MergeKey, Scope};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use sfg_common::config::CatalogContext;
use sfg_common::db::{create_catalog_tables, get_meta, init_database, set_meta};
use sfg_common::Result;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, error, info, warn};

const GRAPH_FINGERPRINT_KEY: &str = "dependency_graph_fingerprint";
const GRAPH_LISTING_KEY: &str = "dependency_graph_listing";

/// Outcome of an insert-only registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    /// An equivalent asset exists; a normal outcome
    AlreadyCatalogued,
    /// Invalid record or store error
    Failed,
}

/// CRUD and query surface over the asset catalog
#[derive(Clone)]
pub struct CatalogHandler {
    pool: SqlitePool,
    context: CatalogContext,
    max_lock_wait_ms: u64,
}

impl CatalogHandler {
    /// Open (creating if needed) the catalog database at `db_path`
    pub async fn open(db_path: &Path, context: CatalogContext) -> Result<Self> {
        let pool = init_database(db_path).await?;
        Self::from_pool(pool, context).await
    }

    /// Wrap an existing pool, creating tables and reconciling the dependency graph
    pub async fn from_pool(pool: SqlitePool, context: CatalogContext) -> Result<Self> {
        create_catalog_tables(&pool).await?;
        reconcile_dependency_graph(&pool).await?;
        Ok(Self {
            pool,
            context,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn context(&self) -> CatalogContext {
        self.context
    }

    /// Insert an asset, updating the existing row on an identity conflict
    ///
    /// Returns `false` (and logs) when the record is invalid or the store fails.
    pub async fn add_or_update(&self, asset: &Asset) -> bool {
        self.add_or_update_returning_id(asset).await.is_some()
    }

    /// Same as [`add_or_update`](Self::add_or_update), returning the row id
    pub async fn add_or_update_returning_id(&self, asset: &Asset) -> Option<i64> {
        if let Err(e) = asset.validate() {
            warn!(
                network = %asset.scope.network,
                station = %asset.scope.station,
                campaign = %asset.scope.campaign,
                asset_type = %asset.asset_type,
                error = %e,
                "Rejected invalid asset"
            );
            return None;
        }

        let result = retry_on_lock("asset upsert", self.max_lock_wait_ms, || {
            assets::upsert_asset(&self.pool, asset, self.context)
        })
        .await;

        match result {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    network = %asset.scope.network,
                    station = %asset.scope.station,
                    campaign = %asset.scope.campaign,
                    asset_type = %asset.asset_type,
                    local_path = ?asset.local_path,
                    remote_path = ?asset.remote_path,
                    error = %e,
                    "Failed to add or update asset"
                );
                None
            }
        }
    }

    /// Insert-only registration
    ///
    /// Returns `false` if an asset with the same scope, type and local_path
    /// already exists, or if the insert fails for any reason. Use
    /// [`register_entry`](Self::register_entry) to tell the two apart.
    pub async fn add_entry(&self, asset: &Asset) -> bool {
        self.register_entry(asset).await == Registration::Added
    }

    /// Insert-only registration that separates duplicates from store failures
    pub async fn register_entry(&self, asset: &Asset) -> Registration {
        if let Err(e) = asset.validate() {
            warn!(asset_type = %asset.asset_type, error = %e, "Rejected invalid asset");
            return Registration::Failed;
        }

        match assets::equivalent_exists(&self.pool, asset).await {
            Ok(true) => {
                debug!(
                    asset_type = %asset.asset_type,
                    local_path = ?asset.local_path,
                    "Asset already catalogued"
                );
                return Registration::AlreadyCatalogued;
            }
            Ok(false) => {}
            Err(e) => {
                error!(asset_type = %asset.asset_type, error = %e, "Failed to check for existing asset");
                return Registration::Failed;
            }
        }

        let result = retry_on_lock("asset insert", self.max_lock_wait_ms, || {
            assets::insert_asset(&self.pool, asset)
        })
        .await;

        match result {
            Ok(_) => Registration::Added,
            Err(e) if e.is_unique_violation() => {
                debug!(asset_type = %asset.asset_type, "Asset already catalogued");
                Registration::AlreadyCatalogued
            }
            Err(e) => {
                error!(
                    network = %asset.scope.network,
                    station = %asset.scope.station,
                    campaign = %asset.scope.campaign,
                    asset_type = %asset.asset_type,
                    error = %e,
                    "Failed to add asset"
                );
                Registration::Failed
            }
        }
    }

    pub async fn get_asset(&self, id: i64) -> Option<Asset> {
        match assets::get_asset(&self.pool, id).await {
            Ok(asset) => asset,
            Err(e) => {
                error!(id, error = %e, "Failed to load asset");
                None
            }
        }
    }

    /// All assets of a type under a scope
    pub async fn get_assets(&self, scope: &Scope, asset_type: AssetType) -> Vec<Asset> {
        self.query_assets(scope, asset_type, false).await
    }

    /// Assets of a type under a scope that have a local path
    pub async fn get_local_assets(&self, scope: &Scope, asset_type: AssetType) -> Vec<Asset> {
        self.query_assets(scope, asset_type, true).await
    }

    async fn query_assets(&self, scope: &Scope, asset_type: AssetType, local_only: bool) -> Vec<Asset> {
        match assets::get_assets(&self.pool, scope, asset_type, local_only).await {
            Ok(found) => found,
            Err(e) => {
                error!(
                    network = %scope.network,
                    station = %scope.station,
                    campaign = %scope.campaign,
                    asset_type = %asset_type,
                    error = %e,
                    "Failed to query assets"
                );
                Vec::new()
            }
        }
    }

    /// Materialized parents that still need processing
    ///
    /// With `child_type`, a parent is finished once any catalogued child of that
    /// type points back at it. Without, the parent's own `is_processed` decides.
    /// `override_existing` returns every materialized parent.
    pub async fn get_single_entries_to_process(
        &self,
        scope: &Scope,
        parent_type: AssetType,
        child_type: Option<AssetType>,
        override_existing: bool,
    ) -> Vec<Asset> {
        let parents = self.get_local_assets(scope, parent_type).await;
        if override_existing || parents.is_empty() {
            return parents;
        }

        match child_type {
            Some(child_type) => {
                if !parent_type.can_derive(child_type) {
                    warn!(
                        parent_type = %parent_type,
                        child_type = %child_type,
                        "Child type is not a legal derivation of parent type"
                    );
                }
                let children = self.get_assets(scope, child_type).await;
                let finished: HashSet<i64> =
                    children.iter().filter_map(|child| child.parent_id).collect();
                parents
                    .into_iter()
                    .filter(|parent| parent.id.map_or(true, |id| !finished.contains(&id)))
                    .collect()
            }
            None => parents.into_iter().filter(|parent| !parent.is_processed).collect(),
        }
    }

    /// Whether an N-to-1 fusion over `parent_ids` already completed
    ///
    /// A store failure reads as "not complete", so the fusion reruns.
    pub async fn is_merge_complete(
        &self,
        parent_type: AssetType,
        child_type: AssetType,
        parent_ids: &MergeKey,
    ) -> bool {
        let job = MergeJob::new(parent_type, child_type, parent_ids.clone());
        match merge_jobs::merge_job_exists(&self.pool, &job).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(
                    parent_type = %parent_type,
                    child_type = %child_type,
                    parent_ids = %parent_ids,
                    error = %e,
                    "Failed to check merge job"
                );
                false
            }
        }
    }

    /// Record a completed N-to-1 fusion
    ///
    /// Recording an existing key is a successful no-op.
    pub async fn add_merge_job(
        &self,
        parent_type: AssetType,
        child_type: AssetType,
        parent_ids: &MergeKey,
    ) -> bool {
        let job = MergeJob::new(parent_type, child_type, parent_ids.clone());
        let result = retry_on_lock("merge job insert", self.max_lock_wait_ms, || {
            merge_jobs::insert_merge_job(&self.pool, &job)
        })
        .await;

        match result {
            Ok(inserted) => {
                if !inserted {
                    debug!(parent_ids = %parent_ids, "Merge job already recorded");
                }
                true
            }
            Err(e) => {
                error!(
                    parent_type = %parent_type,
                    child_type = %child_type,
                    parent_ids = %parent_ids,
                    error = %e,
                    "Failed to record merge job"
                );
                false
            }
        }
    }

    pub async fn mark_processed(&self, id: i64) -> bool {
        let result = retry_on_lock("mark processed", self.max_lock_wait_ms, || {
            assets::set_processed(&self.pool, id, true)
        })
        .await;
        match result {
            Ok(rows) => rows > 0,
            Err(e) => {
                error!(id, error = %e, "Failed to mark asset processed");
                false
            }
        }
    }

    pub async fn update_local_path(&self, id: i64, path: &Path) -> bool {
        match assets::update_local_path(&self.pool, id, path).await {
            Ok(rows) => rows > 0,
            Err(e) => {
                error!(id, path = %path.display(), error = %e, "Failed to update local path");
                false
            }
        }
    }

    /// Delete assets of a type under a scope, optionally only those with the
    /// given `is_processed` value
    pub async fn delete_entries(
        &self,
        scope: &Scope,
        asset_type: AssetType,
        processed: Option<bool>,
    ) -> bool {
        match assets::delete_entries(&self.pool, scope, asset_type, processed).await {
            Ok(rows) => {
                info!(
                    network = %scope.network,
                    station = %scope.station,
                    campaign = %scope.campaign,
                    asset_type = %asset_type,
                    rows,
                    "Deleted catalog entries"
                );
                true
            }
            Err(e) => {
                error!(asset_type = %asset_type, error = %e, "Failed to delete catalog entries");
                false
            }
        }
    }

    pub async fn delete_entry(&self, id: i64) -> bool {
        match assets::delete_entry(&self.pool, id).await {
            Ok(rows) => rows > 0,
            Err(e) => {
                error!(id, error = %e, "Failed to delete catalog entry");
                false
            }
        }
    }

    /// Local asset counts per type; empty when the scope has no local data
    pub async fn get_dtype_counts(&self, scope: &Scope) -> BTreeMap<AssetType, i64> {
        match assets::dtype_counts(&self.pool, scope).await {
            Ok(counts) => counts,
            Err(e) => {
                error!(scope = %scope, error = %e, "Failed to count assets");
                BTreeMap::new()
            }
        }
    }

    /// Whether the file behind `remote_path` has already been materialized
    pub async fn remote_file_exists(
        &self,
        scope: &Scope,
        asset_type: AssetType,
        remote_path: &str,
    ) -> bool {
        let file_name = remote_path.rsplit('/').next().unwrap_or(remote_path);
        match assets::local_file_named(&self.pool, scope, asset_type, file_name).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(remote_path, error = %e, "Failed to look up remote file");
                false
            }
        }
    }

    /// Scopes present in the catalog
    pub async fn get_parent_stations(&self, network: Option<&str>) -> Vec<Scope> {
        match assets::distinct_scopes(&self.pool, network).await {
            Ok(scopes) => scopes,
            Err(e) => {
                error!(error = %e, "Failed to list catalog scopes");
                Vec::new()
            }
        }
    }
}

/// Invalidate `is_processed` for parents whose legal children changed
///
/// A fresh catalog only records the current graph. Returns how many assets
/// were reset.
pub async fn reconcile_dependency_graph(pool: &SqlitePool) -> Result<u64> {
    let fingerprint = graph_fingerprint();
    let listing: Vec<String> = AssetType::ALL.iter().map(|t| graph_line(*t)).collect();

    let stored = get_meta(pool, GRAPH_FINGERPRINT_KEY).await?;
    let reset = match stored {
        None => 0,
        Some(ref stored) if *stored == fingerprint => return Ok(0),
        Some(_) => {
            let previous = get_meta(pool, GRAPH_LISTING_KEY).await?.unwrap_or_default();
            let previous: HashMap<&str, &str> = previous
                .lines()
                .filter_map(|line| line.split_once('>').map(|(parent, _)| (parent, line)))
                .collect();

            let changed: Vec<AssetType> = AssetType::ALL
                .iter()
                .copied()
                .filter(|t| previous.get(t.as_str()).copied() != Some(graph_line(*t).as_str()))
                .collect();

            let reset = assets::reset_processed_for_types(pool, &changed).await?;
            warn!(
                changed_types = ?changed.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
                reset,
                "Dependency graph changed; processed flags invalidated"
            );
            reset
        }
    };

    set_meta(pool, GRAPH_FINGERPRINT_KEY, &fingerprint).await?;
    set_meta(pool, GRAPH_LISTING_KEY, &listing.join("\n")).await?;
    Ok(reset)
}
