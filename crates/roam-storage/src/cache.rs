//! SQLite-backed pack cache: the six pack tables plus the two POI tables.
//!
//! Every pack write is an `INSERT OR REPLACE` keyed by its content-address
//! key, matching the idempotent-write invariant the rest of the engine
//! relies on.

use roam_common::contracts::BBox4;
use roam_common::error::{RoamError, RoamResult};
use roam_common::time::now_iso;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Async handle to the local SQLite pack cache.
#[derive(Clone)]
pub struct PackCache {
    pool: SqlitePool,
}

impl PackCache {
    /// Open (creating if needed) the SQLite database at `path`, with WAL
    /// journaling and `synchronous=NORMAL` matching the reference
    /// implementation's connection pragmas.
    pub async fn connect(path: &str) -> RoamResult<Self> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RoamError::StorageError(format!("mkdir failed: {e}")))?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| RoamError::StorageError(format!("invalid sqlite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await
            .map_err(|e| RoamError::StorageError(format!("sqlite connect failed: {e}")))?;

        let cache = Self { pool };
        cache.ensure_schema().await?;
        Ok(cache)
    }

    async fn ensure_schema(&self) -> RoamResult<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS nav_packs (
                route_key TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                algo_version TEXT NOT NULL,
                pack_json BLOB NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS corridor_packs (
                corridor_key TEXT PRIMARY KEY,
                route_key TEXT NOT NULL,
                profile TEXT NOT NULL,
                buffer_m INTEGER NOT NULL,
                max_edges INTEGER NOT NULL,
                algo_version TEXT NOT NULL,
                created_at TEXT NOT NULL,
                pack_json BLOB NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS places_packs (
                places_key TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                algo_version TEXT NOT NULL,
                pack_json BLOB NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS traffic_packs (
                traffic_key TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                algo_version TEXT NOT NULL,
                pack_json BLOB NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS hazard_packs (
                hazards_key TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                algo_version TEXT NOT NULL,
                pack_json BLOB NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS manifests (
                plan_id TEXT PRIMARY KEY,
                route_key TEXT NOT NULL,
                created_at TEXT NOT NULL,
                manifest_json BLOB NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS places_items (
                osm_type TEXT NOT NULL,
                osm_id INTEGER NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                name TEXT,
                category TEXT,
                tags_json BLOB NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                PRIMARY KEY (osm_type, osm_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_places_items_lat ON places_items(lat)",
            "CREATE INDEX IF NOT EXISTS idx_places_items_lng ON places_items(lng)",
            "CREATE INDEX IF NOT EXISTS idx_places_items_cat ON places_items(category)",
            "CREATE TABLE IF NOT EXISTS places_tile_state (
                tile_key TEXT PRIMARY KEY,
                min_lat REAL NOT NULL,
                min_lng REAL NOT NULL,
                max_lat REAL NOT NULL,
                max_lng REAL NOT NULL,
                categories_json BLOB NOT NULL,
                item_count INTEGER NOT NULL,
                last_fetched TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_places_tiles_last_fetched ON places_tile_state(last_fetched)",
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| RoamError::StorageError(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    async fn put_pack<T: Serialize>(
        &self,
        table: &str,
        key_col: &str,
        key: &str,
        algo_version: &str,
        pack: &T,
    ) -> RoamResult<usize> {
        let blob = serde_json::to_vec(pack)?;
        let sql = format!(
            "INSERT OR REPLACE INTO {table} ({key_col}, created_at, algo_version, pack_json) VALUES (?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(now_iso())
            .bind(algo_version)
            .bind(&blob)
            .execute(&self.pool)
            .await
            .map_err(|e| RoamError::StorageError(format!("pack write failed: {e}")))?;
        debug!(table, key, bytes = blob.len(), "pack cached");
        Ok(blob.len())
    }

    async fn get_pack<T: DeserializeOwned>(
        &self,
        table: &str,
        key_col: &str,
        key: &str,
    ) -> RoamResult<Option<T>> {
        let sql = format!("SELECT pack_json FROM {table} WHERE {key_col} = ?");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RoamError::StorageError(format!("pack read failed: {e}")))?;
        match row {
            Some(row) => {
                let blob: Vec<u8> = row.try_get("pack_json").map_err(|e| {
                    RoamError::StorageError(format!("pack row decode failed: {e}"))
                })?;
                Ok(Some(serde_json::from_slice(&blob)?))
            }
            None => Ok(None),
        }
    }

    async fn pack_byte_len(&self, table: &str, key_col: &str, key: &str) -> RoamResult<usize> {
        let sql = format!("SELECT length(pack_json) AS len FROM {table} WHERE {key_col} = ?");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RoamError::StorageError(format!("byte-len read failed: {e}")))?;
        Ok(row
            .map(|r| r.try_get::<i64, _>("len").unwrap_or(0) as usize)
            .unwrap_or(0))
    }

    pub async fn put_nav_pack<T: Serialize>(
        &self,
        route_key: &str,
        algo_version: &str,
        pack: &T,
    ) -> RoamResult<usize> {
        self.put_pack("nav_packs", "route_key", route_key, algo_version, pack)
            .await
    }

    pub async fn get_nav_pack<T: DeserializeOwned>(&self, route_key: &str) -> RoamResult<Option<T>> {
        self.get_pack("nav_packs", "route_key", route_key).await
    }

    pub async fn nav_pack_bytes(&self, route_key: &str) -> RoamResult<usize> {
        self.pack_byte_len("nav_packs", "route_key", route_key).await
    }

    pub async fn put_corridor_pack<T: Serialize>(
        &self,
        corridor_key: &str,
        route_key: &str,
        profile: &str,
        buffer_m: u32,
        max_edges: u32,
        algo_version: &str,
        pack: &T,
    ) -> RoamResult<usize> {
        let blob = serde_json::to_vec(pack)?;
        sqlx::query(
            "INSERT OR REPLACE INTO corridor_packs
             (corridor_key, route_key, profile, buffer_m, max_edges, algo_version, created_at, pack_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(corridor_key)
        .bind(route_key)
        .bind(profile)
        .bind(buffer_m as i64)
        .bind(max_edges as i64)
        .bind(algo_version)
        .bind(now_iso())
        .bind(&blob)
        .execute(&self.pool)
        .await
        .map_err(|e| RoamError::StorageError(format!("corridor pack write failed: {e}")))?;
        Ok(blob.len())
    }

    pub async fn get_corridor_pack<T: DeserializeOwned>(
        &self,
        corridor_key: &str,
    ) -> RoamResult<Option<T>> {
        self.get_pack("corridor_packs", "corridor_key", corridor_key)
            .await
    }

    pub async fn corridor_pack_bytes(&self, corridor_key: &str) -> RoamResult<usize> {
        self.pack_byte_len("corridor_packs", "corridor_key", corridor_key)
            .await
    }

    pub async fn put_places_pack<T: Serialize>(
        &self,
        places_key: &str,
        algo_version: &str,
        pack: &T,
    ) -> RoamResult<usize> {
        self.put_pack("places_packs", "places_key", places_key, algo_version, pack)
            .await
    }

    pub async fn get_places_pack<T: DeserializeOwned>(
        &self,
        places_key: &str,
    ) -> RoamResult<Option<T>> {
        self.get_pack("places_packs", "places_key", places_key).await
    }

    pub async fn places_pack_bytes(&self, places_key: &str) -> RoamResult<usize> {
        self.pack_byte_len("places_packs", "places_key", places_key)
            .await
    }

    pub async fn put_traffic_pack<T: Serialize>(
        &self,
        traffic_key: &str,
        algo_version: &str,
        pack: &T,
    ) -> RoamResult<usize> {
        self.put_pack("traffic_packs", "traffic_key", traffic_key, algo_version, pack)
            .await
    }

    pub async fn get_traffic_pack<T: DeserializeOwned>(
        &self,
        traffic_key: &str,
    ) -> RoamResult<Option<T>> {
        self.get_pack("traffic_packs", "traffic_key", traffic_key)
            .await
    }

    pub async fn traffic_pack_bytes(&self, traffic_key: &str) -> RoamResult<usize> {
        self.pack_byte_len("traffic_packs", "traffic_key", traffic_key)
            .await
    }

    pub async fn put_hazards_pack<T: Serialize>(
        &self,
        hazards_key: &str,
        algo_version: &str,
        pack: &T,
    ) -> RoamResult<usize> {
        self.put_pack("hazard_packs", "hazards_key", hazards_key, algo_version, pack)
            .await
    }

    pub async fn get_hazards_pack<T: DeserializeOwned>(
        &self,
        hazards_key: &str,
    ) -> RoamResult<Option<T>> {
        self.get_pack("hazard_packs", "hazards_key", hazards_key)
            .await
    }

    pub async fn hazards_pack_bytes(&self, hazards_key: &str) -> RoamResult<usize> {
        self.pack_byte_len("hazard_packs", "hazards_key", hazards_key)
            .await
    }

    pub async fn put_manifest<T: Serialize>(
        &self,
        plan_id: &str,
        route_key: &str,
        manifest: &T,
    ) -> RoamResult<()> {
        let blob = serde_json::to_vec(manifest)?;
        sqlx::query(
            "INSERT OR REPLACE INTO manifests (plan_id, route_key, created_at, manifest_json)
             VALUES (?, ?, ?, ?)",
        )
        .bind(plan_id)
        .bind(route_key)
        .bind(now_iso())
        .bind(&blob)
        .execute(&self.pool)
        .await
        .map_err(|e| RoamError::StorageError(format!("manifest write failed: {e}")))?;
        Ok(())
    }

    pub async fn get_manifest<T: DeserializeOwned>(&self, plan_id: &str) -> RoamResult<Option<T>> {
        let row = sqlx::query("SELECT manifest_json FROM manifests WHERE plan_id = ?")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RoamError::StorageError(format!("manifest read failed: {e}")))?;
        match row {
            Some(row) => {
                let blob: Vec<u8> = row.try_get("manifest_json").map_err(|e| {
                    RoamError::StorageError(format!("manifest row decode failed: {e}"))
                })?;
                Ok(Some(serde_json::from_slice(&blob)?))
            }
            None => Ok(None),
        }
    }

    /// Raw pool access, for the POI-specific queries in `places.rs`.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// bbox bounds for the `places_items`/`places_tile_state` tables, kept
/// separate from [`BBox4`] here only to avoid a circular dependency; the
/// two are structurally identical.
pub type PlacesBBox = BBox4;
