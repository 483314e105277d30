//! Read-only spatial query interface for the road-network edge store, with
//! an embedded SQLite (R-tree) backend for local/dev use and a Postgres
//! (PostGIS) backend for the hosted deployment.

use async_trait::async_trait;
use roam_common::error::{RoamError, RoamResult};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

/// A single road-network edge, field-compatible with what corridor
/// extraction expects.
#[derive(Debug, Clone)]
pub struct EdgeRow {
    pub id: i64,
    pub from_id: i64,
    pub to_id: i64,
    pub from_lat: f64,
    pub from_lng: f64,
    pub to_lat: f64,
    pub to_lng: f64,
    pub dist_m: f64,
    pub cost_s: f64,
    pub toll: bool,
    pub ferry: bool,
    pub unsealed: bool,
    pub highway: Option<String>,
    pub name: Option<String>,
    pub osm_way_id: Option<i64>,
}

/// Read-only spatial query surface over the edge store, backend-agnostic.
#[async_trait]
pub trait EdgesDb: Send + Sync {
    async fn query_bbox(
        &self,
        min_lng: f64,
        max_lng: f64,
        min_lat: f64,
        max_lat: f64,
        max_edges: u32,
    ) -> RoamResult<Vec<EdgeRow>>;

    async fn count(&self) -> RoamResult<i64>;
}

/// Local SQLite edge store. Prefers the `edges_rtree` virtual table when
/// present; falls back to a plain range scan over `from_lng`/`from_lat`/
/// `to_lng`/`to_lat` otherwise.
pub struct SqliteEdgesDb {
    pool: SqlitePool,
    has_rtree: bool,
}

impl SqliteEdgesDb {
    pub async fn open(path: &str) -> RoamResult<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| RoamError::StorageError(format!("invalid edges db path: {e}")))?
            .read_only(true);
        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(|e| RoamError::StorageError(format!("edges db connect failed: {e}")))?;

        let has_rtree = sqlx::query("SELECT 1 FROM edges_rtree LIMIT 1")
            .fetch_optional(&pool)
            .await
            .is_ok();

        let db = Self { pool, has_rtree };
        let n = db.count().await.unwrap_or(0);
        info!(path, rows = n, rtree = has_rtree, "edges db opened");
        Ok(db)
    }

    fn row_to_edge(row: &sqlx::sqlite::SqliteRow) -> RoamResult<EdgeRow> {
        let g_i64 = |col: &str| -> i64 { row.try_get(col).unwrap_or(0) };
        let g_f64 = |col: &str| -> f64 { row.try_get(col).unwrap_or(0.0) };
        let g_bool = |col: &str| -> bool { row.try_get::<i64, _>(col).unwrap_or(0) != 0 };
        let rowid: i64 = row
            .try_get("_rowid")
            .or_else(|_| row.try_get("rowid"))
            .unwrap_or(0);

        Ok(EdgeRow {
            id: rowid,
            from_id: g_i64("from_id"),
            to_id: g_i64("to_id"),
            from_lat: g_f64("from_lat"),
            from_lng: g_f64("from_lng"),
            to_lat: g_f64("to_lat"),
            to_lng: g_f64("to_lng"),
            dist_m: g_f64("dist_m"),
            cost_s: g_f64("cost_s"),
            toll: g_bool("toll"),
            ferry: g_bool("ferry"),
            unsealed: g_bool("unsealed"),
            highway: row.try_get("highway").ok(),
            name: row.try_get("name").ok(),
            osm_way_id: row.try_get("osm_way_id").ok(),
        })
    }
}

#[async_trait]
impl EdgesDb for SqliteEdgesDb {
    async fn query_bbox(
        &self,
        min_lng: f64,
        max_lng: f64,
        min_lat: f64,
        max_lat: f64,
        max_edges: u32,
    ) -> RoamResult<Vec<EdgeRow>> {
        let rows = if self.has_rtree {
            sqlx::query(
                "SELECT e.rowid AS _rowid, e.*
                 FROM edges e
                 JOIN edges_rtree r ON e.rowid = r.id
                 WHERE r.min_lng <= ? AND r.max_lng >= ?
                   AND r.min_lat <= ? AND r.max_lat >= ?
                 LIMIT ?",
            )
            .bind(max_lng)
            .bind(min_lng)
            .bind(max_lat)
            .bind(min_lat)
            .bind(max_edges as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT rowid AS _rowid, *
                 FROM edges
                 WHERE (from_lng BETWEEN ? AND ? AND from_lat BETWEEN ? AND ?)
                    OR (to_lng   BETWEEN ? AND ? AND to_lat   BETWEEN ? AND ?)
                 LIMIT ?",
            )
            .bind(min_lng)
            .bind(max_lng)
            .bind(min_lat)
            .bind(max_lat)
            .bind(min_lng)
            .bind(max_lng)
            .bind(min_lat)
            .bind(max_lat)
            .bind(max_edges as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| RoamError::StorageError(format!("edge bbox query failed: {e}")))?;

        rows.iter().map(Self::row_to_edge).collect()
    }

    async fn count(&self) -> RoamResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM edges")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RoamError::StorageError(format!("edge count failed: {e}")))?;
        row.try_get("n")
            .map_err(|e| RoamError::StorageError(format!("count decode failed: {e}")))
    }
}

/// Hosted Postgres + PostGIS edge store.
pub struct PostgresEdgesDb {
    pool: sqlx::PgPool,
}

impl PostgresEdgesDb {
    pub async fn connect(database_url: &str) -> RoamResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| RoamError::StorageError(format!("postgres connect failed: {e}")))?;

        let version: (String,) = sqlx::query_as("SELECT PostGIS_Version()")
            .fetch_one(&pool)
            .await
            .map_err(|e| RoamError::StorageError(format!("postgis check failed: {e}")))?;
        info!(postgis_version = %version.0, "edges db connected (postgres)");
        Ok(Self { pool })
    }
}

#[async_trait]
impl EdgesDb for PostgresEdgesDb {
    async fn query_bbox(
        &self,
        min_lng: f64,
        max_lng: f64,
        min_lat: f64,
        max_lat: f64,
        max_edges: u32,
    ) -> RoamResult<Vec<EdgeRow>> {
        let rows = sqlx::query(
            "SELECT id, from_id, to_id, from_lat, from_lng, to_lat, to_lng,
                    dist_m, cost_s, toll, ferry, unsealed, highway, name, osm_way_id
             FROM edges
             WHERE geom && ST_MakeEnvelope($1, $2, $3, $4, 4326)
             LIMIT $5",
        )
        .bind(min_lng)
        .bind(min_lat)
        .bind(max_lng)
        .bind(max_lat)
        .bind(max_edges as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RoamError::StorageError(format!("edge bbox query failed: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(EdgeRow {
                    id: row.try_get("id").unwrap_or(0),
                    from_id: row.try_get("from_id").unwrap_or(0),
                    to_id: row.try_get("to_id").unwrap_or(0),
                    from_lat: row.try_get("from_lat").unwrap_or(0.0),
                    from_lng: row.try_get("from_lng").unwrap_or(0.0),
                    to_lat: row.try_get("to_lat").unwrap_or(0.0),
                    to_lng: row.try_get("to_lng").unwrap_or(0.0),
                    dist_m: row.try_get("dist_m").unwrap_or(0.0),
                    cost_s: row.try_get("cost_s").unwrap_or(0.0),
                    toll: row.try_get("toll").unwrap_or(false),
                    ferry: row.try_get("ferry").unwrap_or(false),
                    unsealed: row.try_get("unsealed").unwrap_or(false),
                    highway: row.try_get("highway").ok(),
                    name: row.try_get("name").ok(),
                    osm_way_id: row.try_get("osm_way_id").ok(),
                })
            })
            .collect()
    }

    async fn count(&self) -> RoamResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM edges")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RoamError::StorageError(format!("edge count failed: {e}")))?;
        row.try_get("n")
            .map_err(|e| RoamError::StorageError(format!("count decode failed: {e}")))
    }
}

/// Select a backend the way the reference factory does: Postgres URL
/// first, then an explicit SQLite path, then a handful of legacy fallback
/// locations.
pub async fn create_edges_db(
    database_url: Option<&str>,
    sqlite_path: Option<&str>,
) -> RoamResult<Box<dyn EdgesDb>> {
    if let Some(url) = database_url {
        return Ok(Box::new(PostgresEdgesDb::connect(url).await?));
    }

    if let Some(path) = sqlite_path {
        if std::path::Path::new(path).is_file() {
            return Ok(Box::new(SqliteEdgesDb::open(path).await?));
        }
    }

    for fallback in [
        "./data/edges_queensland.db",
        "/cache/edges_queensland.db",
        "/tmp/edges_queensland.db",
    ] {
        if std::path::Path::new(fallback).is_file() {
            return Ok(Box::new(SqliteEdgesDb::open(fallback).await?));
        }
    }

    Err(RoamError::StorageError(
        "no edges database found; set EDGES_DATABASE_URL or EDGES_DB_PATH".to_string(),
    ))
}
