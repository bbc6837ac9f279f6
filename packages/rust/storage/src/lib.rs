//! libSQL catalog store (local file, offline).
//!
//! The [`Storage`] struct wraps a libSQL database holding canonical component
//! records, their variables, scrape job history, and a full-text index.
//!
//! **Write rules:**
//! - every write goes through one connection and is serialized by an internal lock
//! - a component and its variables are replaced together in one transaction
//! - [`Storage::open_readonly`] handles reject writes

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use espforge_shared::{
    Catalog, Component, ConfigVariable, Constraints, EspforgeError, Result, Value, VarType,
};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    /// Serializes writers on the shared connection.
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EspforgeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            write_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EspforgeError::Storage(format!(
                "catalog database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            write_lock: Mutex::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        EspforgeError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(EspforgeError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Component reads
    // -----------------------------------------------------------------------

    /// Get a component and its variables by canonical key.
    pub async fn get_component(&self, key: &str) -> Result<Option<Component>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COMPONENT_COLUMNS} FROM components WHERE key = ?1"),
                params![key],
            )
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        let mut component = match rows.next().await {
            Ok(Some(row)) => row_to_component(&row)?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(EspforgeError::Storage(e.to_string())),
        };

        let mut vars = self.load_variables(Some(key)).await?;
        component.variables = vars.remove(key).unwrap_or_default();
        Ok(Some(component))
    }

    /// List components ordered by key, optionally restricted to one category.
    pub async fn list_components(&self, category: Option<&str>) -> Result<Vec<Component>> {
        let mut rows = match category {
            Some(cat) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {COMPONENT_COLUMNS} FROM components WHERE category = ?1 ORDER BY key"
                        ),
                        params![cat],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        &format!("SELECT {COMPONENT_COLUMNS} FROM components ORDER BY key"),
                        params![],
                    )
                    .await
            }
        }
        .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        let mut components = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            components.push(row_to_component(&row)?);
        }

        let mut vars = self.load_variables(None).await?;
        for component in &mut components {
            component.variables = vars.remove(&component.key).unwrap_or_default();
        }
        Ok(components)
    }

    /// Number of stored components.
    pub async fn count_components(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM components", params![])
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<u64>(0)
                .map_err(|e| EspforgeError::Storage(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(EspforgeError::Storage(e.to_string())),
        }
    }

    /// Immutable snapshot of every stored component.
    pub async fn load_catalog(&self) -> Result<Catalog> {
        let components = self.list_components(None).await?;
        tracing::debug!(components = components.len(), "catalog snapshot loaded");
        Ok(Catalog::new(components))
    }

    /// Variables grouped by component key, in documentation order.
    async fn load_variables(&self, key: Option<&str>) -> Result<HashMap<String, Vec<ConfigVariable>>> {
        let sql_all = "SELECT component_key, name, var_type, required, default_json, constraints_json, description
             FROM config_variables ORDER BY component_key, position";
        let sql_one = "SELECT component_key, name, var_type, required, default_json, constraints_json, description
             FROM config_variables WHERE component_key = ?1 ORDER BY position";

        let mut rows = match key {
            Some(k) => self.conn.query(sql_one, params![k]).await,
            None => self.conn.query(sql_all, params![]).await,
        }
        .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        let mut grouped: HashMap<String, Vec<ConfigVariable>> = HashMap::new();
        while let Ok(Some(row)) = rows.next().await {
            let component_key: String = row
                .get(0)
                .map_err(|e| EspforgeError::Storage(e.to_string()))?;
            grouped
                .entry(component_key)
                .or_default()
                .push(row_to_variable(&row)?);
        }
        Ok(grouped)
    }

    // -----------------------------------------------------------------------
    // Component writes
    // -----------------------------------------------------------------------

    /// Insert or replace a component together with its variables.
    ///
    /// All-or-nothing: on any failure the previous record stays intact.
    pub async fn write_component(&self, component: &Component) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let platforms_json = serde_json::to_string(&component.platforms)
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        tx.execute(
            "INSERT INTO components (key, name, category, description, platforms_json, source_url, checksum, refreshed_at, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(key) DO UPDATE SET
               name = excluded.name,
               category = excluded.category,
               description = excluded.description,
               platforms_json = excluded.platforms_json,
               source_url = excluded.source_url,
               checksum = excluded.checksum,
               refreshed_at = excluded.refreshed_at,
               checked_at = excluded.checked_at",
            params![
                component.key.as_str(),
                component.name.as_str(),
                component.category.as_str(),
                component.description.as_str(),
                platforms_json.as_str(),
                component.source_url.as_str(),
                component.checksum.as_str(),
                component.refreshed_at.to_rfc3339(),
                component.checked_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        tx.execute(
            "DELETE FROM config_variables WHERE component_key = ?1",
            params![component.key.as_str()],
        )
        .await
        .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        for (position, var) in component.variables.iter().enumerate() {
            let default_json = var
                .default
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| EspforgeError::Storage(e.to_string()))?;
            let constraints_json = serde_json::to_string(&var.constraints)
                .map_err(|e| EspforgeError::Storage(e.to_string()))?;

            tx.execute(
                "INSERT INTO config_variables (component_key, position, name, var_type, required, default_json, constraints_json, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    component.key.as_str(),
                    position as i64,
                    var.name.as_str(),
                    var.var_type.as_str(),
                    i64::from(var.required),
                    default_json,
                    constraints_json,
                    var.description.as_str(),
                ],
            )
            .await
            .map_err(|e| EspforgeError::Storage(format!("variable '{}': {e}", var.name)))?;
        }

        tx.commit()
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        tracing::debug!(
            key = %component.key,
            variables = component.variables.len(),
            "component written"
        );
        Ok(())
    }

    /// Record that a scrape saw `key` without content changes.
    ///
    /// Returns `false` when no such component is stored.
    pub async fn touch_checked(&self, key: &str, at: DateTime<Utc>) -> Result<bool> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let changed = self
            .conn
            .execute(
                "UPDATE components SET checked_at = ?1 WHERE key = ?2",
                params![at.to_rfc3339(), key],
            )
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Delete a component and its variables. Returns `false` if it did not exist.
    pub async fn delete_component(&self, key: &str) -> Result<bool> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;
        tx.execute(
            "DELETE FROM config_variables WHERE component_key = ?1",
            params![key],
        )
        .await
        .map_err(|e| EspforgeError::Storage(e.to_string()))?;
        let deleted = tx
            .execute("DELETE FROM components WHERE key = ?1", params![key])
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------------
    // Scrape job history
    // -----------------------------------------------------------------------

    /// Insert a new scrape job record. Returns the job ID.
    pub async fn insert_scrape_job(&self, locator: &str) -> Result<String> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO scrape_jobs (id, locator, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), locator, now.as_str()],
            )
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Mark a scrape job finished with its final status.
    pub async fn finish_scrape_job(
        &self,
        job_id: &str,
        status: &str,
        component_key: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE scrape_jobs SET finished_at = ?1, status = ?2, component_key = ?3, error = ?4 WHERE id = ?5",
                params![now.as_str(), status, component_key, error, job_id],
            )
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent scrape jobs, newest first.
    pub async fn recent_scrape_jobs(&self, limit: u32) -> Result<Vec<ScrapeJobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, locator, status, component_key, error FROM scrape_jobs
                 ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(ScrapeJobRecord {
                id: row
                    .get::<String>(0)
                    .map_err(|e| EspforgeError::Storage(e.to_string()))?,
                locator: row
                    .get::<String>(1)
                    .map_err(|e| EspforgeError::Storage(e.to_string()))?,
                status: row
                    .get::<String>(2)
                    .map_err(|e| EspforgeError::Storage(e.to_string()))?,
                component_key: row.get::<String>(3).ok(),
                error: row.get::<String>(4).ok(),
            });
        }
        Ok(jobs)
    }

    // -----------------------------------------------------------------------
    // FTS search
    // -----------------------------------------------------------------------

    /// Full-text search over component keys, names and descriptions.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let mut rows = self
            .conn
            .query(
                "SELECT c.key, c.name, c.category, rank
                 FROM components_fts fts
                 JOIN components c ON c.rowid = fts.rowid
                 WHERE components_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
                params![fts_query, limit],
            )
            .await
            .map_err(|e| EspforgeError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(SearchResult {
                key: row
                    .get(0)
                    .map_err(|e| EspforgeError::Storage(e.to_string()))?,
                name: row
                    .get(1)
                    .map_err(|e| EspforgeError::Storage(e.to_string()))?,
                category: row
                    .get(2)
                    .map_err(|e| EspforgeError::Storage(e.to_string()))?,
                score: row.get(3).unwrap_or(0.0),
            });
        }
        Ok(results)
    }
}

/// A search result from FTS5.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Canonical component key.
    pub key: String,
    /// Display name.
    pub name: String,
    pub category: String,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

/// One row of scrape job history.
#[derive(Debug, Clone)]
pub struct ScrapeJobRecord {
    pub id: String,
    pub locator: String,
    /// `running`, `created`, `updated`, `unchanged`, or a failure kind.
    pub status: String,
    pub component_key: Option<String>,
    pub error: Option<String>,
}

const COMPONENT_COLUMNS: &str =
    "key, name, category, description, platforms_json, source_url, checksum, refreshed_at, checked_at";

/// Quote every term so user input never trips FTS5 syntax; terms match as prefixes.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EspforgeError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Component`] (variables filled in separately).
fn row_to_component(row: &libsql::Row) -> Result<Component> {
    let platforms_json: String = row
        .get(4)
        .map_err(|e| EspforgeError::Storage(e.to_string()))?;
    let refreshed_at: String = row
        .get(7)
        .map_err(|e| EspforgeError::Storage(e.to_string()))?;
    let checked_at: String = row
        .get(8)
        .map_err(|e| EspforgeError::Storage(e.to_string()))?;

    Ok(Component {
        key: row
            .get::<String>(0)
            .map_err(|e| EspforgeError::Storage(e.to_string()))?,
        name: row
            .get::<String>(1)
            .map_err(|e| EspforgeError::Storage(e.to_string()))?,
        category: row
            .get::<String>(2)
            .map_err(|e| EspforgeError::Storage(e.to_string()))?,
        description: row
            .get::<String>(3)
            .map_err(|e| EspforgeError::Storage(e.to_string()))?,
        variables: Vec::new(),
        platforms: serde_json::from_str(&platforms_json)
            .map_err(|e| EspforgeError::Storage(format!("invalid platforms: {e}")))?,
        source_url: row
            .get::<String>(5)
            .map_err(|e| EspforgeError::Storage(e.to_string()))?,
        checksum: row
            .get::<String>(6)
            .map_err(|e| EspforgeError::Storage(e.to_string()))?,
        refreshed_at: parse_timestamp(&refreshed_at)?,
        checked_at: parse_timestamp(&checked_at)?,
    })
}

/// Convert a `config_variables` row (starting at column 1) to a [`ConfigVariable`].
fn row_to_variable(row: &libsql::Row) -> Result<ConfigVariable> {
    let var_type: String = row
        .get(2)
        .map_err(|e| EspforgeError::Storage(e.to_string()))?;
    let default: Option<Value> = match row.get::<String>(4).ok() {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| EspforgeError::Storage(format!("invalid default: {e}")))?,
        ),
        None => None,
    };
    let constraints_json: String = row
        .get(5)
        .map_err(|e| EspforgeError::Storage(e.to_string()))?;
    let constraints: Constraints = serde_json::from_str(&constraints_json)
        .map_err(|e| EspforgeError::Storage(format!("invalid constraints: {e}")))?;

    Ok(ConfigVariable {
        name: row
            .get::<String>(1)
            .map_err(|e| EspforgeError::Storage(e.to_string()))?,
        var_type: var_type.parse::<VarType>().map_err(EspforgeError::Storage)?,
        required: row.get::<i64>(3).unwrap_or(0) != 0,
        default,
        constraints,
        description: row
            .get::<String>(6)
            .map_err(|e| EspforgeError::Storage(e.to_string()))?,
    })
}
