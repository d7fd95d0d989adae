//! libSQL-backed product document store.
//!
//! The [`Storage`] struct wraps a local libSQL database holding one JSON
//! document per imported product, keyed by `docId`, plus the import job
//! history.
//!
//! **Access rules:**
//! - A handle is job-scoped: open it with [`Storage::open`] at the start of a
//!   job and release it with [`Storage::close`] when the job ends.
//! - Bulk writes run in one transaction per call; each document is replaced
//!   or partially updated independently of the others.

mod migrations;

use std::path::{Path, PathBuf};

use catalogsync_shared::{CatalogSyncError, DescriptionUpdate, DocId, Product, Result};
use chrono::Utc;
use libsql::{Connection, Database, params};

/// Milliseconds a writer waits for a lock held by another job.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Documents whose `data.description` is absent, null, or blank.
const MISSING_DESCRIPTION: &str = "(json_extract(doc, '$.data.description') IS NULL
      OR trim(json_extract(doc, '$.data.description')) = '')";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    path: PathBuf,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CatalogSyncError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CatalogSyncError::Connection(format!("{}: {e}", path.display())))?;

        let conn = db
            .connect()
            .map_err(|e| CatalogSyncError::Connection(format!("{}: {e}", path.display())))?;

        // PRAGMA returns a row, so it goes through `query`.
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
            .await
            .map_err(|e| CatalogSyncError::Connection(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            path: path.to_path_buf(),
        };
        storage.run_migrations().await?;
        tracing::debug!(path = %storage.path.display(), "storage opened");
        Ok(storage)
    }

    /// Release the handle. Consumes `self` so it cannot be used afterwards.
    pub fn close(self) {
        tracing::debug!(path = %self.path.display(), "storage closed");
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
                        CatalogSyncError::Storage(format!(
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

    // -----------------------------------------------------------------------
    // Product documents
    // -----------------------------------------------------------------------

    /// Insert or fully replace each product, matched by `docId`.
    ///
    /// The batch commits as one transaction. Returns the number of documents
    /// written.
    pub async fn bulk_upsert_by_doc_id(&self, products: &[Product]) -> Result<usize> {
        if products.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        for product in products {
            let doc = serde_json::to_string(product).map_err(|e| {
                CatalogSyncError::Storage(format!("serialize {}: {e}", product.doc_id))
            })?;
            tx.execute(
                "INSERT INTO products (doc_id, doc, written_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(doc_id) DO UPDATE SET
                   doc = excluded.doc,
                   written_at = excluded.written_at",
                params![product.doc_id.to_string(), doc, now.as_str()],
            )
            .await
            .map_err(|e| CatalogSyncError::Storage(format!("upsert {}: {e}", product.doc_id)))?;
        }

        tx.commit()
            .await
            .map_err(|e| CatalogSyncError::Storage(format!("commit: {e}")))?;
        Ok(products.len())
    }

    /// Set `data.description` on each referenced document, leaving every
    /// other field untouched.
    ///
    /// Returns the number of documents that matched.
    pub async fn bulk_set_description(&self, updates: &[DescriptionUpdate]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        let mut matched = 0usize;
        for update in updates {
            let changed = tx
                .execute(
                    "UPDATE products SET doc = json_set(doc, '$.data.description', ?1)
                     WHERE doc_id = ?2",
                    params![update.description.as_str(), update.doc_id.to_string()],
                )
                .await
                .map_err(|e| {
                    CatalogSyncError::Storage(format!("set description {}: {e}", update.doc_id))
                })?;
            matched += changed as usize;
        }

        tx.commit()
            .await
            .map_err(|e| CatalogSyncError::Storage(format!("commit: {e}")))?;
        Ok(matched)
    }

    /// One page of the "description missing or empty" cursor.
    ///
    /// Pages are ordered by `docId`; pass the last id of the previous page as
    /// `after` to continue.
    pub async fn list_missing_description(
        &self,
        after: Option<&DocId>,
        limit: usize,
    ) -> Result<Vec<Product>> {
        let after = after.map(|id| id.to_string()).unwrap_or_default();
        let sql = format!(
            "SELECT doc FROM products
             WHERE doc_id > ?1 AND {MISSING_DESCRIPTION}
             ORDER BY doc_id
             LIMIT ?2"
        );
        let mut rows = self
            .conn
            .query(&sql, params![after, limit as i64])
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?
        {
            results.push(row_to_product(&row)?);
        }
        Ok(results)
    }

    /// Number of documents still missing a description.
    pub async fn count_missing_description(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM products WHERE {MISSING_DESCRIPTION}");
        self.count(&sql).await
    }

    /// Get a product by its document id.
    pub async fn get_product(&self, doc_id: &DocId) -> Result<Option<Product>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc FROM products WHERE doc_id = ?1",
                params![doc_id.to_string()],
            )
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_product(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(CatalogSyncError::Storage(e.to_string())),
        }
    }

    /// List up to `limit` products ordered by document id.
    pub async fn list_products(&self, limit: usize) -> Result<Vec<Product>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc FROM products ORDER BY doc_id LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?
        {
            results.push(row_to_product(&row)?);
        }
        Ok(results)
    }

    /// Total number of product documents.
    pub async fn count_products(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM products").await
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(sql, params![])
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<i64>(0)
                .map_err(|e| CatalogSyncError::Storage(e.to_string()))? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(CatalogSyncError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Import run history
    // -----------------------------------------------------------------------

    /// Record the start of an import job.
    pub async fn insert_import_run(&self, run_id: &str, vendor: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO import_runs (id, vendor, started_at) VALUES (?1, ?2, ?3)",
                params![run_id, vendor, now.as_str()],
            )
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Mark an import job finished with its final status and statistics.
    pub async fn finish_import_run(&self, run_id: &str, status: &str, stats_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE import_runs SET finished_at = ?1, status = ?2, stats_json = ?3 WHERE id = ?4",
                params![now.as_str(), status, stats_json, run_id],
            )
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent import runs, newest first.
    pub async fn list_import_runs(&self, limit: usize) -> Result<Vec<ImportRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, vendor, started_at, finished_at, status, stats_json
                 FROM import_runs ORDER BY started_at DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CatalogSyncError::Storage(e.to_string()))?
        {
            results.push(ImportRun {
                id: row
                    .get::<String>(0)
                    .map_err(|e| CatalogSyncError::Storage(e.to_string()))?,
                vendor: row
                    .get::<String>(1)
                    .map_err(|e| CatalogSyncError::Storage(e.to_string()))?,
                started_at: row
                    .get::<String>(2)
                    .map_err(|e| CatalogSyncError::Storage(e.to_string()))?,
                finished_at: row.get::<String>(3).ok(),
                status: row
                    .get::<String>(4)
                    .map_err(|e| CatalogSyncError::Storage(e.to_string()))?,
                stats_json: row.get::<String>(5).ok(),
            });
        }
        Ok(results)
    }
}

/// One row of the import job history.
#[derive(Debug, Clone)]
pub struct ImportRun {
    pub id: String,
    pub vendor: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub stats_json: Option<String>,
}

/// Decode the `doc` column of a row into a [`Product`].
fn row_to_product(row: &libsql::Row) -> Result<Product> {
    let doc: String = row
        .get(0)
        .map_err(|e| CatalogSyncError::Storage(e.to_string()))?;
    serde_json::from_str(&doc)
        .map_err(|e| CatalogSyncError::Storage(format!("corrupt product document: {e}")))
}
