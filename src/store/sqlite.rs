//! SQLite invoice store.
//!
//! One `invoices` table with the document serialized into a JSON column.
//! Patches are read-modify-write inside a `BEGIN IMMEDIATE` transaction so
//! concurrent patches to the same invoice serialize on the write lock
//! instead of deadlocking mid-upgrade.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::invoice::Invoice;

use super::{FactusPatch, InvoiceStore, Result, StoreError};

/// SQLite implementation of [`InvoiceStore`].
pub struct SqliteInvoiceStore {
    pool: SqlitePool,
}

impl SqliteInvoiceStore {
    /// Create a new store over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                factus_id TEXT,
                status TEXT NOT NULL,
                doc TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn decode(doc: String) -> Result<Invoice> {
        Ok(serde_json::from_str(&doc)?)
    }

    fn encode(invoice: &Invoice) -> Result<String> {
        Ok(serde_json::to_string(invoice)?)
    }
}

#[async_trait]
impl InvoiceStore for SqliteInvoiceStore {
    async fn insert(&self, invoice: Invoice) -> Result<()> {
        let doc = Self::encode(&invoice)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO invoices (id, factus_id, status, doc) VALUES (?, ?, ?, ?)",
        )
        .bind(&invoice.id)
        .bind(&invoice.factus.factus_id)
        .bind(invoice.factus.status.to_string())
        .bind(&doc)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(invoice.id));
        }
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Invoice> {
        let row = sqlx::query("SELECT doc FROM invoices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        Self::decode(row.get::<String, _>(0))
    }

    async fn patch(&self, id: &str, patch: FactusPatch) -> Result<Invoice> {
        // BEGIN IMMEDIATE acquires the write lock upfront, preventing
        // deadlocks when concurrent DEFERRED transactions race to upgrade
        // from shared to exclusive.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = async {
            let row = sqlx::query("SELECT doc FROM invoices WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            let mut invoice = Self::decode(row.get::<String, _>(0))?;
            patch.apply(&mut invoice.factus);

            sqlx::query("UPDATE invoices SET factus_id = ?, status = ?, doc = ? WHERE id = ?")
                .bind(&invoice.factus.factus_id)
                .bind(invoice.factus.status.to_string())
                .bind(Self::encode(&invoice)?)
                .bind(id)
                .execute(&mut *conn)
                .await?;

            Ok(invoice)
        }
        .await;

        match result {
            Ok(invoice) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(invoice)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn list_in_flight(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM invoices
             WHERE factus_id IS NOT NULL
               AND status NOT IN ('accepted', 'rejected', 'cancelled')
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }
}
