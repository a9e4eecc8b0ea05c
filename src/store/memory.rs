//! In-memory invoice store for tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::invoice::Invoice;

use super::{FactusPatch, InvoiceStore, Result, StoreError};

/// HashMap-backed store. Patches hold the write lock for the whole
/// read-modify-write, so they are atomic like the SQLite variant.
#[derive(Default)]
pub struct MemoryInvoiceStore {
    invoices: RwLock<HashMap<String, Invoice>>,
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn insert(&self, invoice: Invoice) -> Result<()> {
        let mut invoices = self.invoices.write().await;
        if invoices.contains_key(&invoice.id) {
            return Err(StoreError::AlreadyExists(invoice.id));
        }
        invoices.insert(invoice.id.clone(), invoice);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Invoice> {
        self.invoices
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn patch(&self, id: &str, patch: FactusPatch) -> Result<Invoice> {
        let mut invoices = self.invoices.write().await;
        let invoice = invoices
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply(&mut invoice.factus);
        Ok(invoice.clone())
    }

    async fn list_in_flight(&self) -> Result<Vec<String>> {
        let invoices = self.invoices.read().await;
        let mut ids: Vec<String> = invoices
            .values()
            .filter(|inv| inv.factus.factus_id.is_some() && !inv.factus.status.is_terminal())
            .map(|inv| inv.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
