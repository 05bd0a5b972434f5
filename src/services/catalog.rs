use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::debug;

use crate::entities::menu_item;
use crate::errors::ServiceError;

/// Authoritative name and price of a menu item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogItem {
    pub name: String,
    pub unit_price: Decimal,
}

/// Resolves menu item ids to their current name and price.
///
/// `Ok(None)` means the item is unknown (or not orderable); errors are reserved
/// for infrastructure failures.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn lookup(&self, item_id: &str) -> Result<Option<CatalogItem>, ServiceError>;
}

/// Catalog backed by the read-only `menu_items` table.
#[derive(Clone)]
pub struct SeaOrmCatalog {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogLookup for SeaOrmCatalog {
    async fn lookup(&self, item_id: &str) -> Result<Option<CatalogItem>, ServiceError> {
        let item = menu_item::Entity::find_by_id(item_id.to_string())
            .one(&*self.db)
            .await?;

        Ok(item.filter(|m| m.available).map(|m| CatalogItem {
            name: m.name,
            unit_price: m.price,
        }))
    }
}

/// Process-local catalog, used by tests and local tooling.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    items: Arc<DashMap<String, CatalogItem>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(self, id: impl Into<String>, name: impl Into<String>, price: Decimal) -> Self {
        self.insert(id, name, price);
        self
    }

    pub fn insert(&self, id: impl Into<String>, name: impl Into<String>, price: Decimal) {
        self.items.insert(
            id.into(),
            CatalogItem {
                name: name.into(),
                unit_price: price,
            },
        );
    }

    pub fn remove(&self, id: &str) {
        self.items.remove(id);
    }
}

#[async_trait]
impl CatalogLookup for InMemoryCatalog {
    async fn lookup(&self, item_id: &str) -> Result<Option<CatalogItem>, ServiceError> {
        let found = self.items.get(item_id).map(|entry| entry.value().clone());
        if found.is_none() {
            debug!(item_id, "catalog miss");
        }
        Ok(found)
    }
}
