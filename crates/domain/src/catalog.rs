//! Menu catalog contract and implementations.
//!
//! The catalog is owned by the menu management surface; this crate only reads
//! it to price lines and to find the stock pool an item draws from.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{ItemId, RestaurantId};
use sqlx::{PgPool, Row};
use store::Money;
use thiserror::Error;

/// A menu item as resolved for ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedItem {
    pub item_id: ItemId,
    pub name: String,
    pub price: Money,
    pub available: bool,
    /// Stock pool this item consumes from. Several items may share a pool.
    pub stock_name: String,
}

/// Errors raised by a catalog backend.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Resolves menu item ids for a restaurant.
#[async_trait]
pub trait MenuCatalog: Send + Sync {
    /// Returns the orderable items among `item_ids`.
    ///
    /// Unknown ids, ids of other restaurants and unavailable items are absent
    /// from the result.
    async fn resolve_items(
        &self,
        restaurant_id: RestaurantId,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, ResolvedItem>, CatalogError>;
}

/// Menu item definition for [`InMemoryMenuCatalog`].
#[derive(Debug, Clone)]
pub struct MenuItem {
    pub id: ItemId,
    pub name: String,
    pub price: Money,
    pub available: bool,
    /// Explicit stock pool. Defaults to the item name.
    pub stock_name: Option<String>,
}

impl MenuItem {
    /// Creates an available item drawing from a pool named after itself.
    pub fn new(id: i64, name: impl Into<String>, price: Money) -> Self {
        Self {
            id: ItemId::new(id),
            name: name.into(),
            price,
            available: true,
            stock_name: None,
        }
    }

    /// Draws stock from a differently-named pool.
    pub fn with_stock_pool(mut self, stock_name: impl Into<String>) -> Self {
        self.stock_name = Some(stock_name.into());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn resolve(&self) -> ResolvedItem {
        ResolvedItem {
            item_id: self.id,
            name: self.name.clone(),
            price: self.price,
            available: self.available,
            stock_name: self.stock_name.clone().unwrap_or_else(|| self.name.clone()),
        }
    }
}

/// In-memory menu catalog for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMenuCatalog {
    items: Arc<RwLock<HashMap<(RestaurantId, ItemId), MenuItem>>>,
}

impl InMemoryMenuCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an item on a restaurant's menu.
    pub fn add_item(&self, restaurant_id: RestaurantId, item: MenuItem) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((restaurant_id, item.id), item);
    }

    /// Marks an item (un)available. Returns false if it is not on the menu.
    pub fn set_available(
        &self,
        restaurant_id: RestaurantId,
        item_id: ItemId,
        available: bool,
    ) -> bool {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        match items.get_mut(&(restaurant_id, item_id)) {
            Some(item) => {
                item.available = available;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl MenuCatalog for InMemoryMenuCatalog {
    async fn resolve_items(
        &self,
        restaurant_id: RestaurantId,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, ResolvedItem>, CatalogError> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(item_ids
            .iter()
            .filter_map(|id| items.get(&(restaurant_id, *id)))
            .filter(|item| item.available)
            .map(|item| (item.id, item.resolve()))
            .collect())
    }
}

/// Reads the `menu_items` table.
#[derive(Clone)]
pub struct PostgresMenuCatalog {
    pool: PgPool,
}

impl PostgresMenuCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MenuCatalog for PostgresMenuCatalog {
    async fn resolve_items(
        &self,
        restaurant_id: RestaurantId,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, ResolvedItem>, CatalogError> {
        let ids: Vec<i64> = item_ids.iter().map(ItemId::as_i64).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, name, price_cents, available, COALESCE(stock_name, name) AS stock_name
            FROM menu_items
            WHERE restaurant_id = $1 AND id = ANY($2) AND available
            "#,
        )
        .bind(restaurant_id.as_uuid())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut resolved = HashMap::with_capacity(rows.len());
        for row in rows {
            let item_id = ItemId::new(row.try_get("id")?);
            resolved.insert(
                item_id,
                ResolvedItem {
                    item_id,
                    name: row.try_get("name")?,
                    price: Money::from_cents(row.try_get("price_cents")?),
                    available: row.try_get("available")?,
                    stock_name: row.try_get("stock_name")?,
                },
            );
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_and_unavailable_items_are_absent() {
        let catalog = InMemoryMenuCatalog::new();
        let restaurant = RestaurantId::new();
        catalog.add_item(restaurant, MenuItem::new(1, "Coke", Money::from_cents(150)));
        catalog.add_item(
            restaurant,
            MenuItem::new(2, "Lassi", Money::from_cents(200)).unavailable(),
        );

        let resolved = catalog
            .resolve_items(restaurant, &[ItemId::new(1), ItemId::new(2), ItemId::new(3)])
            .await
            .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[&ItemId::new(1)].stock_name, "Coke");
    }

    #[tokio::test]
    async fn items_are_scoped_by_restaurant() {
        let catalog = InMemoryMenuCatalog::new();
        let restaurant = RestaurantId::new();
        catalog.add_item(restaurant, MenuItem::new(1, "Coke", Money::from_cents(150)));

        let resolved = catalog
            .resolve_items(RestaurantId::new(), &[ItemId::new(1)])
            .await
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn explicit_stock_pool_is_shared() {
        let catalog = InMemoryMenuCatalog::new();
        let restaurant = RestaurantId::new();
        catalog.add_item(
            restaurant,
            MenuItem::new(1, "Chicken Momo (half)", Money::from_cents(150)).with_stock_pool("Momo"),
        );
        catalog.add_item(
            restaurant,
            MenuItem::new(2, "Chicken Momo (full)", Money::from_cents(280)).with_stock_pool("Momo"),
        );

        let resolved = catalog
            .resolve_items(restaurant, &[ItemId::new(1), ItemId::new(2)])
            .await
            .unwrap();
        assert_eq!(resolved[&ItemId::new(1)].stock_name, "Momo");
        assert_eq!(resolved[&ItemId::new(2)].stock_name, "Momo");
    }

    #[tokio::test]
    async fn availability_toggle() {
        let catalog = InMemoryMenuCatalog::new();
        let restaurant = RestaurantId::new();
        catalog.add_item(restaurant, MenuItem::new(1, "Coke", Money::from_cents(150)));

        assert!(catalog.set_available(restaurant, ItemId::new(1), false));
        assert!(!catalog.set_available(restaurant, ItemId::new(5), false));
        let resolved = catalog
            .resolve_items(restaurant, &[ItemId::new(1)])
            .await
            .unwrap();
        assert!(resolved.is_empty());
    }
}
