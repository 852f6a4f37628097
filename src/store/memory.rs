use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CategoryRollup, Datastore, ItemUpdate, ListingDetails, OwnerTotals, ScannedItemRecord,
    StoreError, UserRecord, apply_listing, apply_sale, apply_update,
};

/// Process-local backend. Used for tests and for running without a database.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    items: HashMap<Uuid, ScannedItemRecord>,
    users: HashMap<Uuid, UserRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn insert_item(&self, record: ScannedItemRecord) -> Result<(), StoreError> {
        self.inner.lock().await.items.insert(record.id, record);
        Ok(())
    }

    async fn list_items(&self, owner: &str) -> Result<Vec<ScannedItemRecord>, StoreError> {
        let guard = self.inner.lock().await;
        let mut records: Vec<_> = guard
            .items
            .values()
            .filter(|record| record.owner_id == owner)
            .cloned()
            .map(ScannedItemRecord::without_analysis)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn get_item(&self, owner: &str, id: Uuid) -> Result<ScannedItemRecord, StoreError> {
        let guard = self.inner.lock().await;
        guard
            .items
            .get(&id)
            .filter(|record| record.owner_id == owner)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_item(
        &self,
        owner: &str,
        id: Uuid,
        update: ItemUpdate,
    ) -> Result<ScannedItemRecord, StoreError> {
        let mut guard = self.inner.lock().await;
        let existing = guard
            .items
            .get(&id)
            .filter(|record| record.owner_id == owner)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let updated = apply_update(existing, update)?;
        guard.items.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete_item(&self, owner: &str, id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        match guard.items.get(&id) {
            Some(record) if record.owner_id == owner => {
                guard.items.remove(&id);
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn mark_listed(
        &self,
        owner: &str,
        id: Uuid,
        listing: ListingDetails,
    ) -> Result<ScannedItemRecord, StoreError> {
        let mut guard = self.inner.lock().await;
        let existing = guard
            .items
            .get(&id)
            .filter(|record| record.owner_id == owner)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let updated = apply_listing(existing, listing)?;
        guard.items.insert(id, updated.clone());
        Ok(updated)
    }

    async fn mark_sold(
        &self,
        owner: &str,
        id: Uuid,
        sold_price: Option<f64>,
    ) -> Result<ScannedItemRecord, StoreError> {
        let mut guard = self.inner.lock().await;
        let existing = guard
            .items
            .get(&id)
            .filter(|record| record.owner_id == owner)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let updated = apply_sale(existing, sold_price)?;
        guard.items.insert(id, updated.clone());
        Ok(updated)
    }

    async fn owner_totals(&self, owner: &str) -> Result<OwnerTotals, StoreError> {
        let guard = self.inner.lock().await;
        let mut totals = OwnerTotals::default();
        for record in guard.items.values().filter(|r| r.owner_id == owner) {
            totals.total_value += record.estimated_value;
            totals.total_co2_saved_kg += record.co2_saved_kg;
            totals.item_count += 1;
        }
        Ok(totals)
    }

    async fn category_rollups(&self, owner: &str) -> Result<Vec<CategoryRollup>, StoreError> {
        let guard = self.inner.lock().await;
        let mut by_category: HashMap<&'static str, CategoryRollup> = HashMap::new();
        for record in guard.items.values().filter(|r| r.owner_id == owner) {
            let entry = by_category
                .entry(record.category.as_str())
                .or_insert(CategoryRollup {
                    category: record.category,
                    count: 0,
                    total_value: 0.0,
                });
            entry.count += 1;
            entry.total_value += record.estimated_value;
        }
        let mut rollups: Vec<_> = by_category.into_values().collect();
        rollups.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(rollups)
    }

    async fn recent_items(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<ScannedItemRecord>, StoreError> {
        let mut records = self.list_items(owner).await?;
        records.truncate(limit);
        Ok(records)
    }

    async fn migrate_owner(&self, guest: &str, user: &str) -> Result<u64, StoreError> {
        let mut guard = self.inner.lock().await;
        let now = Utc::now();
        let mut moved = 0;
        for record in guard.items.values_mut() {
            if record.owner_id == guest {
                record.owner_id = user.to_string();
                record.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn create_user(&self, user: UserRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        if guard
            .users
            .values()
            .any(|existing| existing.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::EmailTaken);
        }
        guard.users.insert(user.id, user);
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{Category, Condition, Confidence, MarketTrend};
    use crate::store::{ItemStatus, MarketplaceInfo, PriceSnapshot, derive_tags};
    use serde_json::json;

    fn sample_record(owner: &str, name: &str, value: f64, category: Category) -> ScannedItemRecord {
        let now = Utc::now();
        ScannedItemRecord {
            id: Uuid::new_v4(),
            owner_id: owner.to_string(),
            item_name: name.to_string(),
            description: None,
            category,
            estimated_value: value,
            condition: Condition::Good,
            co2_saved_kg: 4.5,
            eco_summary: "4.5 kg CO₂ saved".into(),
            confidence: Confidence::Medium,
            price_snapshot: PriceSnapshot {
                current_average: value,
                low: value * 0.8,
                high: value * 1.2,
                currency: "USD".into(),
                market_trend: MarketTrend::Stable,
            },
            full_analysis: Some(json!({"identification": {"itemName": name}})),
            status: ItemStatus::Scanned,
            marketplace: MarketplaceInfo::default(),
            tags: derive_tags(name, category),
            user_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn reads_are_scoped_to_owner() {
        let store = MemoryStore::new();
        let record = sample_record("guest:abc", "Desk Lamp", 25.0, Category::HomeDecor);
        let id = record.id;
        store.insert_item(record).await.expect("insert");

        assert!(store.get_item("guest:abc", id).await.is_ok());
        let err = store.get_item("user:other", id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert!(store.list_items("user:other").await.expect("list").is_empty());
        let err = store
            .delete_item("user:other", id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn list_views_exclude_the_analysis_blob() {
        let store = MemoryStore::new();
        store
            .insert_item(sample_record("u1", "Bookshelf", 60.0, Category::Furniture))
            .await
            .expect("insert");
        let listed = store.list_items("u1").await.expect("list");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].full_analysis.is_none());
    }

    #[tokio::test]
    async fn listing_then_selling_follows_the_state_machine() {
        let store = MemoryStore::new();
        let record = sample_record("u1", "Road Bike", 300.0, Category::Sports);
        let id = record.id;
        store.insert_item(record).await.expect("insert");

        let listed = store
            .mark_listed(
                "u1",
                id,
                ListingDetails {
                    price: 280.0,
                    platform: "eBay".into(),
                    url: Some("https://ebay.com/itm/1".into()),
                },
            )
            .await
            .expect("list item");
        assert_eq!(listed.status, ItemStatus::Listed);
        assert_eq!(listed.marketplace.listing_price, Some(280.0));

        let sold = store.mark_sold("u1", id, None).await.expect("sell");
        assert_eq!(sold.status, ItemStatus::Sold);
        // sold price defaults to the listing price
        assert_eq!(sold.marketplace.sold_price, Some(280.0));

        let err = store
            .mark_listed(
                "u1",
                id,
                ListingDetails {
                    price: 1.0,
                    platform: "eBay".into(),
                    url: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn selling_an_unlisted_item_is_rejected() {
        let store = MemoryStore::new();
        let record = sample_record("u1", "Puzzle", 10.0, Category::Toys);
        let id = record.id;
        store.insert_item(record).await.expect("insert");
        let err = store.mark_sold("u1", id, Some(8.0)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::IllegalTransition {
                from: ItemStatus::Scanned,
                to: ItemStatus::Sold
            }
        ));
    }

    #[tokio::test]
    async fn update_can_donate_but_not_resurrect() {
        let store = MemoryStore::new();
        let record = sample_record("u1", "Winter Coat", 40.0, Category::Clothing);
        let id = record.id;
        store.insert_item(record).await.expect("insert");

        let donated = store
            .update_item(
                "u1",
                id,
                ItemUpdate {
                    status: Some(ItemStatus::Donated),
                    ..Default::default()
                },
            )
            .await
            .expect("donate");
        assert_eq!(donated.status, ItemStatus::Donated);

        let err = store
            .update_item(
                "u1",
                id,
                ItemUpdate {
                    status: Some(ItemStatus::Scanned),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn totals_and_rollups_aggregate_per_owner() {
        let store = MemoryStore::new();
        store
            .insert_item(sample_record("u1", "Laptop", 500.0, Category::Electronics))
            .await
            .expect("insert");
        store
            .insert_item(sample_record("u1", "Monitor", 150.0, Category::Electronics))
            .await
            .expect("insert");
        store
            .insert_item(sample_record("u1", "Novel", 8.0, Category::Books))
            .await
            .expect("insert");
        store
            .insert_item(sample_record("someone-else", "Sofa", 900.0, Category::Furniture))
            .await
            .expect("insert");

        let totals = store.owner_totals("u1").await.expect("totals");
        assert_eq!(totals.item_count, 3);
        assert!((totals.total_value - 658.0).abs() < f64::EPSILON);
        assert!((totals.total_co2_saved_kg - 13.5).abs() < 1e-9);

        let rollups = store.category_rollups("u1").await.expect("rollups");
        assert_eq!(rollups.len(), 2);
        assert_eq!(rollups[0].category, Category::Electronics);
        assert_eq!(rollups[0].count, 2);
    }

    #[tokio::test]
    async fn guest_migration_moves_everything_once() {
        let store = MemoryStore::new();
        for name in ["Kettle", "Toaster", "Blender"] {
            store
                .insert_item(sample_record("guest:g1", name, 20.0, Category::Electronics))
                .await
                .expect("insert");
        }
        store
            .insert_item(sample_record("user:u9", "Rug", 75.0, Category::HomeDecor))
            .await
            .expect("insert");

        let moved = store.migrate_owner("guest:g1", "user:u2").await.expect("migrate");
        assert_eq!(moved, 3);
        assert_eq!(store.list_items("user:u2").await.expect("list").len(), 3);
        assert!(store.list_items("guest:g1").await.expect("list").is_empty());

        // retry with the same pair: nothing lost, nothing duplicated
        let moved_again = store.migrate_owner("guest:g1", "user:u2").await.expect("migrate");
        assert_eq!(moved_again, 0);
        assert_eq!(store.list_items("user:u2").await.expect("list").len(), 3);
        assert_eq!(store.list_items("user:u9").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        let user = UserRecord {
            id: Uuid::new_v4(),
            name: "Riley".into(),
            email: "riley@example.com".into(),
            password_hash: "$2b$12$hash".into(),
            created_at: Utc::now(),
        };
        store.create_user(user.clone()).await.expect("create");
        let mut duplicate = user.clone();
        duplicate.id = Uuid::new_v4();
        duplicate.email = "RILEY@example.com".into();
        let err = store.create_user(duplicate).await.unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken));

        let found = store
            .find_user_by_email("riley@example.com")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(found.id, user.id);
    }
}
