//! Persistence for scanned-item records and registered users, scoped by the
//! owning identity string. Two backends: Supabase PostgREST when configured,
//! an in-process map otherwise (local runs and tests).

pub mod memory;
pub mod postgrest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::normalize::{Category, Condition, Confidence, MarketTrend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Scanned,
    Listed,
    Sold,
    Donated,
    Recycling,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Scanned => "scanned",
            ItemStatus::Listed => "listed",
            ItemStatus::Sold => "sold",
            ItemStatus::Donated => "donated",
            ItemStatus::Recycling => "recycling",
        }
    }

    /// `scanned` fans out to listed/donated/recycling, `listed` may close as
    /// `sold`, everything else is terminal. No backward moves.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (
                ItemStatus::Scanned,
                ItemStatus::Listed | ItemStatus::Donated | ItemStatus::Recycling
            ) | (ItemStatus::Listed, ItemStatus::Sold)
        )
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketplaceInfo {
    pub listing_price: Option<f64>,
    pub platform: Option<String>,
    pub listing_url: Option<String>,
    pub listed_at: Option<DateTime<Utc>>,
    pub sold_price: Option<f64>,
    pub sold_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub current_average: f64,
    pub low: f64,
    pub high: f64,
    pub currency: String,
    pub market_trend: MarketTrend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedItemRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub item_name: String,
    pub description: Option<String>,
    pub category: Category,
    pub estimated_value: f64,
    pub condition: Condition,
    pub co2_saved_kg: f64,
    pub eco_summary: String,
    pub confidence: Confidence,
    pub price_snapshot: PriceSnapshot,
    /// Full aggregated analysis payload; stripped from list views.
    pub full_analysis: Option<Value>,
    pub status: ItemStatus,
    pub marketplace: MarketplaceInfo,
    pub tags: Vec<String>,
    pub user_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScannedItemRecord {
    pub fn without_analysis(mut self) -> Self {
        self.full_analysis = None;
        self
    }
}

/// Lowercased name words plus the category label, deduplicated.
pub fn derive_tags(item_name: &str, category: Category) -> Vec<String> {
    let mut tags: Vec<String> = item_name
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect();
    tags.push(category.as_str().to_lowercase());
    let mut seen = std::collections::HashSet::new();
    tags.retain(|tag| seen.insert(tag.clone()));
    tags
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdate {
    pub item_name: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub condition: Option<Condition>,
    pub user_notes: Option<String>,
    pub status: Option<ItemStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDetails {
    pub price: f64,
    pub platform: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerTotals {
    pub total_value: f64,
    pub total_co2_saved_kg: f64,
    pub item_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRollup {
    pub category: Category,
    pub count: u64,
    pub total_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("email already registered")]
    EmailTaken,
    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalTransition { from: ItemStatus, to: ItemStatus },
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn insert_item(&self, record: ScannedItemRecord) -> Result<(), StoreError>;
    /// Newest first, raw analysis blob stripped.
    async fn list_items(&self, owner: &str) -> Result<Vec<ScannedItemRecord>, StoreError>;
    async fn get_item(&self, owner: &str, id: Uuid) -> Result<ScannedItemRecord, StoreError>;
    async fn update_item(
        &self,
        owner: &str,
        id: Uuid,
        update: ItemUpdate,
    ) -> Result<ScannedItemRecord, StoreError>;
    async fn delete_item(&self, owner: &str, id: Uuid) -> Result<(), StoreError>;
    async fn mark_listed(
        &self,
        owner: &str,
        id: Uuid,
        listing: ListingDetails,
    ) -> Result<ScannedItemRecord, StoreError>;
    async fn mark_sold(
        &self,
        owner: &str,
        id: Uuid,
        sold_price: Option<f64>,
    ) -> Result<ScannedItemRecord, StoreError>;
    async fn owner_totals(&self, owner: &str) -> Result<OwnerTotals, StoreError>;
    async fn category_rollups(&self, owner: &str) -> Result<Vec<CategoryRollup>, StoreError>;
    async fn recent_items(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<ScannedItemRecord>, StoreError>;
    /// Re-keys every record owned by `guest` to `user`. Idempotent: a retry
    /// with the same pair finds nothing left to move and reports zero.
    async fn migrate_owner(&self, guest: &str, user: &str) -> Result<u64, StoreError>;

    async fn create_user(&self, user: UserRecord) -> Result<(), StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;
}

pub fn from_env() -> Arc<dyn Datastore> {
    match postgrest::PostgrestStore::from_env() {
        Some(store) => Arc::new(store),
        None => {
            info!(
                target = "c2c.store",
                "SUPABASE_URL not configured; using in-memory store"
            );
            Arc::new(memory::MemoryStore::new())
        }
    }
}

/// Field-by-field merge used by both backends. A status change must follow
/// the state machine.
pub(crate) fn apply_update(
    mut record: ScannedItemRecord,
    update: ItemUpdate,
) -> Result<ScannedItemRecord, StoreError> {
    if let Some(status) = update.status
        && status != record.status
    {
        if !record.status.can_transition_to(status) {
            return Err(StoreError::IllegalTransition {
                from: record.status,
                to: status,
            });
        }
        record.status = status;
    }
    if let Some(name) = update.item_name {
        record.item_name = name;
        record.tags = derive_tags(&record.item_name, record.category);
    }
    if let Some(description) = update.description {
        record.description = Some(description);
    }
    if let Some(category) = update.category {
        record.category = category;
        record.tags = derive_tags(&record.item_name, record.category);
    }
    if let Some(condition) = update.condition {
        record.condition = condition;
    }
    if let Some(notes) = update.user_notes {
        record.user_notes = Some(notes);
    }
    record.updated_at = Utc::now();
    Ok(record)
}

pub(crate) fn apply_listing(
    mut record: ScannedItemRecord,
    listing: ListingDetails,
) -> Result<ScannedItemRecord, StoreError> {
    if !record.status.can_transition_to(ItemStatus::Listed) {
        return Err(StoreError::IllegalTransition {
            from: record.status,
            to: ItemStatus::Listed,
        });
    }
    record.status = ItemStatus::Listed;
    record.marketplace.listing_price = Some(listing.price);
    record.marketplace.platform = Some(listing.platform);
    record.marketplace.listing_url = listing.url;
    record.marketplace.listed_at = Some(Utc::now());
    record.updated_at = Utc::now();
    Ok(record)
}

pub(crate) fn apply_sale(
    mut record: ScannedItemRecord,
    sold_price: Option<f64>,
) -> Result<ScannedItemRecord, StoreError> {
    if !record.status.can_transition_to(ItemStatus::Sold) {
        return Err(StoreError::IllegalTransition {
            from: record.status,
            to: ItemStatus::Sold,
        });
    }
    record.status = ItemStatus::Sold;
    record.marketplace.sold_price = sold_price.or(record.marketplace.listing_price);
    record.marketplace.sold_at = Some(Utc::now());
    record.updated_at = Utc::now();
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_legal_moves() {
        assert!(ItemStatus::Scanned.can_transition_to(ItemStatus::Listed));
        assert!(ItemStatus::Scanned.can_transition_to(ItemStatus::Donated));
        assert!(ItemStatus::Scanned.can_transition_to(ItemStatus::Recycling));
        assert!(ItemStatus::Listed.can_transition_to(ItemStatus::Sold));
    }

    #[test]
    fn state_machine_rejects_everything_else() {
        for terminal in [ItemStatus::Sold, ItemStatus::Donated, ItemStatus::Recycling] {
            for next in [
                ItemStatus::Scanned,
                ItemStatus::Listed,
                ItemStatus::Sold,
                ItemStatus::Donated,
                ItemStatus::Recycling,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} -> {next:?}");
            }
        }
        assert!(!ItemStatus::Listed.can_transition_to(ItemStatus::Scanned));
        assert!(!ItemStatus::Listed.can_transition_to(ItemStatus::Donated));
        assert!(!ItemStatus::Scanned.can_transition_to(ItemStatus::Sold));
    }

    #[test]
    fn tags_dedupe_and_include_category() {
        let tags = derive_tags("Nike Air Air Max", Category::Clothing);
        assert_eq!(tags, vec!["nike", "air", "max", "clothing"]);
    }
}
