use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::http::build_client;

use super::{
    CategoryRollup, Datastore, ItemUpdate, ListingDetails, OwnerTotals, ScannedItemRecord,
    StoreError, UserRecord, apply_listing, apply_sale, apply_update,
};

const ITEMS_TABLE: &str = "scanned_items";
const USERS_TABLE: &str = "users";

/// Supabase-backed datastore speaking plain PostgREST over HTTP.
#[derive(Debug, Clone)]
pub struct PostgrestStore {
    base_url: String,
    service_key: String,
    http: Client,
}

impl PostgrestStore {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        })
    }

    fn table_url(&self, table: &str, query: &str) -> String {
        format!("{}/rest/v1/{}?{}", self.base_url, table, query)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn fetch<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>, StoreError> {
        let response = self
            .authed(self.http.get(url))
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!("HTTP {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    async fn fetch_owned_item(
        &self,
        owner: &str,
        id: Uuid,
    ) -> Result<ScannedItemRecord, StoreError> {
        let url = self.table_url(
            ITEMS_TABLE,
            &format!(
                "id=eq.{}&owner_id=eq.{}&select=*&limit=1",
                id,
                urlencoding::encode(owner)
            ),
        );
        let mut rows: Vec<ScannedItemRecord> = self.fetch(url).await?;
        rows.pop().ok_or(StoreError::NotFound)
    }

    async fn replace_item(&self, record: &ScannedItemRecord) -> Result<(), StoreError> {
        let url = self.table_url(ITEMS_TABLE, &format!("id=eq.{}", record.id));
        let response = self
            .authed(self.http.patch(url))
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl Datastore for PostgrestStore {
    async fn insert_item(&self, record: ScannedItemRecord) -> Result<(), StoreError> {
        let url = self.table_url(ITEMS_TABLE, "select=id");
        let response = self
            .authed(self.http.post(url))
            .header("Prefer", "return=minimal")
            .json(&record)
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    async fn list_items(&self, owner: &str) -> Result<Vec<ScannedItemRecord>, StoreError> {
        let url = self.table_url(
            ITEMS_TABLE,
            &format!(
                "owner_id=eq.{}&select=*&order=created_at.desc",
                urlencoding::encode(owner)
            ),
        );
        let rows: Vec<ScannedItemRecord> = self.fetch(url).await?;
        Ok(rows
            .into_iter()
            .map(ScannedItemRecord::without_analysis)
            .collect())
    }

    async fn get_item(&self, owner: &str, id: Uuid) -> Result<ScannedItemRecord, StoreError> {
        self.fetch_owned_item(owner, id).await
    }

    async fn update_item(
        &self,
        owner: &str,
        id: Uuid,
        update: ItemUpdate,
    ) -> Result<ScannedItemRecord, StoreError> {
        let existing = self.fetch_owned_item(owner, id).await?;
        let updated = apply_update(existing, update)?;
        self.replace_item(&updated).await?;
        Ok(updated)
    }

    async fn delete_item(&self, owner: &str, id: Uuid) -> Result<(), StoreError> {
        // existence check first so a wrong owner surfaces as 404
        self.fetch_owned_item(owner, id).await?;
        let url = self.table_url(
            ITEMS_TABLE,
            &format!("id=eq.{}&owner_id=eq.{}", id, urlencoding::encode(owner)),
        );
        let response = self
            .authed(self.http.delete(url))
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    async fn mark_listed(
        &self,
        owner: &str,
        id: Uuid,
        listing: ListingDetails,
    ) -> Result<ScannedItemRecord, StoreError> {
        let existing = self.fetch_owned_item(owner, id).await?;
        let updated = apply_listing(existing, listing)?;
        self.replace_item(&updated).await?;
        Ok(updated)
    }

    async fn mark_sold(
        &self,
        owner: &str,
        id: Uuid,
        sold_price: Option<f64>,
    ) -> Result<ScannedItemRecord, StoreError> {
        let existing = self.fetch_owned_item(owner, id).await?;
        let updated = apply_sale(existing, sold_price)?;
        self.replace_item(&updated).await?;
        Ok(updated)
    }

    async fn owner_totals(&self, owner: &str) -> Result<OwnerTotals, StoreError> {
        let url = self.table_url(
            ITEMS_TABLE,
            &format!(
                "owner_id=eq.{}&select=estimated_value,co2_saved_kg",
                urlencoding::encode(owner)
            ),
        );
        let rows: Vec<Value> = self.fetch(url).await?;
        let mut totals = OwnerTotals::default();
        for row in &rows {
            totals.total_value += row["estimated_value"].as_f64().unwrap_or(0.0);
            totals.total_co2_saved_kg += row["co2_saved_kg"].as_f64().unwrap_or(0.0);
            totals.item_count += 1;
        }
        Ok(totals)
    }

    async fn category_rollups(&self, owner: &str) -> Result<Vec<CategoryRollup>, StoreError> {
        let url = self.table_url(
            ITEMS_TABLE,
            &format!(
                "owner_id=eq.{}&select=category,estimated_value",
                urlencoding::encode(owner)
            ),
        );
        let rows: Vec<Value> = self.fetch(url).await?;
        let mut by_category = std::collections::HashMap::new();
        for row in &rows {
            let category = serde_json::from_value(row["category"].clone())
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            let entry = by_category.entry(category).or_insert(CategoryRollup {
                category,
                count: 0,
                total_value: 0.0,
            });
            entry.count += 1;
            entry.total_value += row["estimated_value"].as_f64().unwrap_or(0.0);
        }
        let mut rollups: Vec<CategoryRollup> = by_category.into_values().collect();
        rollups.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(rollups)
    }

    async fn recent_items(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<ScannedItemRecord>, StoreError> {
        let url = self.table_url(
            ITEMS_TABLE,
            &format!(
                "owner_id=eq.{}&select=*&order=created_at.desc&limit={}",
                urlencoding::encode(owner),
                limit
            ),
        );
        let rows: Vec<ScannedItemRecord> = self.fetch(url).await?;
        Ok(rows
            .into_iter()
            .map(ScannedItemRecord::without_analysis)
            .collect())
    }

    async fn migrate_owner(&self, guest: &str, user: &str) -> Result<u64, StoreError> {
        let url = self.table_url(
            ITEMS_TABLE,
            &format!("owner_id=eq.{}", urlencoding::encode(guest)),
        );
        let response = self
            .authed(self.http.patch(url))
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({
                "owner_id": user,
                "updated_at": Utc::now(),
            }))
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!("HTTP {}", response.status())));
        }
        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(rows.len() as u64)
    }

    async fn create_user(&self, user: UserRecord) -> Result<(), StoreError> {
        if self.find_user_by_email(&user.email).await?.is_some() {
            return Err(StoreError::EmailTaken);
        }
        let url = self.table_url(USERS_TABLE, "select=id");
        let response = self
            .authed(self.http.post(url))
            .header("Prefer", "return=minimal")
            .json(&user)
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        match response.status().as_u16() {
            // unique-email constraint violation from the database
            409 => Err(StoreError::EmailTaken),
            status if !response.status().is_success() => {
                Err(StoreError::Backend(format!("HTTP {status}")))
            }
            _ => Ok(()),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let url = self.table_url(
            USERS_TABLE,
            &format!(
                "email=ilike.{}&select=*&limit=1",
                urlencoding::encode(email)
            ),
        );
        let mut rows: Vec<UserRecord> = self.fetch(url).await?;
        Ok(rows.pop())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let url = self.table_url(USERS_TABLE, &format!("id=eq.{}&select=*&limit=1", id));
        let mut rows: Vec<UserRecord> = self.fetch(url).await?;
        Ok(rows.pop())
    }
}
