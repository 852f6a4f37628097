use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::analysis::{ActionPlaces, ItemIdentification, PriceEstimate, PriceHistory};
use crate::normalize::{Category, Condition, Confidence, MarketTrend, Recommendation};
use crate::pipeline::AnalyzeOutcome;
use crate::prompts::PromptInputs;
use crate::store::{ItemStatus, MarketplaceInfo, ScannedItemRecord, UserRecord};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// What the scan screen renders right after an analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub id: Uuid,
    pub item: String,
    pub value: f64,
    pub eco_impact: String,
    pub confidence: Confidence,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
    pub saved: bool,
    pub is_guest: bool,
    pub action_places: ActionPlaces,
    pub recommendation: Recommendation,
    pub stages: Vec<StageReport>,
}

impl AnalyzeResponse {
    pub fn from_outcome(outcome: AnalyzeOutcome, is_guest: bool) -> Self {
        Self {
            id: outcome.record.id,
            item: outcome.record.item_name,
            value: outcome.record.estimated_value,
            eco_impact: outcome.record.eco_summary,
            confidence: outcome.record.confidence,
            category: outcome.record.category,
            timestamp: outcome.record.created_at,
            saved: true,
            is_guest,
            action_places: outcome.result.places,
            recommendation: outcome.result.prediction.recommendation,
            stages: outcome.stages,
        }
    }
}

/// CamelCase projection of a stored record for the items API.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: Uuid,
    pub item_name: String,
    pub description: Option<String>,
    pub category: Category,
    pub estimated_value: f64,
    pub condition: Condition,
    pub co2_saved_kg: f64,
    pub eco_summary: String,
    pub confidence: Confidence,
    pub price_snapshot: PriceSnapshotView,
    pub status: ItemStatus,
    pub marketplace: MarketplaceView,
    pub tags: Vec<String>,
    pub user_notes: Option<String>,
    pub full_analysis: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshotView {
    pub current_average: f64,
    pub low: f64,
    pub high: f64,
    pub currency: String,
    pub market_trend: MarketTrend,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceView {
    pub listing_price: Option<f64>,
    pub platform: Option<String>,
    pub listing_url: Option<String>,
    pub listed_at: Option<DateTime<Utc>>,
    pub sold_price: Option<f64>,
    pub sold_at: Option<DateTime<Utc>>,
}

impl From<MarketplaceInfo> for MarketplaceView {
    fn from(info: MarketplaceInfo) -> Self {
        Self {
            listing_price: info.listing_price,
            platform: info.platform,
            listing_url: info.listing_url,
            listed_at: info.listed_at,
            sold_price: info.sold_price,
            sold_at: info.sold_at,
        }
    }
}

impl From<ScannedItemRecord> for ItemView {
    fn from(record: ScannedItemRecord) -> Self {
        Self {
            id: record.id,
            item_name: record.item_name,
            description: record.description,
            category: record.category,
            estimated_value: record.estimated_value,
            condition: record.condition,
            co2_saved_kg: record.co2_saved_kg,
            eco_summary: record.eco_summary,
            confidence: record.confidence,
            price_snapshot: PriceSnapshotView {
                current_average: record.price_snapshot.current_average,
                low: record.price_snapshot.low,
                high: record.price_snapshot.high,
                currency: record.price_snapshot.currency,
                market_trend: record.price_snapshot.market_trend,
            },
            status: record.status,
            marketplace: record.marketplace.into(),
            tags: record.tags,
            user_notes: record.user_notes,
            full_analysis: record.full_analysis,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
    /// Number of guest records re-keyed to this user, when a guest token
    /// accompanied the registration.
    pub migrated: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestResponse {
    pub token: String,
    pub guest_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for UserProfile {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoldRequest {
    #[serde(default)]
    pub sold_price: Option<f64>,
}

/// Body of the granular stage endpoints: each stage reads the upstream
/// outputs it needs from here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub identification: Option<ItemIdentification>,
    #[serde(default)]
    pub current_price: Option<PriceEstimate>,
    #[serde(default)]
    pub price_history: Option<PriceHistory>,
}

impl StageRequest {
    pub fn prompt_inputs(&self) -> PromptInputs<'_> {
        PromptInputs {
            description: self.description.as_deref(),
            identification: self.identification.as_ref(),
            current_price: self.current_price.as_ref(),
            history: self.price_history.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResponse {
    pub stage: &'static str,
    pub elapsed_ms: u128,
    pub output: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub totals: crate::store::OwnerTotals,
    pub categories: Vec<crate::store::CategoryRollup>,
    pub recent: Vec<ItemView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_view_serializes_camel_case() {
        let view = MarketplaceView {
            listing_price: Some(12.5),
            platform: Some("eBay".into()),
            listing_url: None,
            listed_at: None,
            sold_price: None,
            sold_at: None,
        };
        let json = serde_json::to_value(&view).expect("serialize");
        assert_eq!(json["listingPrice"], 12.5);
        assert!(json.get("listing_price").is_none());
        // skipped, not null
        assert!(json.get("listingUrl").is_none());
    }

    #[test]
    fn stage_request_maps_to_prompt_inputs() {
        let request: StageRequest = serde_json::from_str(
            r#"{
                "description": "old record player",
                "identification": {"itemName": "Technics SL-1200"}
            }"#,
        )
        .expect("parse");
        let inputs = request.prompt_inputs();
        assert_eq!(inputs.description, Some("old record player"));
        assert!(inputs.identification.is_some());
        assert!(inputs.current_price.is_none());
    }
}
