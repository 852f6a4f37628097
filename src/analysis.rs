//! Typed shapes for each pipeline stage's model output, plus the aggregated
//! analysis record. Stage structs mirror the JSON contract embedded in the
//! prompts; deserializers stay permissive about number-vs-string because the
//! model does not reliably honor numeric-only constraints.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::normalize::{
    Category, Condition, Confidence, MarketTrend, PriceDirection, Recommendation,
};

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemIdentification {
    pub item_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub condition: String,
    pub specific_model: Option<String>,
    pub brand: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    pub specifications: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEstimate {
    #[serde(deserialize_with = "flexible_f64")]
    pub average_price: f64,
    pub price_range: PriceRange,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub market_conditions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRange {
    #[serde(deserialize_with = "flexible_f64")]
    pub lowest: f64,
    #[serde(deserialize_with = "flexible_f64")]
    pub highest: f64,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistory {
    #[serde(default)]
    pub price_history: Vec<PriceHistoryPoint>,
    #[serde(default)]
    pub data_availability: Option<String>,
    #[serde(default)]
    pub historical_trend: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistoryPoint {
    #[serde(deserialize_with = "flexible_f64")]
    pub price: f64,
    #[serde(deserialize_with = "flexible_date")]
    pub date: NaiveDate,
    pub condition: Option<String>,
    pub source: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionReply {
    #[serde(deserialize_with = "flexible_f64")]
    pub predicted_price: f64,
    #[serde(default)]
    pub price_direction: String,
    #[serde(default)]
    pub confidence: String,
    pub reasoning: Option<String>,
    #[serde(default)]
    pub market_factors: Vec<String>,
    pub news_impact: Option<String>,
    pub market_trend: Option<String>,
    #[serde(default)]
    pub recommendation: String,
    pub recommendation_reason: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentalImpact {
    #[serde(deserialize_with = "flexible_f64")]
    pub co2_saved_kg: f64,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub co2_saved_lbs: Option<f64>,
    #[serde(default, deserialize_with = "flexible_i64")]
    pub equivalent_trees: i64,
    #[serde(default, deserialize_with = "flexible_i64")]
    pub equivalent_car_miles: i64,
    pub breakdown: Option<ImpactBreakdown>,
    pub narrative_impact: Option<String>,
    pub comparison_metric: Option<String>,
}

impl EnvironmentalImpact {
    pub fn display_summary(&self) -> String {
        format!("{:.1} kg CO₂ saved", self.co2_saved_kg)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactBreakdown {
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub manufacturing: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub transportation: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub disposal_avoided: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceKind {
    Selling,
    Donation,
    Recycling,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlace {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub rating: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    pub special_instructions: Option<String>,
    pub hours: Option<String>,
}

pub const MAX_PLACES_PER_KIND: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlaces {
    #[serde(default)]
    pub selling: Vec<ActionPlace>,
    #[serde(default)]
    pub donation: Vec<ActionPlace>,
    #[serde(default)]
    pub recycling: Vec<ActionPlace>,
}

impl ActionPlaces {
    /// Clamps ratings into [0, 5] and each list to [`MAX_PLACES_PER_KIND`].
    pub fn bounded(mut self) -> Self {
        for list in [&mut self.selling, &mut self.donation, &mut self.recycling] {
            list.truncate(MAX_PLACES_PER_KIND);
            for place in list.iter_mut() {
                if let Some(rating) = place.rating.as_mut() {
                    *rating = rating.clamp(0.0, 5.0);
                }
            }
        }
        self
    }
}

/// The aggregated, normalized output of one complete analysis. Serialized
/// verbatim into the record's raw-analysis blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub identification: ItemIdentification,
    pub category: Category,
    pub condition: Condition,
    pub confidence: Confidence,
    pub pricing: PricingSnapshot,
    pub price_history: Vec<PriceHistoryPoint>,
    pub prediction: PredictionSummary,
    pub impact: EnvironmentalImpact,
    pub places: ActionPlaces,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingSnapshot {
    pub average: f64,
    pub low: f64,
    pub high: f64,
    pub currency: String,
    #[serde(default)]
    pub market_conditions: Option<String>,
    pub market_trend: MarketTrend,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSummary {
    pub predicted_price: f64,
    pub direction: PriceDirection,
    pub confidence: Confidence,
    pub reasoning: Option<String>,
    #[serde(default)]
    pub market_factors: Vec<String>,
    pub recommendation: Recommendation,
    pub recommendation_reason: Option<String>,
}

fn flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }
    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(text) => text
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .map_err(serde::de::Error::custom),
    }
}

fn flexible_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeNumber {
        Number(f64),
        Text(String),
        Nothing(Option<()>),
    }
    match Option::<MaybeNumber>::deserialize(deserializer)? {
        Some(MaybeNumber::Number(value)) => Ok(Some(value)),
        Some(MaybeNumber::Text(text)) => Ok(text
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .ok()),
        _ => Ok(None),
    }
}

fn flexible_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    flexible_f64(deserializer).map(|value| value.round() as i64)
}

/// Accepts either a bare calendar date or a full ISO timestamp.
fn flexible_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let trimmed = raw.trim();
    if let Ok(date) = trimmed.parse::<NaiveDate>() {
        return Ok(date);
    }
    trimmed
        .parse::<DateTime<Utc>>()
        .map(|stamp| stamp.date_naive())
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identification_parses_model_shape() {
        let raw = r#"{
            "itemName": "iPhone 15 Pro Max 256GB Natural Titanium",
            "category": "Smartphone",
            "condition": "like new",
            "specificModel": "iPhone 15 Pro Max 256GB Natural Titanium",
            "brand": "Apple",
            "features": ["256GB storage", "Natural Titanium finish"],
            "specifications": {"storage": "256GB"}
        }"#;
        let item: ItemIdentification = serde_json::from_str(raw).expect("parse");
        assert_eq!(item.brand.as_deref(), Some("Apple"));
        assert_eq!(item.features.len(), 2);
    }

    #[test]
    fn price_estimate_tolerates_string_numbers() {
        let raw = r#"{
            "averagePrice": "1,049.99",
            "priceRange": {"lowest": 900, "highest": "$1200"},
            "marketConditions": "steady demand"
        }"#;
        let estimate: PriceEstimate = serde_json::from_str(raw).expect("parse");
        assert_eq!(estimate.average_price, 1049.99);
        assert_eq!(estimate.price_range.highest, 1200.0);
        assert_eq!(estimate.currency, "USD");
    }

    #[test]
    fn history_point_accepts_timestamp_dates() {
        let raw = r#"{"price": 950, "date": "2025-05-14T00:00:00Z", "source": "eBay"}"#;
        let point: PriceHistoryPoint = serde_json::from_str(raw).expect("parse");
        assert_eq!(point.date.to_string(), "2025-05-14");
    }

    #[test]
    fn action_places_bounded() {
        let place = ActionPlace {
            name: "Goodwill".into(),
            address: None,
            phone: None,
            website: None,
            rating: Some(8.2),
            description: None,
            special_instructions: None,
            hours: None,
        };
        let places = ActionPlaces {
            selling: vec![place.clone(); 9],
            donation: vec![place.clone()],
            recycling: vec![],
        }
        .bounded();
        assert_eq!(places.selling.len(), MAX_PLACES_PER_KIND);
        assert_eq!(places.donation[0].rating, Some(5.0));
    }
}
