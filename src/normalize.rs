//! Maps the model's free-text categorical fields onto the closed enumerations
//! persisted with every record. Each enum has one synonym table and one
//! documented default; normalization is idempotent.

use serde::{Deserialize, Serialize};

use crate::analysis::PriceHistoryPoint;

pub const MAX_HISTORY_POINTS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Electronics,
    Furniture,
    Clothing,
    Books,
    Toys,
    #[serde(rename = "Home Decor")]
    HomeDecor,
    Sports,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Electronics => "Electronics",
            Category::Furniture => "Furniture",
            Category::Clothing => "Clothing",
            Category::Books => "Books",
            Category::Toys => "Toys",
            Category::HomeDecor => "Home Decor",
            Category::Sports => "Sports",
            Category::Other => "Other",
        }
    }

    /// Default: `Other`.
    pub fn normalize(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        match lowered.as_str() {
            "electronics" => return Category::Electronics,
            "furniture" => return Category::Furniture,
            "clothing" => return Category::Clothing,
            "books" => return Category::Books,
            "toys" => return Category::Toys,
            "home decor" => return Category::HomeDecor,
            "sports" => return Category::Sports,
            "other" => return Category::Other,
            _ => {}
        }
        const TABLE: &[(&str, Category)] = &[
            ("electronic", Category::Electronics),
            ("phone", Category::Electronics),
            ("laptop", Category::Electronics),
            ("computer", Category::Electronics),
            ("tablet", Category::Electronics),
            ("camera", Category::Electronics),
            ("console", Category::Electronics),
            ("gaming", Category::Electronics),
            ("headphone", Category::Electronics),
            ("audio", Category::Electronics),
            ("appliance", Category::Electronics),
            ("tv", Category::Electronics),
            ("furniture", Category::Furniture),
            ("chair", Category::Furniture),
            ("table", Category::Furniture),
            ("sofa", Category::Furniture),
            ("couch", Category::Furniture),
            ("desk", Category::Furniture),
            ("dresser", Category::Furniture),
            ("shelf", Category::Furniture),
            ("apparel", Category::Clothing),
            ("cloth", Category::Clothing),
            ("shoe", Category::Clothing),
            ("sneaker", Category::Clothing),
            ("jacket", Category::Clothing),
            ("fashion", Category::Clothing),
            ("handbag", Category::Clothing),
            ("book", Category::Books),
            ("novel", Category::Books),
            ("textbook", Category::Books),
            ("magazine", Category::Books),
            ("comic", Category::Books),
            ("toy", Category::Toys),
            ("lego", Category::Toys),
            ("doll", Category::Toys),
            ("puzzle", Category::Toys),
            ("board game", Category::Toys),
            ("decor", Category::HomeDecor),
            ("lamp", Category::HomeDecor),
            ("vase", Category::HomeDecor),
            ("candle", Category::HomeDecor),
            ("artwork", Category::HomeDecor),
            ("rug", Category::HomeDecor),
            ("sport", Category::Sports),
            ("bicycle", Category::Sports),
            ("bike", Category::Sports),
            ("fitness", Category::Sports),
            ("golf", Category::Sports),
            ("outdoor", Category::Sports),
        ];
        for (keyword, category) in TABLE {
            if lowered.contains(keyword) {
                return *category;
            }
        }
        Category::Other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    New,
    #[serde(rename = "Like New")]
    LikeNew,
    Good,
    Fair,
    Poor,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "New",
            Condition::LikeNew => "Like New",
            Condition::Good => "Good",
            Condition::Fair => "Fair",
            Condition::Poor => "Poor",
        }
    }

    /// Default: `Good`.
    pub fn normalize(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        // Longer phrases first so "like new" never matches the bare "new" arm.
        const TABLE: &[(&str, Condition)] = &[
            ("like new", Condition::LikeNew),
            ("like-new", Condition::LikeNew),
            ("open box", Condition::LikeNew),
            ("excellent", Condition::LikeNew),
            ("refurbished", Condition::LikeNew),
            ("mint", Condition::LikeNew),
            ("brand new", Condition::New),
            ("sealed", Condition::New),
            ("unopened", Condition::New),
            ("new", Condition::New),
            ("good", Condition::Good),
            ("used", Condition::Good),
            ("working", Condition::Good),
            ("vintage", Condition::Good),
            ("fair", Condition::Fair),
            ("acceptable", Condition::Fair),
            ("worn", Condition::Fair),
            ("scratched", Condition::Fair),
            ("poor", Condition::Poor),
            ("damaged", Condition::Poor),
            ("broken", Condition::Poor),
            ("for parts", Condition::Poor),
        ];
        for (keyword, condition) in TABLE {
            if lowered.contains(keyword) {
                return *condition;
            }
        }
        Condition::Good
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    /// Default: `medium`.
    pub fn normalize(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        const TABLE: &[(&str, Confidence)] = &[
            ("very high", Confidence::High),
            ("high", Confidence::High),
            ("strong", Confidence::High),
            ("medium", Confidence::Medium),
            ("moderate", Confidence::Medium),
            ("low", Confidence::Low),
            ("weak", Confidence::Low),
            ("uncertain", Confidence::Low),
        ];
        for (keyword, confidence) in TABLE {
            if lowered.contains(keyword) {
                return *confidence;
            }
        }
        Confidence::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketTrend {
    Rising,
    Stable,
    Falling,
}

impl MarketTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketTrend::Rising => "rising",
            MarketTrend::Stable => "stable",
            MarketTrend::Falling => "falling",
        }
    }

    /// Default: `stable`. "declining" is a documented synonym of `falling`.
    pub fn normalize(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        const TABLE: &[(&str, MarketTrend)] = &[
            ("rising", MarketTrend::Rising),
            ("increasing", MarketTrend::Rising),
            ("upward", MarketTrend::Rising),
            ("growing", MarketTrend::Rising),
            ("up", MarketTrend::Rising),
            ("falling", MarketTrend::Falling),
            ("declining", MarketTrend::Falling),
            ("decreasing", MarketTrend::Falling),
            ("downward", MarketTrend::Falling),
            ("dropping", MarketTrend::Falling),
            ("down", MarketTrend::Falling),
            ("stable", MarketTrend::Stable),
            ("flat", MarketTrend::Stable),
            ("steady", MarketTrend::Stable),
        ];
        for (keyword, trend) in TABLE {
            if lowered.contains(keyword) {
                return *trend;
            }
        }
        MarketTrend::Stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Up,
    Down,
    Stable,
}

impl PriceDirection {
    /// Default: `stable`.
    pub fn normalize(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        if lowered.contains("up") || lowered.contains("ris") || lowered.contains("increas") {
            PriceDirection::Up
        } else if lowered.contains("down") || lowered.contains("fall") || lowered.contains("declin")
        {
            PriceDirection::Down
        } else {
            PriceDirection::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Hold,
    Sell,
}

impl Recommendation {
    /// Default: `HOLD`.
    pub fn normalize(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("sell") {
            Recommendation::Sell
        } else {
            Recommendation::Hold
        }
    }
}

/// Restores the `low <= average <= high` invariant the model is asked for but
/// does not always honor. The three quotes are reordered rather than rejected.
pub fn repair_price_band(low: f64, average: f64, high: f64) -> (f64, f64, f64) {
    let mut band = [low, average, high];
    band.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    (band[0], band[1], band[2])
}

/// Orders history oldest to newest and caps it at [`MAX_HISTORY_POINTS`].
/// Ascending order is this service's contract; the model returns either.
pub fn normalize_history(mut points: Vec<PriceHistoryPoint>) -> Vec<PriceHistoryPoint> {
    points.sort_by_key(|point| point.date);
    points.truncate(MAX_HISTORY_POINTS);
    points
}
