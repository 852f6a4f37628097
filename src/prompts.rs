//! Prompt construction for each analysis stage. Every builder is a pure
//! function of its structured inputs and embeds an explicit JSON output
//! contract so the extractor has a well-defined job.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::{ItemIdentification, PriceEstimate, PriceHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    Identify,
    CurrentPrice,
    PriceHistory,
    Prediction,
    Impact,
    Suggestions,
}

impl AnalysisStage {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisStage::Identify => "identify",
            AnalysisStage::CurrentPrice => "current_price",
            AnalysisStage::PriceHistory => "price_history",
            AnalysisStage::Prediction => "prediction",
            AnalysisStage::Impact => "impact",
            AnalysisStage::Suggestions => "suggestions",
        }
    }
}

/// Upstream outputs a stage prompt may require. The full pipeline always has
/// them by construction; the granular stage API supplies whatever the caller
/// sent, and a gap surfaces as a sequencing error here.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub description: Option<&'a str>,
    pub identification: Option<&'a ItemIdentification>,
    pub current_price: Option<&'a PriceEstimate>,
    pub history: Option<&'a PriceHistory>,
}

#[derive(Debug, Error)]
#[error("stage `{stage}` requires the `{missing}` output, which is not available yet")]
pub struct PromptError {
    pub stage: &'static str,
    pub missing: &'static str,
}

pub fn build_prompt(stage: AnalysisStage, inputs: &PromptInputs<'_>) -> Result<String, PromptError> {
    match stage {
        AnalysisStage::Identify => Ok(identification_prompt(inputs.description)),
        AnalysisStage::CurrentPrice => {
            Ok(current_price_prompt(require_item(stage, inputs)?))
        }
        AnalysisStage::PriceHistory => Ok(price_history_prompt(require_item(stage, inputs)?)),
        AnalysisStage::Prediction => {
            let item = require_item(stage, inputs)?;
            let price = inputs.current_price.ok_or(PromptError {
                stage: stage.name(),
                missing: "current_price",
            })?;
            let history = inputs.history.ok_or(PromptError {
                stage: stage.name(),
                missing: "price_history",
            })?;
            Ok(prediction_prompt(item, price, history))
        }
        AnalysisStage::Impact => Ok(impact_prompt(require_item(stage, inputs)?)),
        AnalysisStage::Suggestions => {
            let value_hint = inputs.current_price.map(|price| price.average_price);
            Ok(suggestions_prompt(require_item(stage, inputs)?, value_hint))
        }
    }
}

fn require_item<'a>(
    stage: AnalysisStage,
    inputs: &PromptInputs<'a>,
) -> Result<&'a ItemIdentification, PromptError> {
    inputs.identification.ok_or(PromptError {
        stage: stage.name(),
        missing: "identify",
    })
}

const JSON_ONLY: &str =
    "IMPORTANT: Respond ONLY with valid JSON matching this shape. Do not include any text outside the JSON structure.";

fn identification_prompt(description: Option<&str>) -> String {
    let context = match description {
        Some(text) => format!(
            "\n\nADDITIONAL CONTEXT PROVIDED BY USER:\n{text}\n\nUse this information to help identify the specific model and details."
        ),
        None => String::new(),
    };
    format!(
        r#"Analyze this item and identify it with MAXIMUM SPECIFICITY. Provide:
1. Item name/title (be VERY specific - include exact brand, model number, version, year, variant, SKU if visible)
2. Category (be specific - e.g., "Gaming Laptop" not just "Laptop")
3. Condition assessment (new, used, like new, refurbished, vintage, etc.)
4. Specific identifiable features: exact model number or SKU, color/finish variant, storage capacity or size, manufacturing year, edition details
5. Brand and product line{context}

Be as specific as possible. For example, instead of "iPhone", say "iPhone 15 Pro Max 256GB Natural Titanium". When the user-provided context names an exact model, carry it verbatim into specificModel.

{JSON_ONLY}
{{
  "itemName": "<string>",
  "category": "<string>",
  "condition": "<string>",
  "specificModel": "<string>",
  "brand": "<string>",
  "features": ["<string>"],
  "specifications": {{}}
}}"#
    )
}

fn item_block(item: &ItemIdentification) -> String {
    serde_json::to_string_pretty(item).unwrap_or_default()
}

fn current_price_prompt(item: &ItemIdentification) -> String {
    format!(
        r#"You are a market pricing expert. Based on your knowledge of current market conditions and online marketplaces, provide the current market price for this SPECIFIC item:

ITEM DETAILS:
{details}

Use the SPECIFIC model and variant information provided; different variants can have significantly different prices. All price fields must be plain numbers.

{JSON_ONLY}
{{
  "averagePrice": <number>,
  "priceRange": {{ "lowest": <number>, "highest": <number> }},
  "currency": "USD",
  "marketConditions": "<brief description of the current market for this model>"
}}"#,
        details = item_block(item)
    )
}

fn price_history_prompt(item: &ItemIdentification) -> String {
    format!(
        r#"You are a market analyst. Based on your knowledge of historical pricing data and market trends, provide the price history for this SPECIFIC item over the past 30 days:

ITEM DETAILS:
{details}

Include up to 30 data points if available, or fewer if limited data exists. Order them from oldest to newest, use ISO dates, and keep prices as plain numbers.

{JSON_ONLY}
{{
  "priceHistory": [
    {{ "price": <number>, "date": "<ISO date>", "condition": "<condition>", "source": "<marketplace>" }}
  ],
  "dataAvailability": "full|partial|limited",
  "historicalTrend": "increasing|decreasing|stable"
}}"#,
        details = item_block(item)
    )
}

fn prediction_prompt(
    item: &ItemIdentification,
    price: &PriceEstimate,
    history: &PriceHistory,
) -> String {
    format!(
        r#"You are a market analyst. Analyze this SPECIFIC item and provide a comprehensive price prediction.

ITEM DETAILS:
{details}

CURRENT MARKET PRICE:
{price}

PRICE HISTORY:
{history}

Consider price trends in the historical data, current demand for this variant, seasonal effects, supply and demand, and model-specific factors (age, rarity, popularity).

{JSON_ONLY}
{{
  "predictedPrice": <number>,
  "priceDirection": "up|down|stable",
  "confidence": "high|medium|low",
  "reasoning": "<explanation of the prediction>",
  "marketFactors": ["<factor>"],
  "newsImpact": "<any recent news affecting prices>",
  "marketTrend": "<overall market trend analysis>",
  "recommendation": "HOLD|SELL",
  "recommendationReason": "<explanation for the recommendation>"
}}"#,
        details = item_block(item),
        price = serde_json::to_string_pretty(price).unwrap_or_default(),
        history = serde_json::to_string_pretty(history).unwrap_or_default(),
    )
}

fn impact_prompt(item: &ItemIdentification) -> String {
    format!(
        r#"You are a sustainability analyst. Estimate the environmental impact of reselling or donating this SPECIFIC item instead of discarding it:

ITEM DETAILS:
{details}

Base the estimate on typical manufacturing, transportation, and disposal emissions for this product class. All numeric fields must be plain numbers.

{JSON_ONLY}
{{
  "co2SavedKg": <number>,
  "co2SavedLbs": <number>,
  "equivalentTrees": <integer>,
  "equivalentCarMiles": <integer>,
  "breakdown": {{ "manufacturing": <number>, "transportation": <number>, "disposalAvoided": <number> }},
  "narrativeImpact": "<one sentence on what reuse avoids>",
  "comparisonMetric": "<relatable comparison>"
}}"#,
        details = item_block(item)
    )
}

fn suggestions_prompt(item: &ItemIdentification, value_hint: Option<f64>) -> String {
    let value_line = match value_hint {
        Some(value) => format!("Estimated resale value: ${value:.2}.\n"),
        None => String::new(),
    };
    format!(
        r#"I have a {name} ({category} category). {value_line}Suggest concrete places to SELL, DONATE, and RECYCLE this item. Provide up to 5 entries per list; leave a list empty if there are no good options for that action. Ratings are 0-5.

{JSON_ONLY}
{{
  "selling": [
    {{ "name": "<platform or store>", "address": "<string>", "phone": "<string>", "website": "<string>", "rating": <number>, "description": "<string>", "specialInstructions": "<string>", "hours": "<string>" }}
  ],
  "donation": [],
  "recycling": []
}}"#,
        name = item.item_name,
        category = item.category,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> ItemIdentification {
        ItemIdentification {
            item_name: "iPhone 15 Pro Max 256GB Natural Titanium".into(),
            category: "Smartphone".into(),
            condition: "like new".into(),
            specific_model: Some("iPhone 15 Pro Max 256GB Natural Titanium".into()),
            brand: Some("Apple".into()),
            features: vec!["256GB".into()],
            specifications: None,
        }
    }

    #[test]
    fn every_stage_prompt_demands_json_only() {
        let item = sample_item();
        let price = PriceEstimate {
            average_price: 1000.0,
            price_range: crate::analysis::PriceRange {
                lowest: 900.0,
                highest: 1100.0,
            },
            currency: "USD".into(),
            market_conditions: None,
        };
        let history = PriceHistory {
            price_history: vec![],
            data_availability: None,
            historical_trend: None,
        };
        let inputs = PromptInputs {
            description: Some("used phone"),
            identification: Some(&item),
            current_price: Some(&price),
            history: Some(&history),
        };
        for stage in [
            AnalysisStage::Identify,
            AnalysisStage::CurrentPrice,
            AnalysisStage::PriceHistory,
            AnalysisStage::Prediction,
            AnalysisStage::Impact,
            AnalysisStage::Suggestions,
        ] {
            let prompt = build_prompt(stage, &inputs).expect("prompt");
            assert!(prompt.contains("Respond ONLY with valid JSON"), "{stage:?}");
        }
    }

    #[test]
    fn prompts_are_deterministic() {
        let item = sample_item();
        let inputs = PromptInputs {
            identification: Some(&item),
            ..Default::default()
        };
        let first = build_prompt(AnalysisStage::CurrentPrice, &inputs).expect("prompt");
        let second = build_prompt(AnalysisStage::CurrentPrice, &inputs).expect("prompt");
        assert_eq!(first, second);
        assert!(first.contains("iPhone 15 Pro Max"));
    }

    #[test]
    fn identification_embeds_user_description() {
        let inputs = PromptInputs {
            description: Some("a red stand mixer, model KSM150"),
            ..Default::default()
        };
        let prompt = build_prompt(AnalysisStage::Identify, &inputs).expect("prompt");
        assert!(prompt.contains("a red stand mixer, model KSM150"));
    }

    #[test]
    fn history_before_identification_is_a_sequencing_error() {
        let err = build_prompt(AnalysisStage::PriceHistory, &PromptInputs::default()).unwrap_err();
        assert_eq!(err.stage, "price_history");
        assert_eq!(err.missing, "identify");
    }

    #[test]
    fn prediction_requires_price_and_history() {
        let item = sample_item();
        let inputs = PromptInputs {
            identification: Some(&item),
            ..Default::default()
        };
        let err = build_prompt(AnalysisStage::Prediction, &inputs).unwrap_err();
        assert_eq!(err.missing, "current_price");
    }
}
