use crate::analysis::{
    ActionPlace, ActionPlaces, AnalysisResult, EnvironmentalImpact, ItemIdentification,
    PredictionReply, PredictionSummary, PriceEstimate, PriceHistory, PricingSnapshot,
};
use crate::extract::{ExtractError, extract_json, extract_json_object};
use crate::llm::{GeminiClient, GenerationParams, InlineImage, LlmError};
use crate::models::StageReport;
use crate::normalize::{
    Category, Condition, Confidence, MarketTrend, PriceDirection, Recommendation,
    normalize_history, repair_price_band,
};
use crate::prompts::{AnalysisStage, PromptError, PromptInputs, build_prompt};
use crate::store::{
    Datastore, ItemStatus, MarketplaceInfo, PriceSnapshot, ScannedItemRecord, derive_tags,
};
use chrono::Utc;
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct Pipeline {
    pub llm: Arc<GeminiClient>,
    pub store: Arc<dyn Datastore>,
}

/// One analysis request: a photo, a text description, or both.
#[derive(Debug, Default)]
pub struct AnalyzeInput {
    pub description: Option<String>,
    pub image: Option<InlineImage>,
}

#[derive(Debug)]
pub struct AnalyzeOutcome {
    pub record: ScannedItemRecord,
    pub result: AnalysisResult,
    pub stages: Vec<StageReport>,
}

impl Pipeline {
    pub fn new(llm: Arc<GeminiClient>, store: Arc<dyn Datastore>) -> Self {
        Self { llm, store }
    }

    pub fn from_env() -> Self {
        Self::new(Arc::new(GeminiClient::from_env()), crate::store::from_env())
    }

    /// Runs one stage on caller-supplied upstream outputs. Backs the granular
    /// stage endpoints; missing upstream data surfaces as a sequencing error.
    pub async fn run_stage(
        &self,
        stage: AnalysisStage,
        inputs: &PromptInputs<'_>,
        image: Option<&InlineImage>,
    ) -> Result<StageOutcome<Value>, PipelineError> {
        let prompt = build_prompt(stage, inputs)?;
        let raw = self
            .llm
            .generate(&prompt, image, params_for(stage))
            .await
            .map_err(|err| PipelineError::from_llm(stage.name(), err))?;
        let value = extract_json_object(&raw)
            .map_err(|err| PipelineError::from_extract(stage.name(), err))?;
        Ok(StageOutcome::new(value.clone(), value))
    }

    /// The full analysis: identify, then price/history/impact/suggestions in
    /// parallel, then the price prediction, then one write of the aggregate.
    /// Nothing is persisted unless every required stage succeeded.
    pub async fn run(
        &self,
        input: AnalyzeInput,
        owner_id: &str,
    ) -> Result<AnalyzeOutcome, PipelineError> {
        if input.image.is_none()
            && input
                .description
                .as_deref()
                .is_none_or(|text| text.trim().is_empty())
        {
            return Err(PipelineError::invalid_input(
                "identify",
                "provide an image, a description, or both",
            ));
        }

        let mut stages = Vec::new();

        let identification = self
            .capture_stage("identify", &mut stages, {
                let description = input.description.clone();
                let image = input.image.as_ref();
                async move {
                    stages::identify(&self.llm, description.as_deref(), image).await
                }
            })
            .await?;

        let ((price, price_ms), (history, history_ms), (impact, impact_ms), (places, places_ms)) =
            tokio::try_join!(
                timed(stages::current_price(&self.llm, &identification)),
                timed(stages::price_history(&self.llm, &identification)),
                timed(stages::impact(&self.llm, &identification)),
                timed(stages::suggestions(&self.llm, &identification)),
            )?;
        for (name, elapsed_ms, output) in [
            ("current_price", price_ms, price.output),
            ("price_history", history_ms, history.output),
            ("impact", impact_ms, impact.output),
            ("suggestions", places_ms, places.output),
        ] {
            crate::metrics::stage_elapsed(name, elapsed_ms);
            stages.push(StageReport::new(name, elapsed_ms, output));
        }

        let prediction = self
            .capture_stage("prediction", &mut stages, {
                stages::prediction(&self.llm, &identification, &price.value, &history.value)
            })
            .await?;

        let result = aggregate(
            identification,
            price.value,
            history.value,
            prediction,
            impact.value,
            places.value,
        );
        let record = record_from_result(&result, owner_id)?;
        self.store
            .insert_item(record.clone())
            .await
            .map_err(|err| PipelineError::persistence("persist", err.to_string()))?;
        crate::metrics::analysis_completed(result.category.as_str());

        Ok(AnalyzeOutcome {
            record,
            result,
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

async fn timed<T, Fut>(fut: Fut) -> Result<(StageOutcome<T>, u128), PipelineError>
where
    Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
{
    let started = Instant::now();
    let outcome = fut.await?;
    Ok((outcome, started.elapsed().as_millis()))
}

pub fn params_for(stage: AnalysisStage) -> GenerationParams {
    match stage {
        AnalysisStage::Identify => GenerationParams {
            temperature: 0.2,
            max_output_tokens: 1024,
        },
        AnalysisStage::CurrentPrice => GenerationParams {
            temperature: 0.1,
            max_output_tokens: 512,
        },
        AnalysisStage::PriceHistory => GenerationParams {
            temperature: 0.2,
            max_output_tokens: 2048,
        },
        AnalysisStage::Prediction => GenerationParams {
            temperature: 0.3,
            max_output_tokens: 1024,
        },
        AnalysisStage::Impact => GenerationParams {
            temperature: 0.4,
            max_output_tokens: 768,
        },
        AnalysisStage::Suggestions => GenerationParams {
            temperature: 0.7,
            max_output_tokens: 1000,
        },
    }
}

/// Folds the six stage outputs into one normalized result. Pure so the
/// normalization rules are testable without a model in the loop.
fn aggregate(
    identification: ItemIdentification,
    price: PriceEstimate,
    history: PriceHistory,
    prediction: PredictionReply,
    impact: EnvironmentalImpact,
    places: ActionPlaces,
) -> AnalysisResult {
    let category = Category::normalize(&identification.category);
    let condition = Condition::normalize(&identification.condition);
    let confidence = Confidence::normalize(&prediction.confidence);

    let (low, average, high) = repair_price_band(
        price.price_range.lowest,
        price.average_price,
        price.price_range.highest,
    );
    let trend_source = history
        .historical_trend
        .as_deref()
        .or(prediction.market_trend.as_deref())
        .unwrap_or("stable");
    let market_trend = MarketTrend::normalize(trend_source);

    AnalysisResult {
        category,
        condition,
        confidence,
        pricing: PricingSnapshot {
            average,
            low,
            high,
            currency: price.currency,
            market_conditions: price.market_conditions,
            market_trend,
        },
        price_history: normalize_history(history.price_history),
        prediction: PredictionSummary {
            predicted_price: prediction.predicted_price,
            direction: PriceDirection::normalize(&prediction.price_direction),
            confidence: Confidence::normalize(&prediction.confidence),
            reasoning: prediction.reasoning,
            market_factors: prediction.market_factors,
            recommendation: Recommendation::normalize(&prediction.recommendation),
            recommendation_reason: prediction.recommendation_reason,
        },
        impact,
        places: places.bounded(),
        identification,
        analyzed_at: Utc::now(),
    }
}

fn record_from_result(
    result: &AnalysisResult,
    owner_id: &str,
) -> Result<ScannedItemRecord, PipelineError> {
    let full_analysis = serde_json::to_value(result)
        .map_err(|err| PipelineError::internal("persist", err.to_string()))?;
    let now = Utc::now();
    Ok(ScannedItemRecord {
        id: Uuid::new_v4(),
        owner_id: owner_id.to_string(),
        item_name: result.identification.item_name.clone(),
        description: None,
        category: result.category,
        estimated_value: result.pricing.average,
        condition: result.condition,
        co2_saved_kg: result.impact.co2_saved_kg,
        eco_summary: result.impact.display_summary(),
        confidence: result.confidence,
        price_snapshot: PriceSnapshot {
            current_average: result.pricing.average,
            low: result.pricing.low,
            high: result.pricing.high,
            currency: result.pricing.currency.clone(),
            market_trend: result.pricing.market_trend,
        },
        full_analysis: Some(full_analysis),
        status: ItemStatus::Scanned,
        marketplace: MarketplaceInfo::default(),
        tags: derive_tags(&result.identification.item_name, result.category),
        user_notes: None,
        created_at: now,
        updated_at: now,
    })
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Sequencing,
    ModelUnavailable,
    ResponseParse,
    Persistence,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn model_unavailable(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::ModelUnavailable,
        }
    }

    pub fn response_parse(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::ResponseParse,
        }
    }

    pub fn persistence(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Persistence,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    fn from_llm(stage: &'static str, err: LlmError) -> Self {
        Self::model_unavailable(stage, err.to_string())
    }

    fn from_extract(stage: &'static str, err: ExtractError) -> Self {
        Self::response_parse(stage, err.to_string())
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

impl From<PromptError> for PipelineError {
    fn from(err: PromptError) -> Self {
        Self {
            stage: err.stage,
            message: err.to_string(),
            kind: PipelineErrorKind::Sequencing,
        }
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::*;

    pub async fn identify(
        llm: &GeminiClient,
        description: Option<&str>,
        image: Option<&InlineImage>,
    ) -> Result<StageOutcome<ItemIdentification>, PipelineError> {
        let item: ItemIdentification = typed_stage(
            llm,
            AnalysisStage::Identify,
            &PromptInputs {
                description,
                ..PromptInputs::default()
            },
            image,
        )
        .await?;
        let output = json!({
            "itemName": item.item_name,
            "brand": item.brand,
            "category": item.category,
            "condition": item.condition,
            "featureCount": item.features.len(),
        });
        Ok(StageOutcome::new(item, output))
    }

    pub async fn current_price(
        llm: &GeminiClient,
        item: &ItemIdentification,
    ) -> Result<StageOutcome<PriceEstimate>, PipelineError> {
        let estimate: PriceEstimate = typed_stage(
            llm,
            AnalysisStage::CurrentPrice,
            &PromptInputs {
                identification: Some(item),
                ..PromptInputs::default()
            },
            None,
        )
        .await?;
        let output = json!({
            "averagePrice": estimate.average_price,
            "lowest": estimate.price_range.lowest,
            "highest": estimate.price_range.highest,
            "currency": estimate.currency,
        });
        Ok(StageOutcome::new(estimate, output))
    }

    pub async fn price_history(
        llm: &GeminiClient,
        item: &ItemIdentification,
    ) -> Result<StageOutcome<PriceHistory>, PipelineError> {
        let history: PriceHistory = typed_stage(
            llm,
            AnalysisStage::PriceHistory,
            &PromptInputs {
                identification: Some(item),
                ..PromptInputs::default()
            },
            None,
        )
        .await?;
        let output = json!({
            "points": history.price_history.len(),
            "dataAvailability": history.data_availability,
            "historicalTrend": history.historical_trend,
        });
        Ok(StageOutcome::new(history, output))
    }

    pub async fn prediction(
        llm: &GeminiClient,
        item: &ItemIdentification,
        price: &PriceEstimate,
        history: &PriceHistory,
    ) -> Result<StageOutcome<PredictionReply>, PipelineError> {
        let reply: PredictionReply = typed_stage(
            llm,
            AnalysisStage::Prediction,
            &PromptInputs {
                identification: Some(item),
                current_price: Some(price),
                history: Some(history),
                ..PromptInputs::default()
            },
            None,
        )
        .await?;
        let output = json!({
            "predictedPrice": reply.predicted_price,
            "priceDirection": reply.price_direction,
            "recommendation": reply.recommendation,
            "confidence": reply.confidence,
        });
        Ok(StageOutcome::new(reply, output))
    }

    pub async fn impact(
        llm: &GeminiClient,
        item: &ItemIdentification,
    ) -> Result<StageOutcome<EnvironmentalImpact>, PipelineError> {
        let impact: EnvironmentalImpact = typed_stage(
            llm,
            AnalysisStage::Impact,
            &PromptInputs {
                identification: Some(item),
                ..PromptInputs::default()
            },
            None,
        )
        .await?;
        let output = json!({
            "co2SavedKg": impact.co2_saved_kg,
            "equivalentTrees": impact.equivalent_trees,
            "equivalentCarMiles": impact.equivalent_car_miles,
        });
        Ok(StageOutcome::new(impact, output))
    }

    /// The one soft stage: any failure degrades to the static place lists so a
    /// suggestion hiccup never sinks a whole analysis.
    pub async fn suggestions(
        llm: &GeminiClient,
        item: &ItemIdentification,
    ) -> Result<StageOutcome<ActionPlaces>, PipelineError> {
        let attempted: Result<ActionPlaces, PipelineError> = typed_stage(
            llm,
            AnalysisStage::Suggestions,
            &PromptInputs {
                identification: Some(item),
                ..PromptInputs::default()
            },
            None,
        )
        .await;
        let (places, source) = match attempted {
            Ok(places) => (places, "model"),
            Err(err) => {
                warn!(
                    target = "c2c.pipeline",
                    item = %item.item_name,
                    error = %err,
                    "suggestions_fallback"
                );
                (fallback_places(), "fallback")
            }
        };
        let output = json!({
            "selling": places.selling.len(),
            "donation": places.donation.len(),
            "recycling": places.recycling.len(),
            "source": source,
        });
        Ok(StageOutcome::new(places, output))
    }

    async fn typed_stage<T: serde::de::DeserializeOwned>(
        llm: &GeminiClient,
        stage: AnalysisStage,
        inputs: &PromptInputs<'_>,
        image: Option<&InlineImage>,
    ) -> Result<T, PipelineError> {
        let prompt = build_prompt(stage, inputs)?;
        let raw = llm
            .generate(&prompt, image, params_for(stage))
            .await
            .map_err(|err| PipelineError::from_llm(stage.name(), err))?;
        extract_json(&raw).map_err(|err| PipelineError::from_extract(stage.name(), err))
    }

    pub fn fallback_places() -> ActionPlaces {
        fn place(name: &str, description: &str, website: Option<&str>) -> ActionPlace {
            ActionPlace {
                name: name.to_string(),
                address: None,
                phone: None,
                website: website.map(str::to_string),
                rating: None,
                description: Some(description.to_string()),
                special_instructions: None,
                hours: None,
            }
        }

        ActionPlaces {
            selling: vec![
                place(
                    "eBay",
                    "Large audience for electronics and collectibles",
                    Some("https://www.ebay.com"),
                ),
                place(
                    "Facebook Marketplace",
                    "Local pickup, no shipping needed",
                    Some("https://www.facebook.com/marketplace"),
                ),
                place(
                    "OfferUp",
                    "Mobile-first local selling",
                    Some("https://offerup.com"),
                ),
                place(
                    "Mercari",
                    "Simple shipping-based marketplace",
                    Some("https://www.mercari.com"),
                ),
            ],
            donation: vec![
                place("Goodwill", "Accepts most household goods", None),
                place("The Salvation Army", "Free pickup for larger items", None),
                place(
                    "Habitat for Humanity ReStore",
                    "Furniture and building materials",
                    None,
                ),
            ],
            recycling: vec![
                place(
                    "Best Buy Recycling",
                    "Takes most consumer electronics in-store",
                    Some("https://www.bestbuy.com/recycling"),
                ),
                place("Local Recycling Center", "Check municipal guidelines", None),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PriceRange;
    use crate::llm::GeminiConfig;
    use crate::store::memory::MemoryStore;

    fn offline_pipeline() -> (Pipeline, Arc<MemoryStore>) {
        let config = GeminiConfig {
            api_url: "http://localhost:9".into(),
            api_key: None,
            model: "gemini-2.0-flash-001".into(),
        };
        let store = Arc::new(MemoryStore::new());
        (
            Pipeline::new(Arc::new(GeminiClient::new(config)), store.clone()),
            store,
        )
    }

    fn sample_identification() -> ItemIdentification {
        ItemIdentification {
            item_name: "Nintendo Switch OLED".into(),
            category: "gaming console".into(),
            condition: "like new".into(),
            specific_model: Some("HEG-001".into()),
            brand: Some("Nintendo".into()),
            features: vec!["OLED screen".into()],
            specifications: None,
        }
    }

    #[tokio::test]
    async fn rejects_requests_with_no_inputs() {
        let (pipeline, _) = offline_pipeline();
        let err = pipeline
            .run(AnalyzeInput::default(), "user:u1")
            .await
            .expect_err("empty input");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert_eq!(err.stage(), "identify");

        let err = pipeline
            .run(
                AnalyzeInput {
                    description: Some("   ".into()),
                    image: None,
                },
                "user:u1",
            )
            .await
            .expect_err("blank description");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn failed_analysis_persists_nothing() {
        let (pipeline, store) = offline_pipeline();
        let err = pipeline
            .run(
                AnalyzeInput {
                    description: Some("A well kept acoustic guitar".into()),
                    image: None,
                },
                "user:u1",
            )
            .await
            .expect_err("no api key configured");
        assert_eq!(err.kind(), PipelineErrorKind::ModelUnavailable);
        assert!(
            store
                .list_items("user:u1")
                .await
                .expect("list")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn granular_stage_reports_sequencing_gaps() {
        let (pipeline, _) = offline_pipeline();
        let err = pipeline
            .run_stage(AnalysisStage::Prediction, &PromptInputs::default(), None)
            .await
            .expect_err("prediction without upstream outputs");
        assert_eq!(err.kind(), PipelineErrorKind::Sequencing);
        assert_eq!(err.stage(), "prediction");
    }

    #[test]
    fn aggregate_normalizes_loose_model_output() {
        let identification = sample_identification();
        let price = PriceEstimate {
            average_price: 250.0,
            // low and high swapped on purpose
            price_range: PriceRange {
                lowest: 320.0,
                highest: 180.0,
            },
            currency: "USD".into(),
            market_conditions: Some("steady demand".into()),
        };
        let history = PriceHistory {
            price_history: vec![],
            data_availability: None,
            historical_trend: Some("declining".into()),
        };
        let prediction = PredictionReply {
            predicted_price: 230.0,
            price_direction: "downward".into(),
            confidence: "High".into(),
            reasoning: None,
            market_factors: vec!["successor rumors".into()],
            news_impact: None,
            market_trend: None,
            recommendation: "sell".into(),
            recommendation_reason: Some("prices trending down".into()),
        };
        let impact = EnvironmentalImpact {
            co2_saved_kg: 18.4,
            co2_saved_lbs: None,
            equivalent_trees: 1,
            equivalent_car_miles: 45,
            breakdown: None,
            narrative_impact: None,
            comparison_metric: None,
        };

        let result = aggregate(
            identification,
            price,
            history,
            prediction,
            impact,
            stages::fallback_places(),
        );
        assert_eq!(result.category, Category::Electronics);
        assert_eq!(result.condition, Condition::LikeNew);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.pricing.low, 180.0);
        assert_eq!(result.pricing.average, 250.0);
        assert_eq!(result.pricing.high, 320.0);
        assert_eq!(result.pricing.market_trend, MarketTrend::Falling);
        assert_eq!(result.prediction.direction, PriceDirection::Down);
        assert_eq!(result.prediction.recommendation, Recommendation::Sell);
        assert!(!result.places.selling.is_empty());
    }

    #[test]
    fn record_carries_the_full_analysis_blob() {
        let result = aggregate(
            sample_identification(),
            PriceEstimate {
                average_price: 100.0,
                price_range: PriceRange {
                    lowest: 80.0,
                    highest: 120.0,
                },
                currency: "USD".into(),
                market_conditions: None,
            },
            PriceHistory {
                price_history: vec![],
                data_availability: None,
                historical_trend: None,
            },
            PredictionReply {
                predicted_price: 95.0,
                price_direction: "stable".into(),
                confidence: "medium".into(),
                reasoning: None,
                market_factors: vec![],
                news_impact: None,
                market_trend: None,
                recommendation: "hold".into(),
                recommendation_reason: None,
            },
            EnvironmentalImpact {
                co2_saved_kg: 5.0,
                co2_saved_lbs: None,
                equivalent_trees: 0,
                equivalent_car_miles: 12,
                breakdown: None,
                narrative_impact: None,
                comparison_metric: None,
            },
            ActionPlaces::default(),
        );
        let record = record_from_result(&result, "guest:g1").expect("record");
        assert_eq!(record.owner_id, "guest:g1");
        assert_eq!(record.status, ItemStatus::Scanned);
        assert_eq!(record.eco_summary, "5.0 kg CO₂ saved");
        assert!(record.tags.contains(&"nintendo".to_string()));
        let blob = record.full_analysis.expect("blob");
        assert!(blob.get("identification").is_some());
        assert!(blob.get("prediction").is_some());
    }

    #[test]
    fn sampling_params_follow_stage_roles() {
        assert_eq!(params_for(AnalysisStage::CurrentPrice).temperature, 0.1);
        assert_eq!(params_for(AnalysisStage::Suggestions).temperature, 0.7);
        assert_eq!(params_for(AnalysisStage::Suggestions).max_output_tokens, 1000);
        assert_eq!(params_for(AnalysisStage::PriceHistory).max_output_tokens, 2048);
    }

    #[test]
    fn fallback_places_cover_every_action() {
        let places = stages::fallback_places();
        assert!(!places.selling.is_empty());
        assert!(!places.donation.is_empty());
        assert!(!places.recycling.is_empty());
    }
}
