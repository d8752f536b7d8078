//! OpenRouter-Compatible Pricing Endpoints
//!
//! `GET {endpoint}/models` returns the full catalogue with per-token prices
//! encoded as decimal strings. `GET {endpoint}/generation?id=` returns the
//! billed cost of one generation once usage data has landed.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{GenerationCostSource, PricingEntry, PricingError, PricingSource, PricingTable};
use crate::constants::pricing::CATALOGUE_PROVIDER;

fn build_client(timeout: Duration) -> Result<reqwest::Client, PricingError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

// =============================================================================
// Catalogue
// =============================================================================

/// Pricing catalogue fetched over HTTP
#[derive(Debug, Clone)]
pub struct OpenRouterPricingSource {
    endpoint: String,
    client: reqwest::Client,
}

impl OpenRouterPricingSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PricingError> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl PricingSource for OpenRouterPricingSource {
    async fn fetch_table(&self) -> Result<PricingTable, PricingError> {
        let url = format!("{}/models", self.endpoint);
        debug!(url = %url, "Fetching pricing catalogue");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PricingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let catalogue: CatalogueResponse = response
            .json()
            .await
            .map_err(|e| PricingError::Decode(e.to_string()))?;

        let models = parse_catalogue(catalogue);
        if models.is_empty() {
            return Err(PricingError::Decode(
                "catalogue contained no priced models".to_string(),
            ));
        }

        let mut table = PricingTable::new();
        table.insert(CATALOGUE_PROVIDER.to_string(), models);
        Ok(table)
    }
}

fn parse_price(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|p| *p >= 0.0)
}

fn parse_catalogue(catalogue: CatalogueResponse) -> HashMap<String, PricingEntry> {
    let mut models = HashMap::with_capacity(catalogue.data.len());

    for model in catalogue.data {
        // Router pseudo-models advertise "-1" for variable pricing
        let (Some(prompt), Some(completion)) = (
            parse_price(&model.pricing.prompt),
            parse_price(&model.pricing.completion),
        ) else {
            debug!(model = %model.id, "Skipping model without fixed pricing");
            continue;
        };

        let is_free = model.id.ends_with(":free") || (prompt == 0.0 && completion == 0.0);
        let max_completion_tokens = model
            .top_provider
            .as_ref()
            .and_then(|p| p.max_completion_tokens);

        models.insert(
            model.id.clone(),
            PricingEntry {
                model_id: model.id,
                prompt_price_per_token: prompt,
                completion_price_per_token: completion,
                context_length: model.context_length,
                max_completion_tokens,
                is_free,
                capabilities: model.supported_parameters,
            },
        );
    }

    models
}

#[derive(Debug, Deserialize)]
struct CatalogueResponse {
    data: Vec<CatalogueModel>,
}

#[derive(Debug, Deserialize)]
struct CatalogueModel {
    id: String,
    #[serde(default)]
    context_length: Option<u32>,
    pricing: CataloguePricing,
    #[serde(default)]
    top_provider: Option<TopProvider>,
    #[serde(default)]
    supported_parameters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CataloguePricing {
    prompt: String,
    completion: String,
}

#[derive(Debug, Deserialize)]
struct TopProvider {
    #[serde(default)]
    max_completion_tokens: Option<u32>,
}

// =============================================================================
// Generation Cost
// =============================================================================

/// Billed cost lookup for a completed generation
#[derive(Debug, Clone)]
pub struct OpenRouterGenerationLookup {
    endpoint: String,
    client: reqwest::Client,
}

impl OpenRouterGenerationLookup {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PricingError> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl GenerationCostSource for OpenRouterGenerationLookup {
    fn provider(&self) -> &str {
        CATALOGUE_PROVIDER
    }

    async fn generation_cost(
        &self,
        generation_id: &str,
        api_key: &SecretString,
    ) -> Result<f64, PricingError> {
        let url = format!("{}/generation", self.endpoint);

        let response = self
            .client
            .get(&url)
            .query(&[("id", generation_id)])
            .header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            )
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PricingError::GenerationNotFound(generation_id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), generation_id, "Generation lookup failed");
            return Err(PricingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerationResponse = response
            .json()
            .await
            .map_err(|e| PricingError::Decode(e.to_string()))?;

        Ok(body.data.total_cost)
    }
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    data: GenerationData,
}

#[derive(Debug, Deserialize)]
struct GenerationData {
    total_cost: f64,
}
