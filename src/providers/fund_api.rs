use crate::core::codec::PayloadCodec;
use crate::core::config::ProviderConfig;
use crate::core::record::{FundDetailProvider, FundRecord};
use crate::providers::util::with_retry;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Fetches encrypted fund-detail envelopes from the upstream API and decodes
/// them through the payload codec. Results are cached for the lifetime of
/// the provider; nothing is persisted.
pub struct FundApiProvider {
    base_url: String,
    api_key: Option<String>,
    bearer_token: Option<String>,
    origin: Option<String>,
    codec: Arc<PayloadCodec>,
    cache: Mutex<HashMap<String, FundRecord>>,
}

/// Wire envelope around the encrypted payload.
#[derive(Debug, Deserialize)]
struct FundEnvelope {
    data: String,
}

impl FundApiProvider {
    pub fn new(config: &ProviderConfig, codec: Arc<PayloadCodec>) -> Self {
        FundApiProvider {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            bearer_token: config.bearer_token.clone(),
            origin: config.origin.clone(),
            codec,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl FundDetailProvider for FundApiProvider {
    async fn fetch_detail(&self, fund_code: &str) -> Result<FundRecord> {
        {
            let cache = self.cache.lock().await;
            if let Some(record) = cache.get(fund_code) {
                debug!("Cache hit for fund: {}", fund_code);
                return Ok(record.clone());
            }
        }
        debug!("Cache miss for fund: {}", fund_code);

        let url = format!("{}/funds/{}", self.base_url, fund_code);
        debug!("Requesting fund detail from {}", url);

        let client = reqwest::Client::builder().user_agent("navlens/0.1").build()?;
        let response = with_retry(
            || async {
                let mut request = client.get(&url);
                if let Some(api_key) = &self.api_key {
                    request = request.header("api-key", api_key);
                }
                if let Some(token) = &self.bearer_token {
                    request = request.header("authorization", format!("Bearer {token}"));
                }
                if let Some(origin) = &self.origin {
                    request = request.header("origin", origin);
                }
                request.send().await
            },
            3,
            500,
        )
        .await
        .with_context(|| format!("Failed to send request for fund: {fund_code}"))?;

        let response_text = response
            .text()
            .await
            .with_context(|| format!("Failed to get response text for fund: {fund_code}"))?;

        // Check for empty or non-JSON responses before parsing
        if response_text.trim().is_empty() {
            return Err(anyhow!("Received empty response for fund: {}", fund_code));
        }

        let envelope: FundEnvelope = serde_json::from_str(&response_text).with_context(|| {
            format!(
                "Failed to parse fund envelope for: {fund_code}. Response: '{response_text}'",
            )
        })?;

        let value = self
            .codec
            .decrypt(&envelope.data)
            .with_context(|| format!("Failed to decrypt payload for fund: {fund_code}"))?;
        let record: FundRecord = serde_json::from_value(value)
            .with_context(|| format!("Failed to deserialize fund record for: {fund_code}"))?;

        debug!(
            "Successfully fetched fund detail for {}: {:?}",
            fund_code, record.scheme_name
        );

        self.cache
            .lock()
            .await
            .insert(fund_code.to_string(), record.clone());

        Ok(record)
    }
}
