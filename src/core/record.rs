//! Decoded fund-detail records and the acquisition seam

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// A fund-detail record decoded from a decrypted payload. Both fields are
/// optional because partial responses are routine; `SeriesStore::merge`
/// decides what to do with the gaps.
#[derive(Debug, Clone, Deserialize)]
pub struct FundRecord {
    #[serde(rename = "schemeName", alias = "scheme_name", default)]
    pub scheme_name: Option<String>,
    /// Ordered `[date, value]` pairs; dates are `%Y-%m-%d` strings on the
    /// wire and stay unparsed until merge.
    #[serde(rename = "totalReturnIndex", alias = "total_return_index", default)]
    pub total_return_index: Option<Vec<(String, f64)>>,
}

#[async_trait]
pub trait FundDetailProvider: Send + Sync {
    async fn fetch_detail(&self, fund_code: &str) -> Result<FundRecord>;
}
