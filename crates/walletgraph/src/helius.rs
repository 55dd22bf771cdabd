//! Client for the Helius enhanced-transactions and token-metadata APIs.
//!
//! The raw record types mirror the upstream JSON loosely: every field is
//! optional, `null` arrays become empty, and amounts may arrive as strings or
//! numbers.

use anyhow::Context;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::ingestion::{IngestError, TransactionSource, TRANSACTION_TYPES};
use crate::metrics::record_api_call;
use crate::token_metadata::TokenMetadataFetcher;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(rename = "type", default)]
    pub tx_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub token_transfers: Vec<RawTokenTransfer>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub native_transfers: Vec<RawNativeTransfer>,
    /// Generic shape emitted by some proxies and older API versions.
    #[serde(default, deserialize_with = "null_as_default")]
    pub transfers: Vec<RawGenericTransfer>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub account_data: Vec<RawAccountData>,
}

impl RawTransaction {
    pub fn has_transfers(&self) -> bool {
        !self.token_transfers.is_empty()
            || !self.native_transfers.is_empty()
            || !self.transfers.is_empty()
    }

    pub fn touches_account(&self, address: &str) -> bool {
        self.account_data.iter().any(|a| a.account == address)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTokenTransfer {
    #[serde(default)]
    pub from_user_account: Option<String>,
    #[serde(default)]
    pub to_user_account: Option<String>,
    #[serde(default)]
    pub mint: Option<String>,
    /// UI-normalized amount.
    #[serde(deserialize_with = "de_opt_string_any", default)]
    pub token_amount: Option<String>,
    #[serde(default)]
    pub raw_token_amount: Option<RawTokenAmount>,
    #[serde(default)]
    pub token_standard: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTokenAmount {
    #[serde(deserialize_with = "de_opt_string_any", default)]
    pub token_amount: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNativeTransfer {
    #[serde(default)]
    pub from_user_account: Option<String>,
    #[serde(default)]
    pub to_user_account: Option<String>,
    /// Lamports.
    #[serde(deserialize_with = "de_opt_string_any", default)]
    pub amount: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawGenericTransfer {
    #[serde(alias = "source", alias = "fromUserAccount", default)]
    pub from: Option<String>,
    #[serde(alias = "destination", alias = "toUserAccount", default)]
    pub to: Option<String>,
    #[serde(default)]
    pub mint: Option<String>,
    #[serde(deserialize_with = "de_opt_string_any", default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAccountData {
    #[serde(default)]
    pub account: String,
}

pub struct HeliusClient {
    api_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HeliusClient {
    pub fn new(api_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    pub fn from_config(config: &common::config::Config) -> anyhow::Result<Self> {
        Self::new(
            &config.helius.api_url,
            config.helius_api_key(),
            Duration::from_secs(config.helius.request_timeout_secs),
        )
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, IngestError> {
        self.api_key.as_deref().ok_or_else(|| {
            IngestError::Configuration("HELIUS_API_KEY is not configured".to_string())
        })
    }

    pub fn token_metadata_url(&self) -> String {
        format!(
            "{}/token-metadata?api-key={}",
            self.api_url,
            urlencoding::encode(self.api_key.as_deref().unwrap_or(""))
        )
    }

    async fn fetch_transactions_raw(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<RawTransaction>, IngestError> {
        self.api_key()?;
        let url = self.transactions_url(address, limit);
        debug!(address, limit, "fetching enhanced transactions");

        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                IngestError::Timeout
            } else {
                IngestError::Other(
                    anyhow::Error::from(e.without_url())
                        .context(format!("failed to fetch transactions for {address}")),
                )
            }
        })?;

        if let Some(err) = classify_status(resp.status()) {
            warn!(address, status = %resp.status(), "indexer returned an error status");
            return Err(err);
        }

        let txs: Vec<RawTransaction> = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                IngestError::Timeout
            } else {
                IngestError::Other(
                    anyhow::Error::from(e.without_url())
                        .context("failed to deserialize transactions response"),
                )
            }
        })?;
        debug!(address, count = txs.len(), "fetched transactions");
        Ok(txs)
    }

    async fn fetch_token_metadata_raw(
        &self,
        mints: &[String],
    ) -> anyhow::Result<Vec<serde_json::Value>> {
        self.api_key()?;
        let body = serde_json::json!({
            "mintAccounts": mints,
            "includeOffChain": true,
            "disableCache": false,
        });

        let resp = self
            .client
            .post(self.token_metadata_url())
            .json(&body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("failed to fetch token metadata for {} mints", mints.len()))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("token metadata API returned {status}");
        }

        resp.json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("failed to deserialize token metadata response")
    }
}

/// Map a non-success indexer status to an ingestion error.
pub fn classify_status(status: StatusCode) -> Option<IngestError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => IngestError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            IngestError::Configuration(format!("indexer rejected credentials ({status})"))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => IngestError::Timeout,
        _ => IngestError::Other(anyhow::anyhow!("indexer returned {status}")),
    })
}

impl TransactionSource for HeliusClient {
    fn transactions_url(&self, address: &str, limit: u32) -> String {
        let mut url = format!(
            "{}/addresses/{}/transactions?api-key={}&limit={limit}",
            self.api_url,
            urlencoding::encode(address),
            urlencoding::encode(self.api_key.as_deref().unwrap_or("")),
        );
        let key = urlencoding::encode("transactionTypes[]");
        for t in TRANSACTION_TYPES {
            url.push_str(&format!("&{key}={t}"));
        }
        url
    }

    async fn fetch_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<RawTransaction>, IngestError> {
        let start = Instant::now();
        let res = self.fetch_transactions_raw(address, limit).await;
        record_api_call("transactions", start, res.is_ok());
        res
    }
}

impl TokenMetadataFetcher for HeliusClient {
    async fn fetch_metadata(&self, mints: &[String]) -> anyhow::Result<Vec<serde_json::Value>> {
        let start = Instant::now();
        let res = self.fetch_token_metadata_raw(mints).await;
        record_api_call("token_metadata", start, res.is_ok());
        res
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Deserialize a field that can be either a string or a number into Option<String>.
fn de_opt_string_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct StringOrNumber;

    impl<'de> de::Visitor<'de> for StringOrNumber {
        type Value = Option<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a string or number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}
