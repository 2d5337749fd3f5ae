//! Dolomite protocol TVL from DefiLlama, reduced to what the dashboard reads

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::config::Config;
use crate::constants;
use crate::error::SourceError;
use crate::fetcher::retry_with_backoff;
use crate::http;
use crate::reports;

/// Chain TVL keys that are breakdowns rather than chains
const NON_CHAIN_KEYS: &[&str] = &[
    "borrowed", "staking", "pool2", "vesting", "offers", "treasury", "cex", "governance",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Protocol {
    #[serde(default)]
    current_chain_tvls: Map<String, Value>,
    #[serde(default)]
    tvl: Vec<Value>,
    #[serde(default)]
    tokens_in_usd: Vec<Value>,
    // Optional metadata may be missing or null
    name: Option<String>,
    category: Option<String>,
    chains: Option<Vec<String>>,
    url: Option<String>,
    twitter: Option<String>,
    github: Option<Vec<String>>,
    open_source: Option<bool>,
    #[serde(default)]
    audits: Value,
    #[serde(rename = "audit_links")]
    audit_links: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolSnapshot {
    pub current_chain_tvls: Map<String, Value>,
    pub tvl: Vec<Value>,
    /// Latest composition entry only
    pub tokens_in_usd: Vec<Value>,
    pub name: String,
    pub category: String,
    pub chains: Vec<String>,
    pub url: String,
    pub twitter: String,
    pub github: Vec<String>,
    pub open_source: bool,
    pub audits: Value,
    #[serde(rename = "audit_links")]
    pub audit_links: Vec<String>,
    #[serde(rename = "last_updated")]
    pub last_updated: String,
}

impl ProtocolSnapshot {
    /// Sum of per-chain TVL, excluding breakdown keys and `chain-breakdown` entries
    pub fn total_tvl(&self) -> f64 {
        self.current_chain_tvls
            .iter()
            .filter(|(k, _)| {
                !k.contains('-') && !NON_CHAIN_KEYS.contains(&k.to_lowercase().as_str())
            })
            .filter_map(|(_, v)| v.as_f64())
            .sum()
    }
}

fn slim(protocol: Protocol, now: DateTime<Utc>) -> ProtocolSnapshot {
    let audits = match protocol.audits {
        Value::Null => Value::String(String::new()),
        other => other,
    };
    ProtocolSnapshot {
        current_chain_tvls: protocol.current_chain_tvls,
        tvl: protocol.tvl,
        tokens_in_usd: protocol.tokens_in_usd.into_iter().last().into_iter().collect(),
        name: protocol.name.unwrap_or_else(|| "Dolomite".to_string()),
        category: protocol.category.unwrap_or_default(),
        chains: protocol.chains.unwrap_or_default(),
        url: protocol.url.unwrap_or_default(),
        twitter: protocol.twitter.unwrap_or_default(),
        github: protocol.github.unwrap_or_default(),
        open_source: protocol.open_source.unwrap_or(false),
        audits,
        audit_links: protocol.audit_links.unwrap_or_default(),
        last_updated: reports::format_timestamp(now),
    }
}

async fn fetch(config: &Config, now: DateTime<Utc>) -> Result<ProtocolSnapshot, SourceError> {
    let client = http::build_client(config.request_timeout)?;
    let protocol: Protocol = retry_with_backoff(&config.retry, || {
        http::get_json(&client, constants::DEFILLAMA_PROTOCOL_URL, &[])
    })
    .await?;
    Ok(slim(protocol, now))
}

pub async fn run(config: &Config, now: DateTime<Utc>) -> Result<()> {
    info!("fetching DefiLlama protocol data");
    let path = config.output_path(constants::DEFILLAMA_FILENAME);

    match fetch(config, now).await {
        Ok(snapshot) => {
            reports::write_json(&path, &snapshot)?;
            info!(
                tvl = snapshot.total_tvl(),
                chains = snapshot.chains.len(),
                history = snapshot.tvl.len(),
                "DefiLlama data saved"
            );
        }
        Err(e) if path.exists() => {
            warn!(error = %e, "DefiLlama fetch failed, keeping existing file");
        }
        Err(e) => {
            warn!(error = %e, "DefiLlama fetch failed, writing placeholder");
            let placeholder = json!({
                "error": e.to_string(),
                "last_updated": reports::format_timestamp(now),
            });
            reports::write_json(&path, &placeholder)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_slim_keeps_last_token_entry() {
        let protocol: Protocol = serde_json::from_value(json!({
            "name": "Dolomite",
            "category": "Lending",
            "chains": ["Berachain", "Arbitrum"],
            "currentChainTvls": {
                "Berachain": 100.0,
                "Arbitrum": 50.5,
                "Arbitrum-borrowed": 20.0,
                "borrowed": 30.0
            },
            "tvl": [{"date": 1, "totalLiquidityUSD": 1.0}, {"date": 2, "totalLiquidityUSD": 2.0}],
            "tokensInUsd": [
                {"date": 1, "tokens": {"USDC": 1.0}},
                {"date": 2, "tokens": {"USDC": 2.0}}
            ],
            "openSource": true,
            "audits": "2",
            "audit_links": ["https://audit.example/report"],
            "twitter": null,
            "raises": [],
            "mcap": 10
        }))
        .unwrap();
        let snapshot = slim(protocol, now());

        assert_eq!(snapshot.tokens_in_usd.len(), 1);
        assert_eq!(snapshot.tokens_in_usd[0]["date"], 2);
        assert_eq!(snapshot.tvl.len(), 2);
        assert_eq!(snapshot.total_tvl(), 150.5);

        let out = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(out["openSource"], true);
        assert_eq!(out["audit_links"][0], "https://audit.example/report");
        assert_eq!(out["last_updated"], "2025-08-01T00:00:00Z");
        assert!(out.get("raises").is_none());
    }

    #[test]
    fn test_slim_defaults() {
        let protocol: Protocol = serde_json::from_value(json!({})).unwrap();
        let snapshot = slim(protocol, now());
        assert_eq!(snapshot.name, "Dolomite");
        assert!(snapshot.tokens_in_usd.is_empty());
        assert_eq!(snapshot.audits, Value::String(String::new()));
        assert_eq!(snapshot.total_tvl(), 0.0);
    }
}
