//! oDOLO token and vester state, read in one batched eth_call

use alloy_primitives::{Address, U256};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::constants;
use crate::decode::{self, UINT_RETURN, encode_address_call};
use crate::error::DecodeError;
use crate::reports;
use crate::rpc::RpcClient;

/// Calls in batch order
fn calls(config: &Config) -> Vec<(Address, String)> {
    vec![
        (config.odolo, constants::TOTAL_SUPPLY_SELECTOR.to_string()),
        (config.odolo, constants::DECIMALS_SELECTOR.to_string()),
        (
            config.odolo,
            encode_address_call(constants::BALANCE_OF_SELECTOR, config.odolo_vester),
        ),
        (config.odolo_vester, constants::PROMISED_TOKENS_SELECTOR.to_string()),
        (config.odolo_vester, constants::PUSHED_TOKENS_SELECTOR.to_string()),
        (config.odolo_vester, constants::AVAILABLE_TOKENS_SELECTOR.to_string()),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OdoloState {
    pub total_supply: f64,
    pub in_vester_balance: f64,
    pub promised_tokens: f64,
    pub pushed_tokens: f64,
    pub available_tokens: f64,
    pub decimals: u8,
    /// Supply outside the vester's available and promised pools
    pub in_circulation: f64,
    #[serde(rename = "last_updated")]
    pub last_updated: String,
    #[serde(rename = "rpc_source")]
    pub rpc_source: String,
}

/// A uint256 return value. An empty return reads as zero.
fn uint_word(raw: &str) -> Result<U256, DecodeError> {
    if raw.trim_start_matches("0x").is_empty() {
        return Ok(U256::ZERO);
    }
    decode::decode_hex(&UINT_RETURN, raw)?.uint("value")
}

pub fn build_state(
    results: &[Option<String>],
    rpc_source: &str,
    now: DateTime<Utc>,
) -> Result<OdoloState> {
    let mut words = Vec::with_capacity(results.len());
    for (i, result) in results.iter().enumerate() {
        let raw = result
            .as_deref()
            .ok_or_else(|| anyhow!("eth_call #{i} returned an error"))?;
        words.push(uint_word(raw)?);
    }
    let [total_supply, decimals, in_vester, promised, pushed, available] = words[..] else {
        return Err(anyhow!("expected 6 results, got {}", words.len()));
    };

    let decimals = u8::try_from(decimals)
        .ok()
        .filter(|d| *d > 0)
        .unwrap_or(constants::ODOLO_DECIMALS);
    let scaled = |raw: U256| decode::scale(raw, decimals);

    let total_supply = scaled(total_supply);
    let promised_tokens = scaled(promised);
    let available_tokens = scaled(available);

    Ok(OdoloState {
        total_supply,
        in_vester_balance: scaled(in_vester),
        promised_tokens,
        pushed_tokens: scaled(pushed),
        available_tokens,
        decimals,
        in_circulation: total_supply - available_tokens - promised_tokens,
        last_updated: reports::format_timestamp(now),
        rpc_source: rpc_source.to_string(),
    })
}

pub async fn run(config: &Config, now: DateTime<Utc>) -> Result<()> {
    info!("reading oDOLO contract state");
    let rpc = RpcClient::new(config)?;
    let calls = calls(config);

    let state = match rpc.batch_call(&calls).await {
        Ok(batch) => build_state(&batch.results, &batch.url, now),
        Err(e) => Err(e.into()),
    };
    let state = match state {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "oDOLO contract read failed, keeping existing file");
            return Ok(());
        }
    };

    reports::write_json(&config.output_path(constants::ODOLO_CONTRACT_FILENAME), &state)?;
    info!(
        total_supply = state.total_supply,
        available = state.available_tokens,
        pushed = state.pushed_tokens,
        in_circulation = state.in_circulation,
        source = %state.rpc_source,
        "oDOLO contract state saved"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn word(value: u128) -> Option<String> {
        Some(format!("0x{value:064x}"))
    }

    fn tokens(whole: u128) -> Option<String> {
        word(whole * 10u128.pow(18))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 6, 0, 0).unwrap()
    }

    #[test]
    fn test_state_derives_circulation() {
        let results = vec![
            tokens(1_000),
            word(18),
            tokens(600),
            tokens(150),
            tokens(300),
            tokens(450),
        ];
        let state = build_state(&results, "https://rpc.example/", now()).unwrap();
        assert_eq!(state.total_supply, 1_000.0);
        assert_eq!(state.in_vester_balance, 600.0);
        assert_eq!(state.in_circulation, 400.0);
        assert_eq!(state.rpc_source, "https://rpc.example/");

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["inCirculation"], 400.0);
        assert_eq!(json["last_updated"], "2025-08-01T06:00:00Z");
        assert!(json.get("rpc_source").is_some());
    }

    #[test]
    fn test_zero_decimals_fall_back() {
        let results = vec![tokens(5), Some("0x".to_string()), word(0), word(0), word(0), word(0)];
        let state = build_state(&results, "u", now()).unwrap();
        assert_eq!(state.decimals, 18);
        assert_eq!(state.total_supply, 5.0);
    }

    #[test]
    fn test_failed_call_rejects_state() {
        let results = vec![tokens(5), word(18), None, word(0), word(0), word(0)];
        assert!(build_state(&results, "u", now()).is_err());
        assert!(build_state(&results[..2], "u", now()).is_err());
    }

    #[test]
    fn test_balance_call_encodes_vester() {
        use crate::config::{FileConfig, Overrides};
        let config = Config::from_file(&FileConfig::default(), Overrides::default()).unwrap();
        let calls = calls(&config);
        assert_eq!(calls.len(), 6);
        assert!(calls[2].1.starts_with(constants::BALANCE_OF_SELECTOR));
        assert!(
            calls[2]
                .1
                .ends_with(&constants::ODOLO_VESTER.trim_start_matches("0x").to_lowercase())
        );
    }
}
