//! DOLO market data from CoinGecko

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::constants;
use crate::error::SourceError;
use crate::fetcher::retry_with_backoff;
use crate::http;
use crate::reports;

/// `simple/price` response, keyed by coin id
#[derive(Debug, Default, Deserialize)]
struct SimplePriceResponse {
    #[serde(default)]
    dolomite: SimplePrice,
}

#[derive(Debug, Default, Deserialize)]
struct SimplePrice {
    #[serde(default)]
    usd: f64,
    #[serde(default)]
    usd_market_cap: f64,
    #[serde(default)]
    usd_24h_vol: f64,
    #[serde(default)]
    usd_24h_change: f64,
}

#[derive(Debug, Default, Deserialize)]
struct CoinResponse {
    #[serde(default)]
    market_data: MarketData,
}

#[derive(Debug, Default, Deserialize)]
struct MarketData {
    #[serde(default)]
    circulating_supply: Option<f64>,
    #[serde(default)]
    total_supply: Option<f64>,
    #[serde(default)]
    fully_diluted_valuation: UsdValue,
}

#[derive(Debug, Default, Deserialize)]
struct UsdValue {
    #[serde(default)]
    usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoloPrice {
    pub price: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    pub change_24h: f64,
    pub circulating_supply: f64,
    pub total_supply: f64,
    pub fdv: f64,
    pub last_updated: String,
}

fn combine(simple: SimplePriceResponse, coin: CoinResponse, now: DateTime<Utc>) -> DoloPrice {
    let quote = simple.dolomite;
    let market = coin.market_data;
    DoloPrice {
        price: quote.usd,
        market_cap: quote.usd_market_cap,
        volume_24h: quote.usd_24h_vol,
        change_24h: quote.usd_24h_change,
        circulating_supply: market.circulating_supply.unwrap_or(0.0),
        total_supply: market.total_supply.unwrap_or(0.0),
        fdv: market.fully_diluted_valuation.usd.unwrap_or(0.0),
        last_updated: reports::format_timestamp(now),
    }
}

async fn fetch(config: &Config, now: DateTime<Utc>) -> Result<DoloPrice, SourceError> {
    let client = http::build_client(config.request_timeout)?;
    let simple_url = format!(
        "{}{}",
        constants::COINGECKO_API_BASE,
        constants::COINGECKO_SIMPLE_PRICE
    );
    let coin_url = format!("{}{}", constants::COINGECKO_API_BASE, constants::COINGECKO_COIN);

    let simple: SimplePriceResponse =
        retry_with_backoff(&config.retry, || http::get_json(&client, &simple_url, &[])).await?;
    let coin: CoinResponse =
        retry_with_backoff(&config.retry, || http::get_json(&client, &coin_url, &[])).await?;
    Ok(combine(simple, coin, now))
}

pub async fn run(config: &Config, now: DateTime<Utc>) -> Result<()> {
    info!("fetching DOLO market data");
    let price = match fetch(config, now).await {
        Ok(price) => price,
        Err(e) => {
            warn!(error = %e, "CoinGecko fetch failed, keeping existing price file");
            return Ok(());
        }
    };

    reports::write_json(&config.output_path(constants::DOLO_PRICE_FILENAME), &price)?;
    info!(
        price = price.price,
        market_cap = price.market_cap,
        fdv = price.fdv,
        "DOLO price saved"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_combine_market_payloads() {
        let simple: SimplePriceResponse = serde_json::from_str(
            r#"{"dolomite":{"usd":0.1234,"usd_market_cap":45000000.5,"usd_24h_vol":1200000.0,"usd_24h_change":-3.2}}"#,
        )
        .unwrap();
        let coin: CoinResponse = serde_json::from_str(
            r#"{"id":"dolomite","market_data":{"circulating_supply":360000000.0,"total_supply":998000000.0,"fully_diluted_valuation":{"usd":123000000.0,"eur":1.0}}}"#,
        )
        .unwrap();
        let now = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        let price = combine(simple, coin, now);

        assert_eq!(price.price, 0.1234);
        assert_eq!(price.change_24h, -3.2);
        assert_eq!(price.circulating_supply, 360000000.0);
        assert_eq!(price.fdv, 123000000.0);
        assert_eq!(price.last_updated, "2025-08-01T00:00:00Z");
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let simple: SimplePriceResponse = serde_json::from_str("{}").unwrap();
        let coin: CoinResponse =
            serde_json::from_str(r#"{"market_data":{"total_supply":null}}"#).unwrap();
        let price = combine(simple, coin, Utc::now());
        assert_eq!(price.price, 0.0);
        assert_eq!(price.total_supply, 0.0);
        assert_eq!(price.fdv, 0.0);
    }
}
