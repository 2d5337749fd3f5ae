//! Etherscan-compatible explorer client (Etherscan V2 and Routescan)
//!
//! Account lists come back as `{status, message, result}` envelopes where an
//! empty history, a rate limit and a bad key all use `status = "0"`; they are
//! told apart by the message and result text.

use reqwest::Client;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use tracing::debug;

use crate::config::Config;
use crate::constants;
use crate::error::SourceError;
use crate::fetcher::{ChainItem, ListPage, ListRequest, ListSource};
use crate::http;
use crate::rpc::Receipt;

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ProxyError>,
}

#[derive(Debug, Deserialize)]
struct ProxyError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Normal transaction from `account.txlist`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerTx {
    pub hash: String,
    #[serde(deserialize_with = "u64_string")]
    pub block_number: u64,
    #[serde(deserialize_with = "u64_string")]
    pub time_stamp: u64,
    #[serde(default, deserialize_with = "u64_string")]
    pub transaction_index: u64,
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub method_id: Option<String>,
    #[serde(default)]
    pub is_error: String,
    #[serde(default, rename = "txreceipt_status")]
    pub txreceipt_status: String,
}

impl ExplorerTx {
    /// Selector of the call, from `methodId` or the first four input bytes
    pub fn selector(&self) -> &str {
        match self.method_id.as_deref() {
            Some(id) if id.len() >= 10 => id,
            _ => self.input.get(..10).unwrap_or(""),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.is_error == "0" && self.txreceipt_status == "1"
    }
}

impl ChainItem for ExplorerTx {
    fn key(&self) -> String {
        self.hash.to_lowercase()
    }
    fn block(&self) -> u64 {
        self.block_number
    }
}

/// ERC-20 transfer from `account.tokentx`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub hash: String,
    #[serde(deserialize_with = "u64_string")]
    pub block_number: u64,
    #[serde(default, deserialize_with = "u64_string")]
    pub log_index: u64,
    pub from: String,
    pub to: String,
    /// Raw integer amount as a decimal string
    pub value: String,
    #[serde(default)]
    pub token_decimal: String,
}

impl ChainItem for TokenTransfer {
    fn key(&self) -> String {
        format!("{}:{}", self.hash.to_lowercase(), self.log_index)
    }
    fn block(&self) -> u64 {
        self.block_number
    }
}

/// ERC-721 transfer from `account.tokennfttx`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftTransfer {
    pub hash: String,
    #[serde(deserialize_with = "u64_string")]
    pub block_number: u64,
    #[serde(default, deserialize_with = "u64_string")]
    pub transaction_index: u64,
    #[serde(default, deserialize_with = "u64_string")]
    pub log_index: u64,
    pub from: String,
    pub to: String,
    #[serde(rename = "tokenID", deserialize_with = "u64_string")]
    pub token_id: u64,
}

impl ChainItem for NftTransfer {
    fn key(&self) -> String {
        format!("{}:{}", self.hash.to_lowercase(), self.token_id)
    }
    fn block(&self) -> u64 {
        self.block_number
    }
}

/// Explorer numbers are decimal strings; accept bare numbers too
fn u64_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if s.is_empty() => Ok(0),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

pub struct ExplorerClient {
    http: Client,
    base_url: String,
    chain_id: Option<u64>,
    api_key: Option<String>,
}

impl ExplorerClient {
    /// Etherscan V2 multichain endpoint for `chain_id`
    pub fn etherscan(config: &Config, chain_id: u64, api_key: &str) -> Result<Self, SourceError> {
        Ok(Self {
            http: http::build_client(config.request_timeout)?,
            base_url: config.etherscan_url.clone(),
            chain_id: Some(chain_id),
            api_key: Some(api_key.to_string()),
        })
    }

    /// Routescan's keyless Berachain endpoint
    pub fn routescan(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            http: http::build_client(config.request_timeout)?,
            base_url: config.routescan_url.clone(),
            chain_id: None,
            api_key: None,
        })
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(chain_id) = self.chain_id {
            params.push(("chainid", chain_id.to_string()));
        }
        params
    }

    fn with_key(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let Some(key) = &self.api_key {
            params.push(("apikey", key.clone()));
        }
        params
    }

    /// Normal transactions sent to or from `address`
    pub fn txlist(&self, address: &str) -> AccountList<'_, ExplorerTx> {
        AccountList::new(self, "txlist", vec![("address", address.to_string())])
    }

    /// ERC-20 transfers of `contract`
    pub fn tokentx(&self, contract: &str) -> AccountList<'_, TokenTransfer> {
        AccountList::new(self, "tokentx", vec![("contractaddress", contract.to_string())])
    }

    /// ERC-721 transfers of `contract`
    pub fn tokennfttx(&self, contract: &str) -> AccountList<'_, NftTransfer> {
        AccountList::new(self, "tokennfttx", vec![("contractaddress", contract.to_string())])
    }

    async fn list<T: DeserializeOwned>(
        &self,
        action: &'static str,
        filters: &[(&'static str, String)],
        req: &ListRequest,
    ) -> Result<ListPage<T>, SourceError> {
        let mut params = self.base_params();
        params.push(("module", "account".to_string()));
        params.push(("action", action.to_string()));
        params.extend(filters.iter().cloned());
        params.push(("startblock", req.start_block.to_string()));
        params.push(("endblock", req.end_block.to_string()));
        params.push(("page", req.page.to_string()));
        params.push(("offset", req.offset.to_string()));
        params.push(("sort", "asc".to_string()));

        debug!(
            action,
            start_block = req.start_block,
            page = req.page,
            "explorer list request"
        );
        let envelope: Envelope =
            http::get_json(&self.http, &self.base_url, &self.with_key(params)).await?;
        parse_list(envelope)
    }

    /// Receipt through the explorer's JSON-RPC proxy. `None` if unknown.
    pub async fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, SourceError> {
        let mut params = self.base_params();
        params.push(("module", "proxy".to_string()));
        params.push(("action", "eth_getTransactionReceipt".to_string()));
        params.push(("txhash", tx_hash.to_string()));

        let envelope: Envelope =
            http::get_json(&self.http, &self.base_url, &self.with_key(params)).await?;
        parse_proxy(envelope)
    }
}

/// One explorer list action bound to its filter, usable as a [`ListSource`]
pub struct AccountList<'a, T> {
    client: &'a ExplorerClient,
    action: &'static str,
    filters: Vec<(&'static str, String)>,
    item: PhantomData<fn() -> T>,
}

impl<'a, T> AccountList<'a, T> {
    fn new(
        client: &'a ExplorerClient,
        action: &'static str,
        filters: Vec<(&'static str, String)>,
    ) -> Self {
        Self {
            client,
            action,
            filters,
            item: PhantomData,
        }
    }
}

impl<T> ListSource for AccountList<'_, T>
where
    T: DeserializeOwned + ChainItem + Send,
{
    type Item = T;

    async fn fetch_page(&self, req: &ListRequest) -> Result<ListPage<T>, SourceError> {
        self.client.list(self.action, &self.filters, req).await
    }
}

fn is_empty_history(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("no transactions found") || lower.contains("no records found")
}

fn is_rate_limit(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("rate limit") || lower.contains("too many")
}

fn status_error(message: Option<String>, result: &Value) -> SourceError {
    let message = message.unwrap_or_default();
    let detail = result.as_str().unwrap_or_default();
    if is_rate_limit(detail) || is_rate_limit(&message) {
        SourceError::RateLimited(detail.to_string())
    } else if detail.is_empty() {
        SourceError::Api(message)
    } else {
        SourceError::Api(format!("{message}: {detail}"))
    }
}

pub(crate) fn parse_list<T: DeserializeOwned>(
    envelope: Envelope,
) -> Result<ListPage<T>, SourceError> {
    let Envelope {
        status,
        message,
        result,
        ..
    } = envelope;

    match (status.as_deref(), result) {
        (Some("1"), Value::Array(items)) => {
            let items = items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<T>, _>>()
                .map_err(|e| SourceError::Malformed(format!("list item: {e}")))?;
            Ok(ListPage {
                items,
                end_of_results: false,
            })
        }
        (_, Value::Array(items)) if items.is_empty() => Ok(ListPage {
            items: Vec::new(),
            end_of_results: true,
        }),
        (_, result) => {
            if message.as_deref().is_some_and(is_empty_history) {
                return Ok(ListPage {
                    items: Vec::new(),
                    end_of_results: true,
                });
            }
            Err(status_error(message, &result))
        }
    }
}

fn parse_proxy(envelope: Envelope) -> Result<Option<Receipt>, SourceError> {
    if let Some(err) = envelope.error {
        return Err(SourceError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    if envelope.status.as_deref() == Some("0") {
        return Err(status_error(envelope.message, &envelope.result));
    }
    match envelope.result {
        Value::Null => Ok(None),
        Value::String(text) => Err(status_error(envelope.message, &Value::String(text))),
        result => serde_json::from_value(result)
            .map(Some)
            .map_err(|e| SourceError::Malformed(format!("receipt: {e}"))),
    }
}

/// Chain name used in published holder files
pub fn chain_name(chain_id: u64) -> &'static str {
    match chain_id {
        constants::ETHEREUM_CHAIN_ID => "eth",
        constants::BERACHAIN_CHAIN_ID => "bera",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_full_page_parses_items() {
        let page: ListPage<ExplorerTx> = parse_list(envelope(json!({
            "status": "1",
            "message": "OK",
            "result": [{
                "hash": "0xABC",
                "blockNumber": "123",
                "timeStamp": "1750000000",
                "transactionIndex": "4",
                "from": "0x1111111111111111111111111111111111111111",
                "to": "0x3e9b9a16743551da49b5e136c716bba7932d2cec",
                "input": "0xa88f81390000",
                "methodId": "0xa88f8139",
                "isError": "0",
                "txreceipt_status": "1"
            }]
        })))
        .unwrap();
        assert!(!page.end_of_results);
        let tx = &page.items[0];
        assert_eq!(tx.block(), 123);
        assert_eq!(tx.key(), "0xabc");
        assert_eq!(tx.selector(), "0xa88f8139");
        assert_eq!(tx.txreceipt_status, "1");
        assert!(tx.succeeded());

        // The explorer's key is snake_case even though the rest is camelCase
        let out = serde_json::to_value(tx).unwrap();
        assert_eq!(out["txreceipt_status"], "1");
        assert!(out.get("txreceiptStatus").is_none());
    }

    #[test]
    fn test_empty_history_is_end_of_results() {
        let page: ListPage<ExplorerTx> = parse_list(envelope(json!({
            "status": "0",
            "message": "No transactions found",
            "result": []
        })))
        .unwrap();
        assert!(page.items.is_empty());
        assert!(page.end_of_results);
    }

    #[test]
    fn test_rate_limit_is_transient() {
        let err = parse_list::<ExplorerTx>(envelope(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max calls per sec rate limit reached (5/sec)"
        })))
        .unwrap_err();
        assert!(err.is_rate_limit());
        assert!(err.is_transient());
    }

    #[test]
    fn test_bad_key_is_permanent() {
        let err = parse_list::<ExplorerTx>(envelope(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Invalid API Key"
        })))
        .unwrap_err();
        assert!(matches!(err, SourceError::Api(ref m) if m.contains("Invalid API Key")));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_selector_falls_back_to_input() {
        let tx: ExplorerTx = serde_json::from_value(json!({
            "hash": "0x1",
            "blockNumber": "1",
            "timeStamp": "1",
            "from": "0x1111111111111111111111111111111111111111",
            "input": "0xa88f8139deadbeef"
        }))
        .unwrap();
        assert_eq!(tx.selector(), "0xa88f8139");
        assert!(!tx.succeeded());
    }

    #[test]
    fn test_transfer_keys() {
        let erc20: TokenTransfer = serde_json::from_value(json!({
            "hash": "0xAA",
            "blockNumber": "10",
            "logIndex": "7",
            "from": "0x0000000000000000000000000000000000000000",
            "to": "0x2222222222222222222222222222222222222222",
            "value": "1000000000000000000",
            "tokenDecimal": "18"
        }))
        .unwrap();
        assert_eq!(erc20.key(), "0xaa:7");

        let nft: NftTransfer = serde_json::from_value(json!({
            "hash": "0xBB",
            "blockNumber": "11",
            "transactionIndex": "2",
            "logIndex": "3",
            "from": "0x0000000000000000000000000000000000000000",
            "to": "0x2222222222222222222222222222222222222222",
            "tokenID": "42"
        }))
        .unwrap();
        assert_eq!(nft.key(), "0xbb:42");
        assert_eq!(nft.block(), 11);
    }

    #[test]
    fn test_proxy_receipt() {
        let receipt = parse_proxy(envelope(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"logs": []}
        })))
        .unwrap();
        assert!(receipt.is_some());

        let missing =
            parse_proxy(envelope(json!({"jsonrpc": "2.0", "id": 1, "result": null}))).unwrap();
        assert!(missing.is_none());

        let limited = parse_proxy(envelope(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached"
        })))
        .unwrap_err();
        assert!(limited.is_rate_limit());
    }

    #[test]
    fn test_chain_names() {
        assert_eq!(chain_name(1), "eth");
        assert_eq!(chain_name(80094), "bera");
    }
}
