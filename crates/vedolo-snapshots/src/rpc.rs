//! Berachain JSON-RPC client with ordered endpoint fallback

use alloy_primitives::{Address, U256};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::Config;
use crate::constants;
use crate::decode::{self, TRANSFER_TOPICS, hex_quantity, hex_u64};
use crate::error::SourceError;
use crate::fetcher::{RetryPolicy, retry_with_backoff};
use crate::http;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Event log as returned by `eth_getLogs` and inside receipts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub transaction_index: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
}

/// ERC-20 Transfer decoded from a log
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

impl LogEntry {
    /// Decode as an ERC-20 Transfer; `None` for any other event
    pub fn transfer(&self) -> Option<Transfer> {
        if self.topics.len() < 3
            || !self.topics[0].eq_ignore_ascii_case(constants::TRANSFER_TOPIC)
        {
            return None;
        }
        let indexed = format!(
            "{}{}",
            self.topics[1].trim_start_matches("0x"),
            self.topics[2].trim_start_matches("0x")
        );
        let decoded = decode::decode_hex(&TRANSFER_TOPICS, &indexed).ok()?;
        Some(Transfer {
            token: self.address,
            from: decoded.address("from").ok()?,
            to: decoded.address("to").ok()?,
            value: hex_quantity(&self.data).ok()?,
        })
    }

    pub fn block(&self) -> u64 {
        self.block_number
            .as_deref()
            .and_then(|b| hex_u64(b).ok())
            .unwrap_or(0)
    }

    pub fn tx_index(&self) -> u64 {
        self.transaction_index
            .as_deref()
            .and_then(|i| hex_u64(i).ok())
            .unwrap_or(0)
    }

    pub fn index(&self) -> u64 {
        self.log_index
            .as_deref()
            .and_then(|i| hex_u64(i).ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Receipt {
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

/// Raw results of a batched eth_call, in request order
#[derive(Debug)]
pub struct BatchResult {
    /// Endpoint that answered
    pub url: String,
    /// `None` where that single call returned an error
    pub results: Vec<Option<String>>,
}

pub struct RpcClient {
    http: Client,
    urls: Vec<String>,
    retry: RetryPolicy,
}

impl RpcClient {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            http: http::build_client(config.request_timeout)?,
            urls: config.rpc_urls.clone(),
            retry: config.retry,
        })
    }

    /// Single call, trying each endpoint in order until one succeeds
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, SourceError> {
        let mut last_error = None;
        for url in &self.urls {
            match retry_with_backoff(&self.retry, || self.call_on(url, method, &params)).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(url = %url, method, error = %e, "RPC endpoint failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SourceError::Malformed("no RPC endpoints".into())))
    }

    async fn call_on<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: &Value,
    ) -> Result<T, SourceError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };
        let response: RpcResponse = http::post_json(&self.http, url, &request).await?;
        parse_single(response)
    }

    pub async fn block_number(&self) -> Result<u64, SourceError> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        Ok(hex_u64(&hex)?)
    }

    pub async fn get_logs(
        &self,
        address: Address,
        topic0: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, SourceError> {
        self.call(
            "eth_getLogs",
            json!([{
                "address": address,
                "topics": [topic0],
                "fromBlock": format!("{from_block:#x}"),
                "toBlock": format!("{to_block:#x}"),
            }]),
        )
        .await
    }

    /// `None` when the node does not know the transaction
    pub async fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, SourceError> {
        self.call("eth_getTransactionReceipt", json!([tx_hash])).await
    }

    /// Batched `eth_call` at the latest block, trying each endpoint in order
    pub async fn batch_call(
        &self,
        calls: &[(Address, String)],
    ) -> Result<BatchResult, SourceError> {
        let body: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(i, (to, data))| {
                json!({
                    "jsonrpc": "2.0",
                    "method": "eth_call",
                    "params": [{"to": to, "data": data}, "latest"],
                    "id": i,
                })
            })
            .collect();

        let mut last_error = None;
        for url in &self.urls {
            let attempt = retry_with_backoff(&self.retry, || async {
                let response: Value = http::post_json(&self.http, url, &body).await?;
                parse_batch(response, calls.len())
            })
            .await;

            match attempt {
                Ok(results) => {
                    debug!(url = %url, calls = calls.len(), "batch eth_call");
                    return Ok(BatchResult {
                        url: url.clone(),
                        results,
                    });
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "batch eth_call failed on endpoint");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SourceError::Malformed("no RPC endpoints".into())))
    }
}

fn parse_single<T: DeserializeOwned>(response: RpcResponse) -> Result<T, SourceError> {
    if let Some(err) = response.error {
        return Err(classify_rpc_error(err));
    }
    let result = response.result.unwrap_or(Value::Null);
    serde_json::from_value(result).map_err(|e| SourceError::Malformed(e.to_string()))
}

/// Rate-limit messages are surfaced as such so the backoff uses the longer base
fn classify_rpc_error(err: RpcErrorBody) -> SourceError {
    let lower = err.message.to_lowercase();
    if lower.contains("rate") || lower.contains("too many requests") {
        SourceError::RateLimited(err.message)
    } else {
        SourceError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// Order batch responses by id. Per-call errors become `None`.
fn parse_batch(response: Value, expected: usize) -> Result<Vec<Option<String>>, SourceError> {
    let entries: Vec<RpcResponse> = match response {
        Value::Array(_) => {
            serde_json::from_value(response).map_err(|e| SourceError::Malformed(e.to_string()))?
        }
        Value::Object(_) => {
            // Some providers answer a rejected batch with a single error object
            let single: RpcResponse =
                serde_json::from_value(response)
                    .map_err(|e| SourceError::Malformed(e.to_string()))?;
            return match single.error {
                Some(err) => Err(classify_rpc_error(err)),
                None => Err(SourceError::Malformed("batch answered with a single object".into())),
            };
        }
        other => {
            return Err(SourceError::Malformed(format!("unexpected batch response: {other}")));
        }
    };

    let mut results = vec![None; expected];
    for entry in entries {
        let Some(id) = entry.id.as_ref().and_then(Value::as_u64) else {
            continue;
        };
        let Some(slot) = results.get_mut(id as usize) else {
            continue;
        };
        if entry.error.is_none() {
            *slot = entry.result.and_then(|r| r.as_str().map(str::to_string));
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn topic(addr: &str) -> String {
        format!("0x{:0>64}", addr.trim_start_matches("0x"))
    }

    fn transfer_log(token: &str, from: &str, to: &str, data: &str) -> LogEntry {
        LogEntry {
            address: Address::from_str(token).unwrap(),
            topics: vec![constants::TRANSFER_TOPIC.to_string(), topic(from), topic(to)],
            data: data.to_string(),
            block_number: Some("0x10".into()),
            transaction_hash: Some("0xabc".into()),
            transaction_index: Some("0x2".into()),
            log_index: Some("0x5".into()),
        }
    }

    #[test]
    fn test_transfer_decoding() {
        let log = transfer_log(
            constants::DOLO_TOKEN,
            constants::VEDOLO_CONTRACT,
            "0x0000000000000000000000000000000000000000",
            "0x0000000000000000000000000000000000000000000000000de0b6b3a7640000",
        );
        let transfer = log.transfer().unwrap();
        assert_eq!(transfer.to, Address::ZERO);
        assert_eq!(
            transfer.from,
            Address::from_str(constants::VEDOLO_CONTRACT).unwrap()
        );
        assert_eq!(transfer.value, U256::from(10u64.pow(18)));
        assert_eq!(log.block(), 16);
        assert_eq!(log.tx_index(), 2);
        assert_eq!(log.index(), 5);
    }

    #[test]
    fn test_non_transfer_logs_ignored() {
        let mut log = transfer_log(constants::DOLO_TOKEN, "0x01", "0x02", "0x01");
        log.topics[0] = constants::WITHDRAW_TOPIC.to_string();
        assert!(log.transfer().is_none());

        let mut short = transfer_log(constants::DOLO_TOKEN, "0x01", "0x02", "0x01");
        short.topics.truncate(2);
        assert!(short.transfer().is_none());
    }

    #[test]
    fn test_receipt_deserializes_mixed_case_addresses() {
        let receipt: Receipt = serde_json::from_value(json!({
            "status": "0x1",
            "logs": [{
                "address": "0x0F81001eF0A83ecCE5ccebf63EB302c70a39a654",
                "topics": [constants::TRANSFER_TOPIC, topic("0x01"), topic("0x02")],
                "data": "0x05",
                "logIndex": "0x0"
            }]
        }))
        .unwrap();
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].transfer().unwrap().value, U256::from(5u64));
    }

    #[test]
    fn test_batch_results_ordered_by_id() {
        let response = json!([
            {"jsonrpc": "2.0", "id": 2, "result": "0x03"},
            {"jsonrpc": "2.0", "id": 0, "result": "0x01"},
            {"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "execution reverted"}},
        ]);
        let results = parse_batch(response, 3).unwrap();
        assert_eq!(
            results,
            vec![Some("0x01".to_string()), None, Some("0x03".to_string())]
        );
    }

    #[test]
    fn test_batch_missing_ids_stay_none() {
        let response = json!([{"jsonrpc": "2.0", "id": 0, "result": "0x01"}]);
        assert_eq!(parse_batch(response, 2).unwrap(), vec![Some("0x01".into()), None]);
    }

    #[test]
    fn test_batch_rejected_as_single_error() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32005, "message": "Rate limit exceeded"}
        });
        let err = parse_batch(response, 2).unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_single_error_is_transient_rpc_error() {
        let response: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "error": {"code": -32603, "message": "internal error"}
        }))
        .unwrap();
        let err = parse_single::<String>(response).unwrap_err();
        assert!(matches!(err, SourceError::Rpc { code: -32603, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_null_receipt_is_none() {
        let response: RpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        let receipt: Option<Receipt> = parse_single(response).unwrap();
        assert!(receipt.is_none());
    }
}
