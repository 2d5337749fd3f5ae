//! Thin JSON-over-HTTP helpers shared by the explorer, RPC and market clients

use reqwest::{Client, Response, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::SourceError;

/// Client with the per-request timeout applied to every call
pub fn build_client(timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("vedolo-snapshots/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(SourceError::from)
}

pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    params: &[(&str, String)],
) -> Result<T, SourceError> {
    let parsed = if params.is_empty() {
        Url::parse(url)
    } else {
        Url::parse_with_params(url, params)
    };
    let url = parsed
        .map_err(|e| SourceError::Malformed(format!("bad URL {}: {e}", mask_api_key(url))))?;

    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await?;
    read_json(response).await
}

pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &B,
) -> Result<T, SourceError> {
    let response = client
        .post(url)
        .header("Accept", "application/json")
        .json(body)
        .send()
        .await?;
    read_json(response).await
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    Ok(response.json::<T>().await?)
}

/// Mask API keys in URLs for safe logging
/// Converts "https://example.com/?apikey=SECRET&page=1" to "https://example.com/?apikey=****&page=1"
pub fn mask_api_key(url: &str) -> String {
    for marker in ["apikey=", "api-key=", "x_cg_demo_api_key="] {
        if let Some(idx) = url.find(marker) {
            let start = idx + marker.len();
            let end = url[start..]
                .find('&')
                .map(|i| start + i)
                .unwrap_or(url.len());
            return format!("{}****{}", &url[..start], &url[end..]);
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_api_key() {
        assert_eq!(
            mask_api_key("https://api.etherscan.io/v2/api?chainid=1&apikey=SECRET&page=2"),
            "https://api.etherscan.io/v2/api?chainid=1&apikey=****&page=2"
        );
        assert_eq!(
            mask_api_key("https://rpc.example.com/?api-key=SECRET"),
            "https://rpc.example.com/?api-key=****"
        );
        assert_eq!(
            mask_api_key("https://rpc.berachain.com/"),
            "https://rpc.berachain.com/"
        );
    }
}
