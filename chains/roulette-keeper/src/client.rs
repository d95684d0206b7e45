//! Minimal JSON-RPC client for the calls the keeper needs.
//!
//! Every failure leaves this module as a [`NetworkError`], so the recovery
//! kind is fixed where the request was made.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use core_logic::{ConfigError, EndpointConfig, EndpointPool, NetworkError};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

/// Pool of RPC sessions with failover.
pub type RpcPool = EndpointPool<RpcClient>;

/// Build the RPC pool. Every session shares one HTTP connection pool.
pub fn rpc_pool(
    config: &EndpointConfig,
    http: reqwest::Client,
    timeout: Duration,
) -> Result<RpcPool, ConfigError> {
    EndpointPool::new(&config.urls, config.settle_delay(), move |url: &str| {
        RpcClient::new(http.clone(), url, timeout)
    })
}

/// Map a transport error onto the shared taxonomy.
pub(crate) fn network_error(err: reqwest::Error, endpoint: &str, timeout: Duration) -> NetworkError {
    if err.is_timeout() {
        NetworkError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
            endpoint: endpoint.to_string(),
        }
    } else if let Some(status) = err.status() {
        NetworkError::from_status(status.as_u16(), endpoint)
    } else if err.is_decode() {
        NetworkError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    } else {
        NetworkError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct AccountValue {
    /// `[data, encoding]`
    data: (String, String),
}

#[derive(Debug, Deserialize)]
struct TransactionMeta {
    meta: Option<TransactionLogs>,
}

#[derive(Debug, Deserialize)]
struct TransactionLogs {
    #[serde(rename = "logMessages", default)]
    log_messages: Option<Vec<String>>,
}

/// Status of a submitted transaction
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureStatus {
    pub slot: u64,
    #[serde(default)]
    pub confirmations: Option<u64>,
    /// Program error, when the transaction failed
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(rename = "confirmationStatus", default)]
    pub confirmation_status: Option<String>,
}

impl SignatureStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self.confirmation_status.as_deref(),
            Some("confirmed") | Some("finalized")
        )
    }
}

/// One RPC session bound to a single endpoint URL.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(http: reqwest::Client, url: &str, timeout: Duration) -> Self {
        Self {
            http,
            url: url.to_string(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request. `Ok(None)` means the node answered with a null result.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, NetworkError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| network_error(e, &self.url, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::from_status(status.as_u16(), &self.url));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| network_error(e, &self.url, self.timeout))?;

        if let Some(error) = body.error {
            return Err(NetworkError::Rpc {
                code: error.code,
                message: error.message,
                endpoint: self.url.clone(),
            });
        }
        Ok(body.result)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, NetworkError> {
        self.request(method, params)
            .await?
            .ok_or_else(|| NetworkError::InvalidResponse {
                endpoint: self.url.clone(),
                reason: format!("{} returned neither result nor error", method),
            })
    }

    /// Raw account data, or `None` when the account does not exist.
    pub async fn get_account_info(&self, address: &str) -> Result<Option<Vec<u8>>, NetworkError> {
        let params = json!([address, { "encoding": "base64", "commitment": "confirmed" }]);
        let info: WithContext<Option<AccountValue>> = self.call("getAccountInfo", params).await?;

        let Some(account) = info.value else {
            return Ok(None);
        };
        let (data, encoding) = account.data;
        if encoding != "base64" {
            return Err(NetworkError::InvalidResponse {
                endpoint: self.url.clone(),
                reason: format!("unexpected account encoding {}", encoding),
            });
        }

        BASE64
            .decode(data.as_bytes())
            .map(Some)
            .map_err(|e| NetworkError::InvalidResponse {
                endpoint: self.url.clone(),
                reason: format!("account data is not base64: {}", e),
            })
    }

    /// Status of one signature, `None` while the cluster has not seen it.
    pub async fn get_signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, NetworkError> {
        let params = json!([[signature], { "searchTransactionHistory": false }]);
        let statuses: WithContext<Vec<Option<SignatureStatus>>> =
            self.call("getSignatureStatuses", params).await?;
        Ok(statuses.value.into_iter().next().flatten())
    }

    /// Program log lines of a landed transaction, empty when unavailable.
    pub async fn get_transaction_logs(&self, signature: &str) -> Result<Vec<String>, NetworkError> {
        let params = json!([
            signature,
            { "encoding": "json", "commitment": "confirmed", "maxSupportedTransactionVersion": 0 }
        ]);
        let tx: Option<TransactionMeta> = self.request("getTransaction", params).await?;
        Ok(tx
            .and_then(|tx| tx.meta)
            .and_then(|meta| meta.log_messages)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_response_shape() {
        let raw = r#"{
            "jsonrpc": "2.0",
            "result": {
                "context": { "slot": 341 },
                "value": { "data": ["AQID", "base64"], "executable": false, "lamports": 1 }
            },
            "id": 1
        }"#;
        let parsed: RpcResponse<WithContext<Option<AccountValue>>> =
            serde_json::from_str(raw).unwrap();
        let value = parsed.result.unwrap().value.unwrap();
        assert_eq!(BASE64.decode(value.data.0).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_signature_status_shape() {
        let raw = r#"{
            "context": { "slot": 82 },
            "value": [{ "slot": 72, "confirmations": null, "err": null, "confirmationStatus": "confirmed" }]
        }"#;
        let parsed: WithContext<Vec<Option<SignatureStatus>>> = serde_json::from_str(raw).unwrap();
        let status = parsed.value[0].clone().unwrap();
        assert!(status.is_confirmed());
        assert!(status.err.is_none());
    }

    #[test]
    fn test_rpc_error_body() {
        let raw = r#"{"jsonrpc":"2.0","error":{"code":-32005,"message":"Node is behind"},"id":1}"#;
        let parsed: RpcResponse<Value> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.error.unwrap().code, -32005);
    }
}
