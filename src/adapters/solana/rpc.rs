use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use super::retry::RetryPolicy;
use super::types::{RpcRequest, RpcResponse, SignatureInfo, TokenAccountsResult, TransactionResult};
use crate::domain::{BalanceReading, ReadError, TrackedAddress, TransferEvidence};
use crate::ports::{BalanceSource, TransferLookup};

/// Recent signatures inspected when looking for the latest transfer
const SIGNATURE_LOOKBACK: usize = 5;

#[derive(Debug, Error)]
pub enum SolanaClientError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("No RPC endpoints configured")]
    NoEndpoints,
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// JSON-RPC balance reader for one SPL token mint
///
/// Every call runs under the shared [`RetryPolicy`], rotating through the
/// configured endpoints in order.
pub struct RpcBalanceSource {
    http: reqwest::Client,
    endpoints: Vec<String>,
    mint: String,
    policy: RetryPolicy,
    next_id: AtomicU64,
}

impl RpcBalanceSource {
    pub fn new(endpoints: Vec<String>, mint: &str, policy: RetryPolicy) -> Result<Self, SolanaClientError> {
        if endpoints.is_empty() {
            return Err(SolanaClientError::NoEndpoints);
        }
        Pubkey::from_str(mint).map_err(|e| SolanaClientError::InvalidPublicKey(format!("{}: {}", mint, e)))?;

        let http = reqwest::Client::builder()
            .connect_timeout(policy.timeout)
            .build()
            .map_err(|e| SolanaClientError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            endpoints,
            mint: mint.to_string(),
            policy,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// One JSON-RPC call against one endpoint
    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, ReadError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);

        let response = self
            .http
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReadError::Timeout(self.policy.timeout.as_millis() as u64)
                } else {
                    ReadError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReadError::Transport(format!("{} returned HTTP {}", method, status)));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ReadError::MalformedResponse(format!("{}: {}", method, e)))?;

        body.into_result()
    }

    async fn token_balance(&self, endpoint: String, owner: String) -> Result<u64, ReadError> {
        let result: Option<TokenAccountsResult> = self
            .call(
                &endpoint,
                "getTokenAccountsByOwner",
                json!([owner, { "mint": self.mint }, { "encoding": "jsonParsed", "commitment": "confirmed" }]),
            )
            .await?;

        result
            .ok_or_else(|| ReadError::MalformedResponse("getTokenAccountsByOwner: null result".to_string()))?
            .total_balance()
    }

    async fn recent_signatures(&self, endpoint: String, owner: String) -> Result<Vec<SignatureInfo>, ReadError> {
        let result: Option<Vec<SignatureInfo>> = self
            .call(
                &endpoint,
                "getSignaturesForAddress",
                json!([owner, { "limit": SIGNATURE_LOOKBACK, "commitment": "confirmed" }]),
            )
            .await?;

        Ok(result.unwrap_or_default())
    }

    async fn transaction(&self, endpoint: String, signature: String) -> Result<Option<TransactionResult>, ReadError> {
        self.call(
            &endpoint,
            "getTransaction",
            json!([signature, {
                "encoding": "jsonParsed",
                "maxSupportedTransactionVersion": 0,
                "commitment": "confirmed"
            }]),
        )
        .await
    }
}

#[async_trait]
impl BalanceSource for RpcBalanceSource {
    async fn fetch_balance(&self, address: &TrackedAddress) -> BalanceReading {
        let owner = address.address.clone();
        let attempted = self
            .policy
            .execute(&self.endpoints, |endpoint| self.token_balance(endpoint, owner.clone()))
            .await;

        let reading = match attempted.result {
            Ok(balance) => BalanceReading::ok(&address.label, balance),
            Err(e) => BalanceReading::failed(&address.label, e),
        };
        let reading = reading.at(Utc::now()).with_retries(attempted.retries);

        match attempted.endpoint {
            Some(endpoint) => reading.with_endpoint(endpoint),
            None => reading,
        }
    }

    fn name(&self) -> &str {
        "solana-rpc"
    }
}

#[async_trait]
impl TransferLookup for RpcBalanceSource {
    async fn latest_transfer(
        &self,
        address: &TrackedAddress,
    ) -> Result<Option<TransferEvidence>, ReadError> {
        let owner = address.address.clone();
        let signatures = self
            .policy
            .execute(&self.endpoints, |endpoint| self.recent_signatures(endpoint, owner.clone()))
            .await
            .result?;

        // Newest first
        let Some(latest) = signatures.into_iter().find(SignatureInfo::succeeded) else {
            tracing::debug!("No successful transactions for {}", address.label);
            return Ok(None);
        };

        Signature::from_str(&latest.signature)
            .map_err(|e| ReadError::MalformedResponse(format!("signature '{}': {}", latest.signature, e)))?;

        let signature = latest.signature.clone();
        let transaction = self
            .policy
            .execute(&self.endpoints, |endpoint| self.transaction(endpoint, signature.clone()))
            .await
            .result?;

        let Some(transaction) = transaction else {
            tracing::debug!("Transaction {} not yet available", latest.signature);
            return Ok(None);
        };

        let mut evidence = transaction.transfer_evidence(&latest.signature, &address.address, &self.mint)?;
        if evidence.block_time.is_none() {
            evidence.block_time = latest.block_time.and_then(super::types::unix_to_utc);
        }

        tracing::debug!(
            "Latest transfer for {}: {} outgoing={} amount={} destinations={}",
            address.label,
            evidence.signature,
            evidence.outgoing,
            evidence.amount,
            evidence.destinations.len()
        );
        Ok(Some(evidence))
    }
}
