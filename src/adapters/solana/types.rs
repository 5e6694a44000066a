//! JSON-RPC wire types for the Solana calls the tracker makes
//!
//! Only the fields the tracker reads are modelled; everything else in the
//! node's response is ignored.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{ReadError, TransferEvidence};

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: serde_json::Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl<T> RpcResponse<T> {
    /// Error object becomes a transport error; a null result stays `None`
    pub fn into_result(self) -> Result<Option<T>, ReadError> {
        if let Some(err) = self.error {
            return Err(ReadError::Transport(format!("RPC error {}: {}", err.code, err.message)));
        }
        Ok(self.result)
    }
}

/// `getTokenAccountsByOwner` result
#[derive(Debug, Deserialize)]
pub struct TokenAccountsResult {
    pub value: Option<Vec<KeyedTokenAccount>>,
}

#[derive(Debug, Deserialize)]
pub struct KeyedTokenAccount {
    pub pubkey: String,
    pub account: TokenAccount,
}

#[derive(Debug, Deserialize)]
pub struct TokenAccount {
    pub data: TokenAccountData,
}

#[derive(Debug, Deserialize)]
pub struct TokenAccountData {
    pub parsed: ParsedTokenAccount,
}

#[derive(Debug, Deserialize)]
pub struct ParsedTokenAccount {
    pub info: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAccountInfo {
    pub token_amount: UiTokenAmount,
    #[serde(default)]
    pub mint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTokenAmount {
    /// Raw amount in base units, as a decimal string
    pub amount: String,
    #[serde(default)]
    pub decimals: u8,
}

impl UiTokenAmount {
    pub fn raw(&self) -> Result<u64, ReadError> {
        self.amount
            .parse::<u64>()
            .map_err(|e| ReadError::MalformedResponse(format!("token amount '{}': {}", self.amount, e)))
    }
}

impl TokenAccountsResult {
    /// Sum of raw balances across every token account; none held is zero
    pub fn total_balance(&self) -> Result<u64, ReadError> {
        let accounts = self
            .value
            .as_ref()
            .ok_or_else(|| ReadError::MalformedResponse("missing value field".to_string()))?;

        accounts.iter().try_fold(0u64, |acc, keyed| {
            let amount = keyed.account.data.parsed.info.token_amount.raw()?;
            acc.checked_add(amount)
                .ok_or_else(|| ReadError::MalformedResponse("token balance overflow".to_string()))
        })
    }
}

/// `getSignaturesForAddress` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: String,
    #[serde(default)]
    pub slot: u64,
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub block_time: Option<i64>,
}

impl SignatureInfo {
    pub fn succeeded(&self) -> bool {
        self.err.is_none()
    }
}

/// `getTransaction` result, trimmed to token balances
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub meta: Option<TransactionMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<TokenBalance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: u64,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub ui_token_amount: UiTokenAmount,
}

fn owner_totals(balances: &[TokenBalance], mint: &str) -> Result<BTreeMap<String, i128>, ReadError> {
    let mut totals = BTreeMap::new();
    for balance in balances.iter().filter(|b| b.mint == mint) {
        let Some(owner) = &balance.owner else {
            continue;
        };
        *totals.entry(owner.clone()).or_insert(0i128) += balance.ui_token_amount.raw()? as i128;
    }
    Ok(totals)
}

pub fn unix_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

impl TransactionResult {
    /// Token flow of `mint` for `owner` in this transaction
    pub fn transfer_evidence(
        &self,
        signature: &str,
        owner: &str,
        mint: &str,
    ) -> Result<TransferEvidence, ReadError> {
        let meta = self
            .meta
            .as_ref()
            .ok_or_else(|| ReadError::MalformedResponse("transaction without meta".to_string()))?;

        let pre = owner_totals(&meta.pre_token_balances, mint)?;
        let post = owner_totals(&meta.post_token_balances, mint)?;

        let delta_for = |who: &str| -> i128 {
            post.get(who).copied().unwrap_or(0) - pre.get(who).copied().unwrap_or(0)
        };

        let own_delta = delta_for(owner);
        let destinations = pre
            .keys()
            .chain(post.keys())
            .filter(|who| who.as_str() != owner)
            .filter(|who| delta_for(who) > 0)
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(TransferEvidence {
            signature: signature.to_string(),
            outgoing: own_delta < 0,
            amount: u64::try_from(-own_delta.min(0)).unwrap_or(u64::MAX),
            destinations,
            block_time: self.block_time.and_then(unix_to_utc),
        })
    }
}
