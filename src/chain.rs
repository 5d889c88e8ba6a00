//! Reads the `(address[], uint256[])` leaderboard table from the click
//! counter contract over JSON-RPC.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha3::{Digest, Keccak256};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::models::LeaderboardEntry;

const WORD: usize = 32;
const GET_LEADERBOARD: &str = "getLeaderboard()";

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed getLeaderboard() result: {0}")]
    Decode(String),
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("unable to fetch leaderboard data after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Option<Box<ChainError>>,
    },
}

pub trait LeaderboardSource {
    fn fetch_table(
        &self,
    ) -> impl Future<Output = Result<Vec<LeaderboardEntry>, ChainError>> + Send;
}

pub struct RpcLeaderboardSource {
    client: Client,
    rpc_url: String,
    contract: String,
}

impl RpcLeaderboardSource {
    pub fn new(rpc_url: &str, contract: &str) -> Result<Self, ChainError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            contract: contract.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl LeaderboardSource for RpcLeaderboardSource {
    async fn fetch_table(&self) -> Result<Vec<LeaderboardEntry>, ChainError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                {
                    "to": self.contract,
                    "data": format!("0x{}", hex::encode(selector(GET_LEADERBOARD))),
                },
                "latest"
            ],
        });

        let response: RpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = response
            .result
            .ok_or_else(|| ChainError::Decode("response has neither result nor error".into()))?;
        decode_leaderboard(&result)
    }
}

/// Fetches the table, bounding each attempt by the policy's timeout and
/// backing off between failures. Gives up with [`ChainError::Exhausted`].
pub async fn fetch_with_retry<S: LeaderboardSource>(
    source: &S,
    policy: &RetryPolicy,
) -> Result<Vec<LeaderboardEntry>, ChainError> {
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, source.fetch_table()).await
        {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout(policy.attempt_timeout)),
        };

        match outcome {
            Ok(table) => {
                info!(attempt, rows = table.len(), "fetched leaderboard");
                return Ok(table);
            }
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "getLeaderboard() attempt failed"
                );
                if attempt < policy.max_attempts {
                    let wait = policy.backoff(attempt);
                    info!(wait_ms = wait.as_millis() as u64, "retrying");
                    tokio::time::sleep(wait).await;
                }
                last_error = Some(Box::new(err));
            }
        }
    }

    Err(ChainError::Exhausted {
        attempts: policy.max_attempts,
        last: last_error,
    })
}

pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Decodes ABI-encoded `(address[], uint256[])` return data.
pub fn decode_leaderboard(data: &str) -> Result<Vec<LeaderboardEntry>, ChainError> {
    let raw = data.strip_prefix("0x").unwrap_or(data);
    let bytes =
        hex::decode(raw).map_err(|err| ChainError::Decode(format!("invalid hex: {err}")))?;

    let addresses = read_array(&bytes, read_usize(&bytes, 0)?)?;
    let clicks = read_array(&bytes, read_usize(&bytes, WORD)?)?;
    if addresses.len() != clicks.len() {
        return Err(ChainError::Decode(format!(
            "{} addresses but {} click counters",
            addresses.len(),
            clicks.len()
        )));
    }

    addresses
        .into_iter()
        .zip(clicks)
        .map(|(address, clicks)| {
            Ok(LeaderboardEntry::new(
                format!("0x{}", hex::encode(&address[12..])),
                read_u128(clicks)?,
            ))
        })
        .collect()
}

fn word(bytes: &[u8], at: usize) -> Result<&[u8], ChainError> {
    at.checked_add(WORD)
        .and_then(|end| bytes.get(at..end))
        .ok_or_else(|| ChainError::Decode(format!("word at byte {at} is out of bounds")))
}

fn read_usize(bytes: &[u8], at: usize) -> Result<usize, ChainError> {
    let word = word(bytes, at)?;
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(ChainError::Decode(format!("offset at byte {at} is too large")));
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(tail))
        .map_err(|_| ChainError::Decode(format!("offset at byte {at} is too large")))
}

fn read_u128(word: &[u8]) -> Result<u128, ChainError> {
    if word[..WORD - 16].iter().any(|b| *b != 0) {
        return Err(ChainError::Decode("click counter exceeds 128 bits".into()));
    }
    let mut tail = [0u8; 16];
    tail.copy_from_slice(&word[WORD - 16..]);
    Ok(u128::from_be_bytes(tail))
}

fn read_array(bytes: &[u8], at: usize) -> Result<Vec<&[u8]>, ChainError> {
    let len = read_usize(bytes, at)?;
    if len > bytes.len() / WORD {
        return Err(ChainError::Decode(format!("array length {len} exceeds payload")));
    }
    (1..=len).map(|i| word(bytes, at + i * WORD)).collect()
}
