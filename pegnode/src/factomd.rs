// Copyright (c) 2024 Botho Foundation

//! JSON-RPC 2.0 client for a factomd node, with optional factom-walletd for
//! composing signed entry commits.

use crate::address::Address;
use crate::chain::{
    BlockHeader, ChainClient, ChainError, ChainHeights, Entry, FactoidIo, FactoidTransaction,
    NewEntry,
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Timeout for RPC requests
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// factomd's "Object not found" code.
const NOT_FOUND_CODE: i64 = -32008;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct HeightsResponse {
    directoryblockheight: u64,
    leaderheight: u64,
}

#[derive(Debug, Deserialize)]
struct DBlockResponse {
    dblock: DBlock,
}

#[derive(Debug, Deserialize)]
struct DBlock {
    header: DBlockHeader,
    dbentries: Vec<DBlockEntry>,
    keymr: String,
}

#[derive(Debug, Deserialize)]
struct DBlockHeader {
    dbheight: u64,
    /// Minutes since the epoch.
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct DBlockEntry {
    chainid: String,
    keymr: String,
}

#[derive(Debug, Deserialize)]
struct EBlockResponse {
    entrylist: Vec<EBlockEntry>,
}

#[derive(Debug, Deserialize)]
struct EBlockEntry {
    entryhash: String,
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct EntryResponse {
    extids: Vec<String>,
    content: String,
}

#[derive(Debug, Deserialize)]
struct FBlockResponse {
    fblock: FBlock,
}

#[derive(Debug, Deserialize)]
struct FBlock {
    transactions: Vec<FBlockTransaction>,
}

#[derive(Debug, Deserialize)]
struct FBlockTransaction {
    txid: String,
    #[serde(default)]
    inputs: Vec<FBlockIo>,
    #[serde(default)]
    outputs: Vec<FBlockIo>,
    #[serde(default)]
    outecs: Vec<FBlockIo>,
}

#[derive(Debug, Deserialize)]
struct FBlockIo {
    amount: u64,
    /// Hex RCD hash.
    address: String,
}

#[derive(Debug, Deserialize)]
struct ComposeResponse {
    commit: ComposedCall,
    reveal: ComposedCall,
}

#[derive(Debug, Deserialize)]
struct ComposedCall {
    method: String,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RevealResponse {
    entryhash: String,
}

fn decode_hash(field: &str, value: &str) -> Result<[u8; 32], ChainError> {
    let bytes =
        hex::decode(value).map_err(|e| ChainError::Malformed(format!("{field}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| ChainError::Malformed(format!("{field}: expected 32 bytes")))
}

fn decode_bytes(field: &str, value: &str) -> Result<Vec<u8>, ChainError> {
    hex::decode(value).map_err(|e| ChainError::Malformed(format!("{field}: {e}")))
}

fn parse_dblock(response: DBlockResponse) -> Result<BlockHeader, ChainError> {
    let block = response.dblock;
    let chains = block
        .dbentries
        .iter()
        .map(|e| -> Result<_, ChainError> {
            Ok((decode_hash("chainid", &e.chainid)?, decode_hash("keymr", &e.keymr)?))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(BlockHeader {
        height: block.header.dbheight,
        key_mr: decode_hash("keymr", &block.keymr)?,
        timestamp: block.header.timestamp * 60,
        chains,
    })
}

fn parse_entry(hash: [u8; 32], timestamp: u64, response: EntryResponse) -> Result<Entry, ChainError> {
    Ok(Entry {
        hash,
        ext_ids: response
            .extids
            .iter()
            .map(|e| decode_bytes("extids", e))
            .collect::<Result<_, _>>()?,
        content: decode_bytes("content", &response.content)?,
        timestamp,
    })
}

fn parse_fblock(response: FBlockResponse) -> Result<Vec<FactoidTransaction>, ChainError> {
    let io = |list: &[FBlockIo]| {
        list.iter()
            .map(|io| -> Result<_, ChainError> {
                Ok(FactoidIo {
                    address: Address(decode_hash("address", &io.address)?),
                    amount: io.amount,
                })
            })
            .collect::<Result<Vec<_>, _>>()
    };
    response
        .fblock
        .transactions
        .iter()
        .map(|tx| -> Result<_, ChainError> {
            Ok(FactoidTransaction {
                id: decode_hash("txid", &tx.txid)?,
                inputs: io(&tx.inputs)?,
                outputs: io(&tx.outputs)?,
                ec_outputs: io(&tx.outecs)?,
            })
        })
        .collect()
}

pub struct FactomdClient {
    http: reqwest::Client,
    factomd_url: String,
    walletd_url: Option<String>,
    ec_address: Option<String>,
}

impl FactomdClient {
    pub fn new(
        factomd_url: String,
        walletd_url: Option<String>,
        ec_address: Option<String>,
    ) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            factomd_url,
            walletd_url,
            ec_address,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: REQUEST_ID.fetch_add(1, Ordering::Relaxed),
        };
        debug!(method, "factomd request");

        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        // factomd reports RPC errors with non-2xx statuses, so read the body
        // before looking at the status.
        let status = response.status();
        let body: JsonRpcResponse<T> = response.json().await.map_err(|e| {
            ChainError::Transport(format!("HTTP {status}: {e}"))
        })?;

        if let Some(error) = body.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        body.result
            .ok_or_else(|| ChainError::Malformed(format!("{method}: missing result")))
    }

    async fn factomd<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        self.call(&self.factomd_url, method, params).await
    }

    async fn by_height<T: DeserializeOwned>(&self, method: &str, height: u64) -> Result<T, ChainError> {
        match self.factomd(method, json!({ "height": height })).await {
            Err(ChainError::Rpc { code: NOT_FOUND_CODE, .. }) => Err(ChainError::MissingBlock(height)),
            other => other,
        }
    }
}

#[async_trait]
impl ChainClient for FactomdClient {
    async fn heights(&self) -> Result<ChainHeights, ChainError> {
        let heights: HeightsResponse = self.factomd("heights", json!({})).await?;
        Ok(ChainHeights {
            directory_block: heights.directoryblockheight,
            leader: heights.leaderheight,
        })
    }

    async fn block_header(&self, height: u64) -> Result<BlockHeader, ChainError> {
        parse_dblock(self.by_height("dblock-by-height", height).await?)
    }

    async fn entries(&self, _block: &[u8; 32], chain_ref: &[u8; 32]) -> Result<Vec<Entry>, ChainError> {
        let eblock: EBlockResponse = self
            .factomd("entry-block", json!({ "keymr": hex::encode(chain_ref) }))
            .await?;

        let mut entries = Vec::with_capacity(eblock.entrylist.len());
        for listed in &eblock.entrylist {
            let response: EntryResponse = self
                .factomd("entry", json!({ "hash": listed.entryhash }))
                .await?;
            let hash = decode_hash("entryhash", &listed.entryhash)?;
            entries.push(parse_entry(hash, listed.timestamp, response)?);
        }
        Ok(entries)
    }

    async fn factoid_block(&self, height: u64) -> Result<Vec<FactoidTransaction>, ChainError> {
        parse_fblock(self.by_height("fblock-by-height", height).await?)
    }

    async fn submit_entry(&self, entry: &NewEntry) -> Result<[u8; 32], ChainError> {
        let walletd = self
            .walletd_url
            .as_deref()
            .ok_or(ChainError::NotConfigured("walletd_url"))?;
        let ec_address = self
            .ec_address
            .as_deref()
            .ok_or(ChainError::NotConfigured("ec_address"))?;

        let params = json!({
            "entry": {
                "chainid": hex::encode(entry.chain),
                "extids": entry.ext_ids.iter().map(hex::encode).collect::<Vec<_>>(),
                "content": hex::encode(&entry.content),
            },
            "ecpub": ec_address,
        });
        let composed: ComposeResponse = self.call(walletd, "compose-entry", params).await?;

        let _: Value = self
            .factomd(&composed.commit.method, composed.commit.params)
            .await?;
        let revealed: RevealResponse = self
            .factomd(&composed.reveal.method, composed.reveal.params)
            .await?;
        decode_hash("entryhash", &revealed.entryhash)
    }
}
