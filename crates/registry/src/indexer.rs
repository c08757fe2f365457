//! RegistryIndexer: observed-only log follower for the registry contracts.
//!
//! Catches up via HTTP eth_getLogs from the resume block to the tip, then subscribes via
//! WebSocket. Emits decoded events in (block_number, log_index) order on a broadcast channel.
//! No reorg safety or confirmations.

use crate::abi::{
    decode_log, log_block_number, log_block_timestamp, log_matches_registry, parse_hex_u64, topics,
    ObservedEvent,
};
use crate::config::IndexerConfig;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

fn build_logs_filter(
    addresses: &[[u8; 20]],
    with_topics: bool,
    from_block: Option<u64>,
    to_block: Option<u64>,
) -> Value {
    let addresses: Vec<String> = addresses
        .iter()
        .map(|a| format!("0x{}", hex::encode(a)))
        .collect();
    let mut filter = json!({ "address": addresses });
    // Topic0 alternatives in position 0: [[t0, t1, ...]].
    if with_topics {
        let alternatives: Vec<String> = topics()
            .iter()
            .map(|t| format!("0x{}", hex::encode(t)))
            .collect();
        filter["topics"] = json!([alternatives]);
    }
    if let Some(from) = from_block {
        filter["fromBlock"] = Value::String(format!("0x{:x}", from));
    }
    if let Some(to) = to_block {
        filter["toBlock"] = Value::String(format!("0x{:x}", to));
    }
    filter
}

async fn http_json_rpc(client: &reqwest::Client, url: &str, method: &str, params: Value, id: u64) -> Result<Value> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;
    let json: Value = resp.json().await.context("parse response")?;
    if let Some(err) = json.get("error") {
        anyhow::bail!("RPC error: {}", err);
    }
    let result = json
        .get("result")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Missing result"))?;
    Ok(result)
}

async fn eth_block_number(client: &reqwest::Client, http_url: &str) -> Result<u64> {
    let result = http_json_rpc(client, http_url, "eth_blockNumber", json!([]), 1).await?;
    let s = result.as_str().ok_or_else(|| anyhow::anyhow!("blockNumber not string"))?;
    parse_hex_u64(s).context("parse block number")
}

async fn eth_get_logs(
    client: &reqwest::Client,
    http_url: &str,
    filter: Value,
) -> Result<Vec<Value>> {
    let result = http_json_rpc(client, http_url, "eth_getLogs", json!([filter]), 2).await?;
    let arr = result.as_array().ok_or_else(|| anyhow::anyhow!("getLogs not array"))?;
    Ok(arr.clone())
}

async fn eth_block_timestamp(client: &reqwest::Client, http_url: &str, block_number: u64) -> Result<u64> {
    let params = json!([format!("0x{:x}", block_number), false]);
    let block = http_json_rpc(client, http_url, "eth_getBlockByNumber", params, 3).await?;
    let ts = block
        .get("timestamp")
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow::anyhow!("block {} has no timestamp", block_number))?;
    parse_hex_u64(ts).context("parse block timestamp")
}

/// Block timestamps already fetched, so logs of the same block cost one eth_getBlockByNumber.
#[derive(Default)]
struct TimestampCache {
    by_block: HashMap<u64, u64>,
}

impl TimestampCache {
    const MAX_ENTRIES: usize = 1024;

    async fn resolve(&mut self, client: &reqwest::Client, http_url: &str, log: &Value) -> Result<u64> {
        if let Some(ts) = log_block_timestamp(log) {
            return Ok(ts);
        }
        let block_number = log_block_number(log)?;
        if let Some(ts) = self.by_block.get(&block_number) {
            return Ok(*ts);
        }
        let ts = eth_block_timestamp(client, http_url, block_number).await?;
        if self.by_block.len() >= Self::MAX_ENTRIES {
            self.by_block.clear();
        }
        self.by_block.insert(block_number, ts);
        Ok(ts)
    }
}

/// Registry indexer: follows registry contract logs, catches up via HTTP, emits decoded events.
pub struct RegistryIndexer {
    config: IndexerConfig,
    event_tx: broadcast::Sender<ObservedEvent>,
    next_block: AtomicU64,
}

impl RegistryIndexer {
    /// `resume_block` is the first block fetched; see [crate::Cursor::resume_block].
    pub fn new(config: IndexerConfig, resume_block: u64) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            config,
            event_tx,
            next_block: AtomicU64::new(resume_block),
        }
    }

    /// Subscribe to observed events (ordered by block_number, log_index).
    pub fn subscribe(&self) -> broadcast::Receiver<ObservedEvent> {
        self.event_tx.subscribe()
    }

    /// Next block the catch-up phase will fetch.
    pub fn next_block(&self) -> u64 {
        self.next_block.load(Ordering::SeqCst)
    }

    /// Run the indexer (blocking on the async loop). Call from a spawned task.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let http_client = reqwest::Client::new();
        let reconnection = self.config.reconnection.clone();
        let mut timestamps = TimestampCache::default();
        let mut failures: u32 = 0;

        loop {
            match run_once(&self, &http_client, &mut timestamps).await {
                Ok(()) => {
                    failures = 0;
                    sleep(Duration::from_secs(reconnection.initial_backoff_secs)).await;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!(reason = %e, failures, "RegistryIndexer failed, reconnecting...");
                    let base = std::cmp::min(
                        Duration::from_secs(reconnection.initial_backoff_secs)
                            .saturating_mul(2u32.saturating_pow(failures.min(16))),
                        Duration::from_secs(reconnection.max_backoff_secs),
                    );
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
                    sleep(base + jitter).await;
                }
            }
        }
    }

    fn emit(&self, observed: ObservedEvent) {
        let block = observed.provenance.block_number;
        // No receivers is fine; events are dropped until someone subscribes.
        let _ = self.event_tx.send(observed);
        self.next_block.fetch_max(block, Ordering::SeqCst);
    }
}

async fn run_once(
    indexer: &RegistryIndexer,
    http_client: &reqwest::Client,
    timestamps: &mut TimestampCache,
) -> Result<()> {
    let config = &indexer.config;
    let from_block = indexer.next_block();
    let tip = eth_block_number(http_client, &config.http_url).await?;
    if from_block <= tip {
        catch_up(indexer, http_client, timestamps, from_block, tip).await?;
        indexer.next_block.store(tip + 1, Ordering::SeqCst);
    }

    let (ws_stream, _) = connect_async(&config.ws_url).await.context("WS connect")?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let sub_id = 1u64;
    let filter = build_logs_filter(&config.contracts.all(), true, None, None);
    let sub_req = json!({
        "jsonrpc": "2.0",
        "id": sub_id,
        "method": "eth_subscribe",
        "params": ["logs", filter]
    });
    ws_sender
        .send(Message::Text(serde_json::to_string(&sub_req)?))
        .await
        .map_err(|e| anyhow::anyhow!("send subscribe: {}", e))?;

    let needs_client_filter = match timeout(Duration::from_secs(10), ws_receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            let v: Value = serde_json::from_str(&text).context("parse sub response")?;
            if let Some(err) = v.get("error") {
                let msg = err.get("message").and_then(|m| m.as_str()).unwrap_or("");
                if !(msg.contains("data did not match") || msg.contains("variant")) {
                    anyhow::bail!("subscribe error: {}", msg);
                }
                tracing::warn!("RPC does not support logs filter, using client-side filter");
                let sub_req_no_filter = json!({
                    "jsonrpc": "2.0",
                    "id": sub_id,
                    "method": "eth_subscribe",
                    "params": ["logs"]
                });
                ws_sender
                    .send(Message::Text(serde_json::to_string(&sub_req_no_filter)?))
                    .await
                    .map_err(|e| anyhow::anyhow!("send subscribe: {}", e))?;
                let reply = timeout(Duration::from_secs(10), ws_receiver.next())
                    .await
                    .map_err(|_| anyhow::anyhow!("subscribe timeout"))?
                    .ok_or_else(|| anyhow::anyhow!("ws closed"))?
                    .map_err(|e| anyhow::anyhow!("ws: {}", e))?;
                let Message::Text(reply) = reply else {
                    anyhow::bail!("expected text");
                };
                let v2: Value = serde_json::from_str(&reply)?;
                if v2.get("result").and_then(|r| r.as_str()).is_none() {
                    anyhow::bail!("no subscription id");
                }
                true
            } else {
                if v.get("result").and_then(|r| r.as_str()).is_none() {
                    anyhow::bail!("no subscription id");
                }
                false
            }
        }
        Ok(Some(Ok(_))) => anyhow::bail!("unexpected message"),
        Ok(Some(Err(e))) => return Err(anyhow::anyhow!("ws: {}", e)),
        Ok(None) => anyhow::bail!("ws closed"),
        Err(_) => anyhow::bail!("subscribe timeout"),
    };

    // Logs mined between the catch-up tip and the subscription are fetched once more.
    let tip_after = eth_block_number(http_client, &config.http_url).await?;
    let from_block = indexer.next_block();
    if from_block <= tip_after {
        catch_up(indexer, http_client, timestamps, from_block, tip_after).await?;
        indexer.next_block.fetch_max(tip_after + 1, Ordering::SeqCst);
    }

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg.map_err(|e| anyhow::anyhow!("ws: {}", e))? {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let v: Value = serde_json::from_str(&text).context("parse ws message")?;
        if v.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
            continue;
        }
        let log = v
            .get("params")
            .and_then(|p| p.get("result"))
            .ok_or_else(|| anyhow::anyhow!("no params.result"))?;
        if needs_client_filter && !(log_from_contracts(log, indexer) && log_matches_registry(log)) {
            continue;
        }
        if log.get("removed").and_then(|r| r.as_bool()) == Some(true) {
            tracing::debug!("removed log ignored (no reorg handling)");
            continue;
        }
        let block_timestamp = timestamps.resolve(http_client, &config.http_url, log).await?;
        if let Some(observed) = decode_or_skip(log, block_timestamp) {
            indexer.emit(observed);
        }
    }
    Ok(())
}

/// Decode a registry log, dropping a malformed one with a warning. Shared by catch-up and the
/// subscription.
fn decode_or_skip(log: &Value, block_timestamp: u64) -> Option<ObservedEvent> {
    match decode_log(log, block_timestamp) {
        Ok(observed) => observed,
        Err(e) => {
            tracing::warn!(reason = %e, "undecodable registry log skipped");
            None
        }
    }
}

fn log_from_contracts(log: &Value, indexer: &RegistryIndexer) -> bool {
    let Some(addr) = log.get("address").and_then(|a| a.as_str()) else {
        return false;
    };
    match hex::decode(addr.strip_prefix("0x").unwrap_or(addr)) {
        Ok(bytes) => <[u8; 20]>::try_from(bytes.as_slice())
            .map(|a| indexer.config.contracts.contains(&a))
            .unwrap_or(false),
        Err(_) => false,
    }
}

async fn catch_up(
    indexer: &RegistryIndexer,
    client: &reqwest::Client,
    timestamps: &mut TimestampCache,
    from_block: u64,
    to_block: u64,
) -> Result<()> {
    let config = &indexer.config;
    let addresses = config.contracts.all();
    let max_range = config.getlogs_max_range.max(1);
    let mut from = from_block;
    while from <= to_block {
        let to = (from + max_range - 1).min(to_block);
        let filter = build_logs_filter(&addresses, true, Some(from), Some(to));
        let logs = match eth_get_logs(client, &config.http_url, filter).await {
            Ok(l) => l,
            Err(e) => {
                tracing::debug!(reason = %e, "eth_getLogs with topic filter failed, trying address-only");
                let fallback = build_logs_filter(&addresses, false, Some(from), Some(to));
                eth_get_logs(client, &config.http_url, fallback)
                    .await?
                    .into_iter()
                    .filter(log_matches_registry)
                    .collect()
            }
        };
        let mut observed = Vec::with_capacity(logs.len());
        for log in &logs {
            let block_timestamp = timestamps.resolve(client, &config.http_url, log).await?;
            observed.extend(decode_or_skip(log, block_timestamp));
        }
        if !observed.is_empty() {
            tracing::debug!(count = observed.len(), from, to, "catch-up: decoded events");
        }
        observed.sort_by_key(|o| (o.provenance.block_number, o.provenance.log_index));
        for o in observed {
            indexer.emit(o);
        }
        from = to + 1;
    }
    Ok(())
}
