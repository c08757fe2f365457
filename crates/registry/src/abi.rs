//! ABI types and decoding for the registry contracts.
//!
//! RegistryCoordinator, StakeRegistry and BLSApkRegistry events. Decode from the JSON-RPC log
//! shape (eth_getLogs result or eth_subscription payload).

use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use serde_json::Value;

sol! {
    struct G1Point {
        uint256 X;
        uint256 Y;
    }

    struct G2Point {
        uint256[2] X;
        uint256[2] Y;
    }

    struct OperatorSetParam {
        uint32 maxOperatorCount;
        uint16 kickBIPsOfOperatorStake;
        uint16 kickBIPsOfTotalStake;
    }

    /// BLSApkRegistry
    event NewPubkeyRegistration(address indexed operator, G1Point pubkeyG1, G2Point pubkeyG2);

    /// RegistryCoordinator
    event OperatorRegistered(address indexed operator, bytes32 indexed operatorId);
    event OperatorDeregistered(address indexed operator, bytes32 indexed operatorId);
    event OperatorSetParamsUpdated(uint8 indexed quorumNumber, OperatorSetParam operatorSetParams);
    event OperatorSocketUpdate(bytes32 indexed operatorId, string socket);

    /// StakeRegistry
    event OperatorStakeUpdate(bytes32 indexed operatorId, uint8 quorumNumber, uint96 stake);
}

/// BN254 G1 public key, affine coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct PubkeyG1 {
    pub x: U256,
    pub y: U256,
}

/// BN254 G2 public key; each coordinate is an Fp2 element `[c0, c1]` in contract order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct PubkeyG2 {
    pub x: [U256; 2],
    pub y: [U256; 2],
}

impl From<G1Point> for PubkeyG1 {
    fn from(p: G1Point) -> Self {
        Self { x: p.X, y: p.Y }
    }
}

impl From<G2Point> for PubkeyG2 {
    fn from(p: G2Point) -> Self {
        Self { x: p.X, y: p.Y }
    }
}

/// Chain metadata attached to every observed log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Provenance {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// One decoded registry event, without chain metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    PubkeyRegistered {
        operator: Address,
        pubkey_g1: PubkeyG1,
        pubkey_g2: PubkeyG2,
    },
    OperatorRegistered {
        operator: Address,
        operator_id: B256,
    },
    OperatorDeregistered {
        operator: Address,
        operator_id: B256,
    },
    OperatorSetParamsUpdated {
        quorum_number: u8,
        max_operator_count: u32,
        kick_bips_of_operator_stake: u16,
        kick_bips_of_total_stake: u16,
    },
    OperatorSocketUpdate {
        operator_id: B256,
        socket: String,
    },
    OperatorStakeUpdate {
        operator_id: B256,
        quorum_number: u8,
        stake: U256,
    },
}

impl RegistryEvent {
    /// Event name as emitted by the contract.
    pub fn name(&self) -> &'static str {
        match self {
            RegistryEvent::PubkeyRegistered { .. } => "NewPubkeyRegistration",
            RegistryEvent::OperatorRegistered { .. } => "OperatorRegistered",
            RegistryEvent::OperatorDeregistered { .. } => "OperatorDeregistered",
            RegistryEvent::OperatorSetParamsUpdated { .. } => "OperatorSetParamsUpdated",
            RegistryEvent::OperatorSocketUpdate { .. } => "OperatorSocketUpdate",
            RegistryEvent::OperatorStakeUpdate { .. } => "OperatorStakeUpdate",
        }
    }
}

/// Observed registry event with chain metadata (observed-only; no reorg safety).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent {
    pub event: RegistryEvent,
    pub provenance: Provenance,
}

/// topic0 of every event the indexer follows.
pub fn topics() -> [B256; 6] {
    [
        NewPubkeyRegistration::SIGNATURE_HASH,
        OperatorRegistered::SIGNATURE_HASH,
        OperatorDeregistered::SIGNATURE_HASH,
        OperatorSetParamsUpdated::SIGNATURE_HASH,
        OperatorSocketUpdate::SIGNATURE_HASH,
        OperatorStakeUpdate::SIGNATURE_HASH,
    ]
}

/// True if topic0 of `log` is one of [topics].
pub fn log_matches_registry(log: &Value) -> bool {
    log_topics(log)
        .ok()
        .and_then(|t| t.first().copied())
        .map(|t0| topics().contains(&t0))
        .unwrap_or(false)
}

/// Block number of a JSON-RPC log, if present.
pub fn log_block_number(log: &Value) -> Result<u64> {
    parse_hex_u64(
        log.get("blockNumber")
            .and_then(|n| n.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing blockNumber"))?,
    )
}

/// `blockTimestamp` attached to the log by some nodes (not part of the standard log object).
pub fn log_block_timestamp(log: &Value) -> Option<u64> {
    log.get("blockTimestamp")
        .and_then(|t| t.as_str())
        .and_then(|s| parse_hex_u64(s).ok())
}

/// Decode a JSON-RPC log into an [ObservedEvent].
///
/// Returns `Ok(None)` when topic0 is not a registry event. A known topic0 with missing metadata
/// or undecodable data is an error.
pub fn decode_log(log: &Value, block_timestamp: u64) -> Result<Option<ObservedEvent>> {
    let raw_topics = log_topics(log)?;
    let Some(topic0) = raw_topics.first().copied() else {
        return Ok(None);
    };
    if !topics().contains(&topic0) {
        return Ok(None);
    }
    let block_number = log_block_number(log)?;
    let log_index = parse_hex_u64(
        log.get("logIndex")
            .and_then(|n| n.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing logIndex"))?,
    )?;
    let transaction_hash = parse_hex_b256(
        log.get("transactionHash")
            .and_then(|h| h.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing transactionHash"))?,
    )?;
    let data = parse_hex_bytes(
        log.get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing data"))?,
    )?;
    let event = decode_event(topic0, &raw_topics, &data)
        .with_context(|| format!("decode log {}:{}", hex::encode(transaction_hash), log_index))?;
    Ok(Some(ObservedEvent {
        event,
        provenance: Provenance {
            block_number,
            block_timestamp,
            transaction_hash,
            log_index,
        },
    }))
}

fn decode_event(topic0: B256, raw_topics: &[B256], data: &[u8]) -> Result<RegistryEvent> {
    let topics = raw_topics.iter().copied();
    let event = if topic0 == NewPubkeyRegistration::SIGNATURE_HASH {
        let ev = NewPubkeyRegistration::decode_raw_log(topics, data, true)?;
        RegistryEvent::PubkeyRegistered {
            operator: ev.operator,
            pubkey_g1: ev.pubkeyG1.into(),
            pubkey_g2: ev.pubkeyG2.into(),
        }
    } else if topic0 == OperatorRegistered::SIGNATURE_HASH {
        let ev = OperatorRegistered::decode_raw_log(topics, data, true)?;
        RegistryEvent::OperatorRegistered {
            operator: ev.operator,
            operator_id: ev.operatorId,
        }
    } else if topic0 == OperatorDeregistered::SIGNATURE_HASH {
        let ev = OperatorDeregistered::decode_raw_log(topics, data, true)?;
        RegistryEvent::OperatorDeregistered {
            operator: ev.operator,
            operator_id: ev.operatorId,
        }
    } else if topic0 == OperatorSetParamsUpdated::SIGNATURE_HASH {
        let ev = OperatorSetParamsUpdated::decode_raw_log(topics, data, true)?;
        RegistryEvent::OperatorSetParamsUpdated {
            quorum_number: ev.quorumNumber,
            max_operator_count: ev.operatorSetParams.maxOperatorCount,
            kick_bips_of_operator_stake: ev.operatorSetParams.kickBIPsOfOperatorStake,
            kick_bips_of_total_stake: ev.operatorSetParams.kickBIPsOfTotalStake,
        }
    } else if topic0 == OperatorSocketUpdate::SIGNATURE_HASH {
        let ev = OperatorSocketUpdate::decode_raw_log(topics, data, true)?;
        RegistryEvent::OperatorSocketUpdate {
            operator_id: ev.operatorId,
            socket: ev.socket,
        }
    } else if topic0 == OperatorStakeUpdate::SIGNATURE_HASH {
        let ev = OperatorStakeUpdate::decode_raw_log(topics, data, true)?;
        RegistryEvent::OperatorStakeUpdate {
            operator_id: ev.operatorId,
            quorum_number: ev.quorumNumber,
            stake: U256::from(ev.stake),
        }
    } else {
        anyhow::bail!("unknown topic0 {}", topic0);
    };
    Ok(event)
}

fn log_topics(log: &Value) -> Result<Vec<B256>> {
    log.get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow::anyhow!("Missing topics"))?
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| anyhow::anyhow!("topic not str"))
                .and_then(parse_hex_b256)
        })
        .collect()
}

pub(crate) fn parse_hex_u64(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).context("parse hex u64")
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).context("parse hex bytes")
}

fn parse_hex_b256(s: &str) -> Result<B256> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("Expected 32 bytes, got {}", bytes.len());
    }
    Ok(B256::from_slice(&bytes))
}
