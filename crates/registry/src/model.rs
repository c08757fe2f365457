//! Persisted entities: append-only event records, the mutable `Operator` projection and the
//! operator-id lookup indexes.
//!
//! Keys are lowercase `0x`-prefixed hex. Event records are keyed by [event_id].

use crate::abi::{Provenance, PubkeyG1, PubkeyG2};
use crate::store::{Entity, EntityKind};
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Lowercase `0x`-hex of `bytes`.
pub fn hex_key(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Event record key: transaction hash followed by the log index as a little-endian i32.
pub fn event_id(transaction_hash: &B256, log_index: u64) -> String {
    let mut bytes = transaction_hash.to_vec();
    bytes.extend_from_slice(&(log_index as i32).to_le_bytes());
    hex_key(bytes)
}

macro_rules! event_record {
    ($name:ident) => {
        impl Entity for $name {
            const KIND: EntityKind = EntityKind::$name;

            fn id(&self) -> String {
                event_id(&self.provenance.transaction_hash, self.provenance.log_index)
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPubkeyRegistration {
    pub operator: Address,
    pub pubkey_g1: PubkeyG1,
    pub pubkey_g2: PubkeyG2,
    #[serde(flatten)]
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorRegistered {
    pub operator: Address,
    pub operator_id: B256,
    #[serde(flatten)]
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDeregistered {
    pub operator: Address,
    pub operator_id: B256,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// Quorum configuration change. Log only; nothing is projected from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSetParamsUpdated {
    pub quorum_number: u8,
    pub max_operator_count: u32,
    pub kick_bips_of_operator_stake: u16,
    pub kick_bips_of_total_stake: u16,
    #[serde(flatten)]
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSocketUpdate {
    pub operator_id: B256,
    pub socket: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorStakeUpdate {
    pub operator_id: B256,
    pub quorum_number: u8,
    pub stake: U256,
    #[serde(flatten)]
    pub provenance: Provenance,
}

event_record!(NewPubkeyRegistration);
event_record!(OperatorRegistered);
event_record!(OperatorDeregistered);
event_record!(OperatorSetParamsUpdated);
event_record!(OperatorSocketUpdate);
event_record!(OperatorStakeUpdate);

/// Current state of one operator, keyed by address.
///
/// `last_update` is the provenance of the most recent event that touched the record;
/// `create_block_*` is rewritten on every registration, re-registrations included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub address: Address,
    pub operator_id: Option<B256>,
    pub registered: bool,
    pub socket: Option<String>,
    /// Stake in the primary quorum.
    pub stake: Option<U256>,
    pub pubkey_g1: PubkeyG1,
    pub pubkey_g2: PubkeyG2,
    pub last_update: Provenance,
    pub create_block_number: Option<u64>,
    pub create_block_timestamp: Option<u64>,
}

impl Operator {
    /// Fresh, unregistered operator as first seen through its pubkey registration.
    pub fn from_pubkey(
        address: Address,
        pubkey_g1: PubkeyG1,
        pubkey_g2: PubkeyG2,
        provenance: Provenance,
    ) -> Self {
        Self {
            address,
            operator_id: None,
            registered: false,
            socket: None,
            stake: None,
            pubkey_g1,
            pubkey_g2,
            last_update: provenance,
            create_block_number: None,
            create_block_timestamp: None,
        }
    }

    pub fn touch(&mut self, provenance: &Provenance) {
        self.last_update = *provenance;
    }
}

impl Entity for Operator {
    const KIND: EntityKind = EntityKind::Operator;

    fn id(&self) -> String {
        hex_key(self.address.as_slice())
    }
}

/// operator id -> operator address. Written at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorMap {
    pub operator_id: B256,
    pub address: Address,
}

impl Entity for OperatorMap {
    const KIND: EntityKind = EntityKind::OperatorMap;

    fn id(&self) -> String {
        hex_key(self.operator_id.as_slice())
    }
}

/// operator id -> latest announced socket, whether or not the operator is registered yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSocketMap {
    pub operator_id: B256,
    pub socket: String,
}

impl Entity for OperatorSocketMap {
    const KIND: EntityKind = EntityKind::OperatorSocketMap;

    fn id(&self) -> String {
        hex_key(self.operator_id.as_slice())
    }
}
