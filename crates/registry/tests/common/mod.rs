//! Fixture builders for projection tests.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use alloy::primitives::{Address, B256, U256};
use registry::{
    hex_key, load, MemoryStore, ObservedEvent, Operator, OperatorMap, OperatorSocketMap,
    Provenance, PubkeyG1, PubkeyG2, RegistryEvent,
};

/// Hands out strictly increasing (block, log_index) positions, several logs per block.
pub struct Chain {
    block: u64,
    log_index: u64,
}

impl Chain {
    pub fn new() -> Self {
        Self {
            block: 100,
            log_index: 0,
        }
    }

    /// Next log in the current block.
    pub fn log(&mut self) -> Provenance {
        let p = Provenance {
            block_number: self.block,
            block_timestamp: 1_700_000_000 + self.block * 12,
            transaction_hash: B256::left_padding_from(&self.block.to_be_bytes()),
            log_index: self.log_index,
        };
        self.log_index += 1;
        p
    }

    /// First log of a new block.
    pub fn next_block(&mut self) -> Provenance {
        self.block += 1;
        self.log_index = 0;
        self.log()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("registry=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn op_id(byte: u8) -> B256 {
    B256::repeat_byte(byte)
}

pub fn pubkey_registered(operator: Address, g1: (u64, u64), g2: (u64, u64), at: Provenance) -> ObservedEvent {
    ObservedEvent {
        event: RegistryEvent::PubkeyRegistered {
            operator,
            pubkey_g1: PubkeyG1 {
                x: U256::from(g1.0),
                y: U256::from(g1.1),
            },
            pubkey_g2: PubkeyG2 {
                x: [U256::from(g2.0), U256::ZERO],
                y: [U256::from(g2.1), U256::ZERO],
            },
        },
        provenance: at,
    }
}

pub fn registered(operator: Address, operator_id: B256, at: Provenance) -> ObservedEvent {
    ObservedEvent {
        event: RegistryEvent::OperatorRegistered {
            operator,
            operator_id,
        },
        provenance: at,
    }
}

pub fn deregistered(operator: Address, operator_id: B256, at: Provenance) -> ObservedEvent {
    ObservedEvent {
        event: RegistryEvent::OperatorDeregistered {
            operator,
            operator_id,
        },
        provenance: at,
    }
}

pub fn socket_update(operator_id: B256, socket: &str, at: Provenance) -> ObservedEvent {
    ObservedEvent {
        event: RegistryEvent::OperatorSocketUpdate {
            operator_id,
            socket: socket.to_string(),
        },
        provenance: at,
    }
}

pub fn stake_update(operator_id: B256, quorum_number: u8, stake: u64, at: Provenance) -> ObservedEvent {
    ObservedEvent {
        event: RegistryEvent::OperatorStakeUpdate {
            operator_id,
            quorum_number,
            stake: U256::from(stake),
        },
        provenance: at,
    }
}

pub fn set_params(quorum_number: u8, at: Provenance) -> ObservedEvent {
    ObservedEvent {
        event: RegistryEvent::OperatorSetParamsUpdated {
            quorum_number,
            max_operator_count: 50,
            kick_bips_of_operator_stake: 15_000,
            kick_bips_of_total_stake: 150,
        },
        provenance: at,
    }
}

pub fn operator(store: &MemoryStore, address: Address) -> Option<Operator> {
    load(store, &hex_key(address.as_slice())).unwrap()
}

pub fn operator_map(store: &MemoryStore, operator_id: B256) -> Option<OperatorMap> {
    load(store, &hex_key(operator_id.as_slice())).unwrap()
}

pub fn socket_map(store: &MemoryStore, operator_id: B256) -> Option<OperatorSocketMap> {
    load(store, &hex_key(operator_id.as_slice())).unwrap()
}
