//! Projector: applies observed registry events to the entity store.
//!
//! Every event appends one immutable event record and, depending on its kind, upserts the
//! `Operator` projection and the operator-id indexes. All lookups an event depends on are
//! resolved before anything is written; the event record, the projection updates and the
//! resume [Cursor] are then committed as one batch. An event that fails a lookup writes nothing.
//!
//! Events must be applied one at a time in chain order (block number, then log index). The
//! projector holds no state of its own between calls besides the store.

use crate::abi::{ObservedEvent, Provenance, PubkeyG1, PubkeyG2, RegistryEvent};
use crate::cursor::Cursor;
use crate::model::{
    event_id, hex_key, NewPubkeyRegistration, Operator, OperatorDeregistered, OperatorMap,
    OperatorRegistered, OperatorSetParamsUpdated, OperatorSocketMap, OperatorSocketUpdate,
    OperatorStakeUpdate,
};
use crate::store::{load, EntityKind, Store, StoreError, WriteBatch};
use alloy::primitives::{Address, B256, U256};
use thiserror::Error;

/// Quorum whose stake is projected onto `Operator.stake`.
pub const PRIMARY_QUORUM: u8 = 0;

#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An event referenced an operator address with no `Operator` record.
    #[error("operator {address} not found")]
    OperatorNotFound { address: Address },

    /// An event referenced an operator id that was never registered.
    #[error("operator id {operator_id} is not mapped to an operator")]
    OperatorIdNotMapped { operator_id: B256 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProjectionError {
    /// True for missing-dependency faults; false for store failures, which are worth retrying.
    pub fn is_consistency_fault(&self) -> bool {
        !matches!(self, ProjectionError::Store(_))
    }
}

/// Outcome of a successful [Projector::apply].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The event was new; `writes` records were committed (cursor included).
    Projected { writes: usize },
    /// The event record already existed; nothing was written.
    Duplicate,
}

pub struct Projector<S> {
    store: S,
}

impl<S: Store> Projector<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one event. On error nothing has been written for it.
    pub fn apply(&mut self, observed: &ObservedEvent) -> Result<Applied, ProjectionError> {
        let event = &observed.event;
        let provenance = &observed.provenance;
        let id = event_id(&provenance.transaction_hash, provenance.log_index);
        if self.store.get(record_kind(event), &id)?.is_some() {
            tracing::debug!(
                event = event.name(),
                block = provenance.block_number,
                log_index = provenance.log_index,
                "event already applied, skipping"
            );
            return Ok(Applied::Duplicate);
        }

        let mut batch = WriteBatch::new();
        match event {
            RegistryEvent::PubkeyRegistered {
                operator,
                pubkey_g1,
                pubkey_g2,
            } => self.pubkey_registered(&mut batch, *operator, *pubkey_g1, *pubkey_g2, provenance)?,
            RegistryEvent::OperatorRegistered {
                operator,
                operator_id,
            } => self.operator_registered(&mut batch, *operator, *operator_id, provenance)?,
            RegistryEvent::OperatorDeregistered {
                operator,
                operator_id,
            } => self.operator_deregistered(&mut batch, *operator, *operator_id, provenance)?,
            RegistryEvent::OperatorSetParamsUpdated {
                quorum_number,
                max_operator_count,
                kick_bips_of_operator_stake,
                kick_bips_of_total_stake,
            } => {
                batch.save(&OperatorSetParamsUpdated {
                    quorum_number: *quorum_number,
                    max_operator_count: *max_operator_count,
                    kick_bips_of_operator_stake: *kick_bips_of_operator_stake,
                    kick_bips_of_total_stake: *kick_bips_of_total_stake,
                    provenance: *provenance,
                })?;
            }
            RegistryEvent::OperatorSocketUpdate {
                operator_id,
                socket,
            } => self.socket_updated(&mut batch, *operator_id, socket, provenance)?,
            RegistryEvent::OperatorStakeUpdate {
                operator_id,
                quorum_number,
                stake,
            } => self.stake_updated(&mut batch, *operator_id, *quorum_number, *stake, provenance)?,
        }
        batch.save(&Cursor::at(provenance))?;

        let writes = batch.len();
        self.store.commit(batch)?;
        tracing::debug!(
            event = event.name(),
            block = provenance.block_number,
            log_index = provenance.log_index,
            writes,
            "event applied"
        );
        Ok(Applied::Projected { writes })
    }

    fn pubkey_registered(
        &self,
        batch: &mut WriteBatch,
        operator: Address,
        pubkey_g1: PubkeyG1,
        pubkey_g2: PubkeyG2,
        provenance: &Provenance,
    ) -> Result<(), ProjectionError> {
        batch.save(&NewPubkeyRegistration {
            operator,
            pubkey_g1,
            pubkey_g2,
            provenance: *provenance,
        })?;
        let op = match self.find_operator(operator)? {
            Some(mut op) => {
                op.pubkey_g1 = pubkey_g1;
                op.pubkey_g2 = pubkey_g2;
                op.touch(provenance);
                op
            }
            None => Operator::from_pubkey(operator, pubkey_g1, pubkey_g2, *provenance),
        };
        batch.save(&op)?;
        Ok(())
    }

    fn operator_registered(
        &self,
        batch: &mut WriteBatch,
        operator: Address,
        operator_id: B256,
        provenance: &Provenance,
    ) -> Result<(), ProjectionError> {
        batch.save(&OperatorRegistered {
            operator,
            operator_id,
            provenance: *provenance,
        })?;
        let socket = load::<OperatorSocketMap, _>(&self.store, &hex_key(operator_id.as_slice()))?
            .map(|m| m.socket);
        if socket.is_none() {
            tracing::debug!(%operator_id, "no socket announced before registration");
        }
        let mut op = self
            .find_operator(operator)?
            .ok_or(ProjectionError::OperatorNotFound { address: operator })?;
        op.operator_id = Some(operator_id);
        op.registered = true;
        op.socket = socket;
        op.create_block_number = Some(provenance.block_number);
        op.create_block_timestamp = Some(provenance.block_timestamp);
        op.touch(provenance);
        batch.save(&op)?;
        batch.save(&OperatorMap {
            operator_id,
            address: operator,
        })?;
        tracing::info!(%operator, %operator_id, block = provenance.block_number, "operator registered");
        Ok(())
    }

    fn operator_deregistered(
        &self,
        batch: &mut WriteBatch,
        operator: Address,
        operator_id: B256,
        provenance: &Provenance,
    ) -> Result<(), ProjectionError> {
        batch.save(&OperatorDeregistered {
            operator,
            operator_id,
            provenance: *provenance,
        })?;
        let mut op = self.mapped_operator(operator_id)?;
        op.registered = false;
        op.touch(provenance);
        batch.save(&op)?;
        tracing::info!(operator = %op.address, %operator_id, block = provenance.block_number, "operator deregistered");
        Ok(())
    }

    fn socket_updated(
        &self,
        batch: &mut WriteBatch,
        operator_id: B256,
        socket: &str,
        provenance: &Provenance,
    ) -> Result<(), ProjectionError> {
        batch.save(&OperatorSocketUpdate {
            operator_id,
            socket: socket.to_string(),
            provenance: *provenance,
        })?;
        batch.save(&OperatorSocketMap {
            operator_id,
            socket: socket.to_string(),
        })?;
        // Not registered yet: the index alone carries the socket until registration reads it.
        let Some(map) = load::<OperatorMap, _>(&self.store, &hex_key(operator_id.as_slice()))? else {
            return Ok(());
        };
        let mut op = self
            .find_operator(map.address)?
            .ok_or(ProjectionError::OperatorNotFound { address: map.address })?;
        op.socket = Some(socket.to_string());
        op.touch(provenance);
        batch.save(&op)?;
        Ok(())
    }

    fn stake_updated(
        &self,
        batch: &mut WriteBatch,
        operator_id: B256,
        quorum_number: u8,
        stake: U256,
        provenance: &Provenance,
    ) -> Result<(), ProjectionError> {
        batch.save(&OperatorStakeUpdate {
            operator_id,
            quorum_number,
            stake,
            provenance: *provenance,
        })?;
        if quorum_number != PRIMARY_QUORUM {
            return Ok(());
        }
        let mut op = self.mapped_operator(operator_id)?;
        op.stake = Some(stake);
        op.touch(provenance);
        batch.save(&op)?;
        Ok(())
    }

    fn find_operator(&self, address: Address) -> Result<Option<Operator>, ProjectionError> {
        Ok(load(&self.store, &hex_key(address.as_slice()))?)
    }

    /// Resolve `operator_id` through `OperatorMap` to its `Operator`.
    fn mapped_operator(&self, operator_id: B256) -> Result<Operator, ProjectionError> {
        let map = load::<OperatorMap, _>(&self.store, &hex_key(operator_id.as_slice()))?
            .ok_or(ProjectionError::OperatorIdNotMapped { operator_id })?;
        self.find_operator(map.address)?
            .ok_or(ProjectionError::OperatorNotFound { address: map.address })
    }
}

fn record_kind(event: &RegistryEvent) -> EntityKind {
    match event {
        RegistryEvent::PubkeyRegistered { .. } => EntityKind::NewPubkeyRegistration,
        RegistryEvent::OperatorRegistered { .. } => EntityKind::OperatorRegistered,
        RegistryEvent::OperatorDeregistered { .. } => EntityKind::OperatorDeregistered,
        RegistryEvent::OperatorSetParamsUpdated { .. } => EntityKind::OperatorSetParamsUpdated,
        RegistryEvent::OperatorSocketUpdate { .. } => EntityKind::OperatorSocketUpdate,
        RegistryEvent::OperatorStakeUpdate { .. } => EntityKind::OperatorStakeUpdate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn at(block_number: u64, log_index: u64) -> Provenance {
        Provenance {
            block_number,
            block_timestamp: block_number * 12,
            transaction_hash: B256::left_padding_from(&block_number.to_be_bytes()),
            log_index,
        }
    }

    fn observed(event: RegistryEvent, provenance: Provenance) -> ObservedEvent {
        ObservedEvent { event, provenance }
    }

    #[test]
    fn consistency_fault_classification() {
        let fault = ProjectionError::OperatorIdNotMapped {
            operator_id: B256::ZERO,
        };
        assert!(fault.is_consistency_fault());
        let store = ProjectionError::Store(StoreError::Unavailable("down".into()));
        assert!(!store.is_consistency_fault());
    }

    #[test]
    fn set_params_is_log_only() {
        let mut projector = Projector::new(MemoryStore::new());
        let applied = projector
            .apply(&observed(
                RegistryEvent::OperatorSetParamsUpdated {
                    quorum_number: 1,
                    max_operator_count: 200,
                    kick_bips_of_operator_stake: 10_000,
                    kick_bips_of_total_stake: 100,
                },
                at(1, 0),
            ))
            .unwrap();
        assert_eq!(applied, Applied::Projected { writes: 2 });
        let store = projector.store();
        assert_eq!(store.count(EntityKind::OperatorSetParamsUpdated), 1);
        assert_eq!(store.count(EntityKind::Operator), 0);
    }

    #[test]
    fn registration_without_operator_writes_nothing() {
        let mut projector = Projector::new(MemoryStore::new());
        let err = projector
            .apply(&observed(
                RegistryEvent::OperatorRegistered {
                    operator: Address::repeat_byte(0xa1),
                    operator_id: B256::repeat_byte(0xff),
                },
                at(1, 0),
            ))
            .unwrap_err();
        assert!(matches!(err, ProjectionError::OperatorNotFound { .. }));
        let store = projector.store();
        assert_eq!(store.count(EntityKind::OperatorRegistered), 0);
        assert_eq!(store.count(EntityKind::OperatorMap), 0);
        assert_eq!(Cursor::load(store).unwrap(), None);
    }

    #[test]
    fn pubkey_reregistration_keeps_registration_flag() {
        let operator = Address::repeat_byte(0xa1);
        let operator_id = B256::repeat_byte(0xff);
        let mut projector = Projector::new(MemoryStore::new());
        let g1 = PubkeyG1 {
            x: U256::from(1),
            y: U256::from(2),
        };
        projector
            .apply(&observed(
                RegistryEvent::PubkeyRegistered {
                    operator,
                    pubkey_g1: g1,
                    pubkey_g2: PubkeyG2::default(),
                },
                at(1, 0),
            ))
            .unwrap();
        projector
            .apply(&observed(
                RegistryEvent::OperatorRegistered {
                    operator,
                    operator_id,
                },
                at(2, 0),
            ))
            .unwrap();
        let g1_new = PubkeyG1 {
            x: U256::from(7),
            y: U256::from(8),
        };
        projector
            .apply(&observed(
                RegistryEvent::PubkeyRegistered {
                    operator,
                    pubkey_g1: g1_new,
                    pubkey_g2: PubkeyG2::default(),
                },
                at(3, 0),
            ))
            .unwrap();

        let op: Operator = load(projector.store(), &hex_key(operator.as_slice()))
            .unwrap()
            .unwrap();
        assert!(op.registered);
        assert_eq!(op.pubkey_g1, g1_new);
        assert_eq!(op.operator_id, Some(operator_id));
        assert_eq!(op.last_update, at(3, 0));
        assert_eq!(op.create_block_number, Some(2));
    }
}
