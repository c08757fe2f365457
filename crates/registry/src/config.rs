//! Indexer and projector configuration.

/// Registry contract addresses followed by the indexer.
#[derive(Debug, Clone, Copy)]
pub struct ContractAddresses {
    /// Emits OperatorRegistered, OperatorDeregistered, OperatorSocketUpdate, OperatorSetParamsUpdated.
    pub registry_coordinator: [u8; 20],
    /// Emits OperatorStakeUpdate.
    pub stake_registry: [u8; 20],
    /// Emits NewPubkeyRegistration.
    pub bls_apk_registry: [u8; 20],
}

impl ContractAddresses {
    pub fn all(&self) -> [[u8; 20]; 3] {
        [
            self.registry_coordinator,
            self.stake_registry,
            self.bls_apk_registry,
        ]
    }

    pub fn contains(&self, address: &[u8; 20]) -> bool {
        self.all().contains(address)
    }
}

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// WebSocket RPC URL for live log subscription.
    pub ws_url: String,
    /// HTTP RPC URL for catch-up (eth_getLogs, eth_blockNumber, eth_getBlockByNumber).
    pub http_url: String,
    pub contracts: ContractAddresses,
    /// First block to fetch when no cursor is stored.
    pub start_block: u64,
    /// Max block range per eth_getLogs request.
    pub getlogs_max_range: u64,
    /// Reconnection backoff (initial and max seconds).
    pub reconnection: ReconnectionConfig,
}

/// Reconnection backoff.
#[derive(Debug, Clone)]
pub struct ReconnectionConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}

/// What the projection loop does with an event that fails a lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Log the fault and continue with the next event.
    #[default]
    Skip,
    /// Stop the loop and return the fault.
    Halt,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectorConfig {
    pub fault_policy: FaultPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnection_config_default() {
        let c = ReconnectionConfig::default();
        assert_eq!(c.initial_backoff_secs, 1);
        assert_eq!(c.max_backoff_secs, 60);
    }

    #[test]
    fn fault_policy_defaults_to_skip() {
        assert_eq!(ProjectorConfig::default().fault_policy, FaultPolicy::Skip);
    }

    #[test]
    fn contracts_contains() {
        let contracts = ContractAddresses {
            registry_coordinator: [1; 20],
            stake_registry: [2; 20],
            bls_apk_registry: [3; 20],
        };
        assert!(contracts.contains(&[2; 20]));
        assert!(!contracts.contains(&[4; 20]));
    }
}
