//! Off-chain operator registry indexer: projects registry contract events into entities.
//!
//! - **RegistryIndexer**: observed-only following of RegistryCoordinator, StakeRegistry and
//!   BLSApkRegistry logs (HTTP catch-up + WebSocket; no reorg safety or confirmations).
//! - **Projector**: applies each event to a keyed [Store]: an append-only event record plus
//!   the `Operator` projection and its operator-id indexes, committed as one batch.
//! - **run_projection**: drives a projector from the indexer's channel, one event at a time.

pub mod abi;
pub mod config;
pub mod cursor;
pub mod indexer;
pub mod model;
pub mod pipeline;
pub mod projector;
pub mod store;

pub use abi::{ObservedEvent, Provenance, PubkeyG1, PubkeyG2, RegistryEvent};
pub use config::{ContractAddresses, FaultPolicy, IndexerConfig, ProjectorConfig, ReconnectionConfig};
pub use cursor::Cursor;
pub use indexer::RegistryIndexer;
pub use model::{event_id, hex_key, Operator, OperatorMap, OperatorSocketMap};
pub use pipeline::{apply_one, run_projection, PipelineError, ProjectionStats};
pub use projector::{Applied, ProjectionError, Projector, PRIMARY_QUORUM};
pub use store::{load, Entity, EntityKind, MemoryStore, Store, StoreError, WriteBatch};
