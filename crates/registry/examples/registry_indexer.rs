//! Example: run RegistryIndexer into a Projector and print each operator change.
//!
//! Usage:
//!
//!   cargo run -p registry --example registry_indexer -- --http-url <HTTP_URL> --ws-url <WS_URL> \
//!     --registry-coordinator 0x... --stake-registry 0x... --bls-apk-registry 0x...
//!
//! Options:
//!   --start-block <N>   First block to fetch. Default: 0.
//!   --halt-on-fault     Stop on the first consistency fault instead of skipping the event.

use registry::{
    apply_one, ContractAddresses, Cursor, FaultPolicy, IndexerConfig, MemoryStore, Operator,
    ProjectionStats, Projector, RegistryIndexer,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

fn parse_address(flag: &str, s: &str) -> Result<[u8; 20], String> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex_str).map_err(|e| format!("{flag}: {e}"))?;
    <[u8; 20]>::try_from(bytes.as_slice())
        .map_err(|_| format!("{flag} must be 20 bytes (40 hex chars)"))
}

fn parse_start_block(s: Option<&String>) -> Result<u64, String> {
    let s = s.ok_or("--start-block needs a value")?;
    s.parse()
        .map_err(|e| format!("--start-block: invalid block number {s:?}: {e}"))
}

fn print_operator(op: &Operator) {
    println!(
        "{}",
        serde_json::json!({
            "address": registry::hex_key(op.address.as_slice()),
            "operator_id": op.operator_id.map(|id| registry::hex_key(id.as_slice())),
            "registered": op.registered,
            "socket": op.socket,
            "stake": op.stake.map(|s| s.to_string()),
            "block": op.last_update.block_number,
        })
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args: Vec<String> = std::env::args().collect();
    let mut http_url = String::new();
    let mut ws_url = String::new();
    let mut coordinator = String::new();
    let mut stake_registry = String::new();
    let mut apk_registry = String::new();
    let mut start_block: u64 = 0;
    let mut fault_policy = FaultPolicy::Skip;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--http-url" => {
                i += 1;
                http_url = args.get(i).cloned().unwrap_or_default();
            }
            "--ws-url" => {
                i += 1;
                ws_url = args.get(i).cloned().unwrap_or_default();
            }
            "--registry-coordinator" => {
                i += 1;
                coordinator = args.get(i).cloned().unwrap_or_default();
            }
            "--stake-registry" => {
                i += 1;
                stake_registry = args.get(i).cloned().unwrap_or_default();
            }
            "--bls-apk-registry" => {
                i += 1;
                apk_registry = args.get(i).cloned().unwrap_or_default();
            }
            "--start-block" => {
                i += 1;
                start_block = parse_start_block(args.get(i))?;
            }
            "--halt-on-fault" => fault_policy = FaultPolicy::Halt,
            _ => {}
        }
        i += 1;
    }
    if http_url.is_empty() || ws_url.is_empty() {
        eprintln!(
            "Usage: registry_indexer --http-url URL --ws-url WS_URL --registry-coordinator 0xADDR \
             --stake-registry 0xADDR --bls-apk-registry 0xADDR [--start-block N] [--halt-on-fault]"
        );
        std::process::exit(1);
    }
    let contracts = ContractAddresses {
        registry_coordinator: parse_address("--registry-coordinator", &coordinator)?,
        stake_registry: parse_address("--stake-registry", &stake_registry)?,
        bls_apk_registry: parse_address("--bls-apk-registry", &apk_registry)?,
    };

    let mut projector = Projector::new(MemoryStore::new());
    // MemoryStore starts empty, so this resumes only when backed by a persistent Store.
    let resume_block = Cursor::resume_block(Cursor::load(projector.store())?, start_block);
    let config = IndexerConfig {
        ws_url,
        http_url,
        contracts,
        start_block,
        getlogs_max_range: 1000,
        reconnection: Default::default(),
    };
    let indexer = Arc::new(RegistryIndexer::new(config, resume_block));
    let mut recv = indexer.subscribe();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let indexer_task = tokio::spawn(Arc::clone(&indexer).run());
        let mut stats = ProjectionStats::default();
        loop {
            tokio::select! {
                received = recv.recv() => match received {
                    Ok(ev) => {
                        if let Err(e) = apply_one(&mut projector, &ev, fault_policy, &mut stats) {
                            eprintln!("halting: {e}");
                            break;
                        }
                        let touched = projector
                            .store()
                            .entities::<Operator>()
                            .unwrap_or_default()
                            .into_iter()
                            .filter(|op| op.last_update == ev.provenance);
                        for op in touched {
                            print_operator(&op);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        eprintln!("halting: {n} events dropped");
                        break;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        indexer_task.abort();
        eprintln!(
            "applied={} duplicates={} faults={}",
            stats.applied, stats.duplicates, stats.faults
        );
    });
    Ok(())
}
