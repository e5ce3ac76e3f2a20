pub mod applier;
pub mod ingestor;
pub mod orchestrator;
pub mod points;

pub use applier::BalanceApplier;
pub use ingestor::{ChainIngestor, IngestorState};
pub use orchestrator::Orchestrator;
pub use points::PointsEngine;
