pub mod clock;
pub mod connection;
pub mod cost;
pub mod decay;
pub mod evolution;
pub mod memory;
pub mod scoring;

pub use connection::{ConnectionType, MemoryConnection};
pub use cost::{CostRecord, CostSummary, PeriodWindow};
pub use decay::{DecayDecision, DecayRules};
pub use evolution::MemoryEvolution;
pub use memory::{MemoryRecord, MemoryStats, MemoryStatus, MemoryType, MemoryUpdate};
pub use scoring::HybridWeights;
