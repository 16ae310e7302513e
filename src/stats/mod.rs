pub mod aggregator; // Burn statistics pass
pub mod cache; // Time-gated, single-flight result cache
pub mod refresher; // Warm-up and periodic refresh

pub use aggregator::{AggregatorConfig, StatsAggregator};
pub use cache::{CachedStats, Clock, StatsCache, StatsSource, SystemClock, DEFAULT_TTL};
