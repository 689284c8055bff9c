//! Stream statistics storage
//!
//! [`StreamStatsRepository`] is the seam between the probe engine/tasks and
//! storage. The SeaORM implementation backs the service; the in-memory one
//! backs `--ephemeral` runs and tests.

pub mod memory;
pub mod stream_stats;
pub mod traits;

pub use memory::InMemoryStreamStatsRepository;
pub use stream_stats::StreamStatsSeaOrmRepository;
pub use traits::StreamStatsRepository;
