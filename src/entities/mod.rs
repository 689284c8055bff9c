//! SeaORM entities

pub mod stream_stats;

pub mod prelude {
    pub use super::stream_stats::Entity as StreamStats;
}
