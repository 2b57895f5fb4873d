//! Store assembly: one handle over the catalog, tiers, pipeline and services

pub mod builder;

pub use builder::{
    ArchiveQueryResult, ArchivedPoint, MetricStore, MetricStoreBuilder, MetricStoreStats,
};
