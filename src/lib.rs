pub mod aggregate;
pub mod config;
pub mod entity;
pub mod explorer;
pub mod export;
pub mod indexer;
pub mod pipeline;
pub mod report;
pub mod seed;
pub mod staking;
pub mod units;
