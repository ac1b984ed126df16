pub mod blocks;
pub mod decoder;
pub mod fetcher;
pub mod rpc;
pub mod source;
pub mod throttle;
pub mod types;
