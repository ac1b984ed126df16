pub mod classifier;
pub mod label_store;
pub mod service;
