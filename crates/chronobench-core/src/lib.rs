pub mod checksum;
pub mod config;
pub mod engine;
pub mod errors;
pub mod model;
pub mod sandbox;
pub mod select;
pub mod storage;
