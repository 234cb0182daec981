pub mod config;
pub mod consistent_hash;
