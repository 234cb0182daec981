pub mod config;
pub mod memberlist_provider;

pub use memberlist_provider::{Memberlist, MemberlistProvider, SelfServiceMemberlistProvider};
pub use polaris_config::assignment::consistent_hash::Bucket;
