use serde::Deserialize;

pub const DEFAULT_REPLICAS_PER_WEIGHT: u32 = 160;

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// The type of hasher used to place virtual points and keys on the ring.
/// # Options
/// - Murmur3: the 64-bit prefix of murmur3 x64 128.
pub enum HasherType {
    #[default]
    Murmur3,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
/// The configuration for the consistent hash ring.
/// # Fields
/// - hasher: The type of hasher to use.
/// - replicas_per_weight: Virtual points placed on the ring per unit of bucket weight.
pub struct ConsistentHashConfig {
    #[serde(default)]
    pub hasher: HasherType,
    #[serde(default = "ConsistentHashConfig::default_replicas_per_weight")]
    pub replicas_per_weight: u32,
}

impl ConsistentHashConfig {
    fn default_replicas_per_weight() -> u32 {
        DEFAULT_REPLICAS_PER_WEIGHT
    }
}

impl Default for ConsistentHashConfig {
    fn default() -> Self {
        Self {
            hasher: HasherType::default(),
            replicas_per_weight: DEFAULT_REPLICAS_PER_WEIGHT,
        }
    }
}
