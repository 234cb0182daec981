// Weighted consistent hash ring (ketama style).
//
// Every bucket contributes `weight * replicas_per_weight` virtual points,
// placed by hashing `host#i`. A key is owned by the first point at or after
// the key's hash, wrapping around at the end of the ring. Adding or removing
// one bucket only moves the keys that fall between that bucket's points and
// their predecessors, roughly 1/N of the key space.

use super::config::{ConsistentHashConfig, HasherType};
use murmur3::murmur3_x64_128;
use polaris_error::{ErrorCodes, PolarisError};
use std::collections::BTreeSet;
use std::io::Cursor;
use thiserror::Error;

/// One ring member. Ordering and equality are by `(host, weight)` so that two
/// membership snapshots can be compared to decide whether a rebuild is needed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    pub host: String,
    pub weight: u32,
}

impl Bucket {
    pub fn new(host: impl Into<String>, weight: u32) -> Self {
        Self {
            host: host.into(),
            weight,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HashRingError {
    #[error("Cannot build a hash ring without any weighted bucket")]
    NoBuckets,
    #[error("Error hashing key")]
    HashError,
}

impl PolarisError for HashRingError {
    fn code(&self) -> ErrorCodes {
        match self {
            HashRingError::NoBuckets => ErrorCodes::FailedPrecondition,
            HashRingError::HashError => ErrorCodes::Internal,
        }
    }
}

/// A trait for placing a string on the ring.
pub trait Hasher {
    fn hash(&self, key: &str) -> Result<u64, HashRingError>;
}

pub struct Murmur3Hasher {}

impl Hasher for Murmur3Hasher {
    fn hash(&self, key: &str) -> Result<u64, HashRingError> {
        // The library returns 128 bits, the ring only needs the low 64.
        murmur3_x64_128(&mut Cursor::new(key), 0)
            .map(|h| h as u64)
            .map_err(|_| HashRingError::HashError)
    }
}

fn hasher_for(hasher_type: HasherType) -> impl Hasher {
    match hasher_type {
        HasherType::Murmur3 => Murmur3Hasher {},
    }
}

/// An immutable ring built from one membership snapshot.
#[derive(Debug, Clone)]
pub struct Continuum {
    hasher_type: HasherType,
    buckets: BTreeSet<Bucket>,
    hosts: Vec<String>,
    // Sorted by hash; the second field indexes into `hosts`.
    points: Vec<(u64, usize)>,
}

impl Continuum {
    pub fn new(buckets: BTreeSet<Bucket>) -> Result<Self, HashRingError> {
        Self::with_config(buckets, &ConsistentHashConfig::default())
    }

    pub fn with_config(
        buckets: BTreeSet<Bucket>,
        config: &ConsistentHashConfig,
    ) -> Result<Self, HashRingError> {
        let hasher = hasher_for(config.hasher);
        let replicas = config.replicas_per_weight.max(1) as u64;

        let hosts: Vec<String> = buckets.iter().map(|b| b.host.clone()).collect();
        let mut points = Vec::new();
        for (index, bucket) in buckets.iter().enumerate() {
            let count = bucket.weight as u64 * replicas;
            for i in 0..count {
                let point = hasher.hash(&format!("{}#{}", bucket.host, i))?;
                points.push((point, index));
            }
        }
        if points.is_empty() {
            return Err(HashRingError::NoBuckets);
        }

        // Ties on the hash resolve to the lowest host so that the ring only
        // depends on the bucket set, never on insertion order.
        points.sort_unstable();
        points.dedup_by_key(|(point, _)| *point);

        Ok(Self {
            hasher_type: config.hasher,
            buckets,
            hosts,
            points,
        })
    }

    /// The host owning `key`.
    pub fn owner_of(&self, key: &str) -> Result<&str, HashRingError> {
        let hash = hasher_for(self.hasher_type).hash(key)?;
        let idx = self.points.partition_point(|(point, _)| *point < hash);
        let (_, host_idx) = if idx == self.points.len() {
            self.points[0]
        } else {
            self.points[idx]
        };
        Ok(&self.hosts[host_idx])
    }

    pub fn buckets(&self) -> &BTreeSet<Bucket> {
        &self.buckets
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }
}
