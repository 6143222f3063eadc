//! Deterministic assignment of a bucketing key to a bucket.

use std::collections::BTreeMap;

/// Percentages are scaled by this factor so that fractional splits such as 33.333% keep their
/// resolution in the integer bucket space.
pub const PERCENTAGE_MULTIPLIER: f64 = 1000.0;

/// Size of the bucket space used by progressive rollouts (100% at full resolution).
pub const PROGRESSIVE_SPACE: u32 = (100.0 * PERCENTAGE_MULTIPLIER) as u32;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Maps `(flag_key, bucketing_key)` into `[0, space)`.
///
/// A `space` of zero always yields bucket 0.
pub fn bucket(flag_key: &str, bucketing_key: &str, space: u32) -> u32 {
    if space == 0 {
        return 0;
    }
    let mut input = String::with_capacity(flag_key.len() + bucketing_key.len());
    input.push_str(flag_key);
    input.push_str(bucketing_key);
    fnv1a_32(input.as_bytes()) % space
}

/// A half-open `[start, end)` slice of the bucket space owned by one variation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PercentageBucket {
    pub start: f64,
    pub end: f64,
}

impl PercentageBucket {
    pub fn contains(&self, hash: u32) -> bool {
        self.start as u32 <= hash && hash < self.end as u32
    }
}

/// Lays the variations of a percentage split out over the bucket space.
///
/// Variation names are taken in descending lexicographic order so that legacy `True`/`False`
/// flags keep placing `True` first.
pub fn percentage_buckets(percentages: &BTreeMap<String, f64>) -> Vec<(&str, PercentageBucket)> {
    let mut start = 0.0;
    percentages
        .iter()
        .rev()
        .map(|(name, pct)| {
            let end = start + pct * PERCENTAGE_MULTIPLIER;
            let bucket = PercentageBucket { start, end };
            start = end;
            (name.as_str(), bucket)
        })
        .collect()
}

/// Size of the bucket space for a percentage split.
pub fn percentage_space(percentages: &BTreeMap<String, f64>) -> u32 {
    (percentages.values().sum::<f64>() * PERCENTAGE_MULTIPLIER) as u32
}

/// Returns the variation whose bucket holds `hash`, if any.
pub fn variation_for_hash(percentages: &BTreeMap<String, f64>, hash: u32) -> Option<&str> {
    percentage_buckets(percentages)
        .into_iter()
        .find(|(_, bucket)| bucket.contains(hash))
        .map(|(name, _)| name)
}
