//! Seed taxonomy for reproducible parallel test execution.
//!
//! Derives independent purpose-specific seeds from a single root seed using
//! `H(root_seed || purpose_tag || scope_id)` where `H` is xxh3_64. Work units
//! (folds, ensemble members, null trials, alpha levels) then derive their own
//! seed with [`unit_seed`], so the outcome of a unit depends only on its index
//! and never on execution order.
//!
//! # Seed Categories
//!
//! - **shuffle**: fold permutation.
//! - **classifier**: classifier initialization and minibatch order.
//! - **null**: null-trial resampling.
//! - **reference**: reference draws (uniform PIT bands, base-space normals).

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

const TAG_SHUFFLE: &[u8] = b"shuffle";
const TAG_CLASSIFIER: &[u8] = b"classifier";
const TAG_NULL: &[u8] = b"null";
const TAG_REFERENCE: &[u8] = b"reference";
const TAG_UNIT: &[u8] = b"unit";

/// A set of deterministically derived seeds from a single root seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedTaxonomy {
    pub root: u64,
    pub shuffle: u64,
    pub classifier: u64,
    pub null: u64,
    pub reference: u64,
}

impl SeedTaxonomy {
    /// Derive the taxonomy for one test procedure (`scope_id` such as `"c2st"`).
    #[must_use]
    pub fn derive(root_seed: u64, scope_id: &str) -> Self {
        Self {
            root: root_seed,
            shuffle: derive_seed(root_seed, TAG_SHUFFLE, scope_id),
            classifier: derive_seed(root_seed, TAG_CLASSIFIER, scope_id),
            null: derive_seed(root_seed, TAG_NULL, scope_id),
            reference: derive_seed(root_seed, TAG_REFERENCE, scope_id),
        }
    }
}

/// Seed for unit `index` of a stream: `H(stream_seed || "unit" || index)`.
#[must_use]
pub fn unit_seed(stream_seed: u64, index: u64) -> u64 {
    let mut buf = [0_u8; 8 + 4 + 8];
    buf[..8].copy_from_slice(&stream_seed.to_le_bytes());
    buf[8..12].copy_from_slice(TAG_UNIT);
    buf[12..].copy_from_slice(&index.to_le_bytes());
    xxh3_64(&buf)
}

fn derive_seed(root_seed: u64, purpose_tag: &[u8], scope_id: &str) -> u64 {
    let mut buf = Vec::with_capacity(8 + purpose_tag.len() + scope_id.len());
    buf.extend_from_slice(&root_seed.to_le_bytes());
    buf.extend_from_slice(purpose_tag);
    buf.extend_from_slice(scope_id.as_bytes());
    xxh3_64(&buf)
}
