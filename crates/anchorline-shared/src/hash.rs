//! Commit hash over exact batch bytes.
//!
//! BLAKE3 (32-byte output) over the bytes exactly as uploaded. Callers must
//! never re-serialize a parsed batch before hashing it: two encoders that
//! disagree on whitespace would then disagree on the hash.

use crate::types::CommitHash;

pub fn compute(bytes: &[u8]) -> CommitHash {
    CommitHash(*blake3::hash(bytes).as_bytes())
}

// blake3::Hash equality is constant-time
pub fn verify(bytes: &[u8], expected: &CommitHash) -> bool {
    blake3::hash(bytes) == blake3::Hash::from(expected.0)
}
