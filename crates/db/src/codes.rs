//! Redemption codes.
//!
//! A code packs 100 bits into 20 Crockford base32 characters:
//! the top 40 bits are a per-process sequence number passed through an odd
//! multiplier (a bijection mod 2^40, so two codes from one generator never
//! share them), the low 60 bits mix the event, the user and a random draw.
//! Across processes the `UNIQUE` index on `reservations.code` is the final
//! word and allocation retries on collision.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const SEQUENCE_BITS: u32 = 40;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const MIX_MASK: u64 = (1 << 60) - 1;
const SCRAMBLE: u64 = 0x9E37_79B9_7F4B;
const CODE_CHARS: usize = 20;
const GROUP: usize = 5;

#[derive(Debug)]
pub struct CodeGenerator {
    sequence: AtomicU64,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator {
    /// Sequence seeded from the clock so restarts rarely revisit old values.
    pub fn new() -> Self {
        let seed = Utc::now().timestamp_micros().unsigned_abs();
        Self::starting_at(seed)
    }

    pub fn starting_at(seed: u64) -> Self {
        Self {
            sequence: AtomicU64::new(seed),
        }
    }

    pub fn next(&self, event_id: i64, user_id: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let scrambled = sequence.wrapping_mul(SCRAMBLE) & SEQUENCE_MASK;

        let mut hasher = DefaultHasher::new();
        event_id.hash(&mut hasher);
        user_id.hash(&mut hasher);
        sequence.hash(&mut hasher);
        let mix = (hasher.finish() ^ rand::random::<u64>()) & MIX_MASK;

        let value = (u128::from(scrambled) << 60) | u128::from(mix);
        encode(value)
    }
}

fn encode(value: u128) -> String {
    let mut out = String::with_capacity(CODE_CHARS + CODE_CHARS / GROUP - 1);
    for i in 0..CODE_CHARS {
        if i > 0 && i % GROUP == 0 {
            out.push('-');
        }
        let shift = 5 * (CODE_CHARS - 1 - i);
        let index = ((value >> shift) & 0x1F) as usize;
        out.push(ALPHABET[index] as char);
    }
    out
}

/// Canonical form of a scanned code: trimmed and uppercased.
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn code_shape() {
        let codes = CodeGenerator::starting_at(0);
        let code = codes.next(1, "user-a");
        assert_eq!(code.len(), 23);
        assert_eq!(code.matches('-').count(), 3);
        assert!(code.chars().all(|c| c == '-' || ALPHABET.contains(&(c as u8))));
    }

    #[test]
    fn normalize_is_case_insensitive() {
        assert_eq!(normalize("  abcde-12345 "), "ABCDE-12345");
    }

    #[test]
    fn one_hundred_thousand_concurrent_codes_are_unique() {
        let codes = Arc::new(CodeGenerator::new());
        let handles: Vec<_> = (0..8_i64)
            .map(|worker| {
                let codes = Arc::clone(&codes);
                std::thread::spawn(move || {
                    (0..12_500)
                        .map(|i| codes.next(worker % 3, &format!("user-{}", i % 17)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for code in handle.join().unwrap() {
                assert!(seen.insert(code), "duplicate code issued");
            }
        }
        assert_eq!(seen.len(), 100_000);
    }

    #[test]
    fn scramble_is_a_bijection_on_sequence_bits() {
        let a = 17u64.wrapping_mul(SCRAMBLE) & SEQUENCE_MASK;
        let b = 18u64.wrapping_mul(SCRAMBLE) & SEQUENCE_MASK;
        assert_ne!(a, b);
        assert_eq!(SCRAMBLE % 2, 1);
    }
}
