//! The versionstamp authority (§4.3): a strictly monotonic, 20-lowercase-hex
//! identifier used to order and validate writes.
//!
//! Per §9 "Global mutable counter", the sequence is **not** a module-level
//! variable — it is a persistent counter that lives in the store itself
//! (`Engine::get_counter`/`set_counter`), so that two handles sharing the
//! same on-disk store never diverge. `next` must be called from inside the
//! same store transaction that performs the surrounding commit (§4.3:
//! "the increment must occur inside a transaction so that two handles
//! cannot read the same sequence").

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CResult;
use crate::storage::engine::Engine;

/// 20 hex chars * 4 bits = 80 bits.
const VERSIONSTAMP_HEX_LEN: usize = 20;

pub struct VersionstampAuthority;

impl VersionstampAuthority {
    /// Increments the store's persistent sequence counter and combines it
    /// with the current wall-clock microseconds into a 20-char hex string:
    /// `combined = (micros << 20) | (seq & 0xFFFFF)`.
    pub fn next<E: Engine>(engine: &mut E) -> CResult<String> {
        let seq = engine.get_counter()?.wrapping_add(1);
        engine.set_counter(seq)?;
        Ok(Self::format(now_micros(), seq))
    }

    fn format(micros: u128, seq: u64) -> String {
        let combined: u128 = (micros << 20) | (seq as u128 & 0xFFFFF);
        format!("{:0width$x}", combined, width = VERSIONSTAMP_HEX_LEN)
    }
}

fn now_micros() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_micros()
}

/// Current wall-clock time in milliseconds, used for TTL comparisons and
/// `expires_at` computation (§4.2, §4.6) wherever an `Engine` call needs
/// `now_ms`.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis() as i64
}

/// Validates that `s` is exactly 20 lowercase hex characters (§4.6's
/// per-operation check validation, §7 `InvalidMutation`).
pub fn is_valid_versionstamp(s: &str) -> bool {
    s.len() == VERSIONSTAMP_HEX_LEN && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_to_twenty_lowercase_hex_chars() {
        let vs = VersionstampAuthority::format(123456789, 7);
        assert_eq!(vs.len(), 20);
        assert!(vs.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn strictly_increasing_across_rapid_fire_sequence_increments() {
        let micros = now_micros();
        let mut prev = VersionstampAuthority::format(micros, 0);
        for seq in 1..10_000u64 {
            let vs = VersionstampAuthority::format(micros, seq);
            assert!(vs > prev, "seq {} did not increase versionstamp", seq);
            prev = vs;
        }
    }

    #[test]
    fn validates_versionstamp_shape() {
        let vs = format!("{:0>19}a", "");
        assert_eq!(vs.len(), 20);
        assert!(is_valid_versionstamp(&vs));
        assert!(!is_valid_versionstamp("too-short"));
        assert!(!is_valid_versionstamp(&"A".repeat(20)));
    }
}
