//! ULID generation for task and run identifiers.
//!
//! Identifiers are 26 characters: a 10-character Crockford base-32 encoding of
//! the millisecond timestamp followed by 16 random characters. Identifiers
//! generated later sort lexicographically at or after identifiers generated
//! earlier, at millisecond resolution, which keeps task and run ids
//! time-ordered without any shared state.

use rand::Rng;

const ENCODING: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const TIME_LEN: usize = 10;
const RANDOM_LEN: usize = 16;

/// Total length of a ULID string.
pub const ULID_LEN: usize = TIME_LEN + RANDOM_LEN;

/// Generate a new ULID from the current wall clock.
pub fn generate() -> String {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut id = String::with_capacity(ULID_LEN);
    id.push_str(&encode_time(now));

    let mut rng = rand::thread_rng();
    for _ in 0..RANDOM_LEN {
        id.push(ENCODING[rng.gen_range(0..ENCODING.len())] as char);
    }
    id
}

/// Validate length, alphabet, and that the timestamp component stays within
/// the 48-bit range (leading character at most '7').
pub fn is_valid(id: &str) -> bool {
    if id.len() != ULID_LEN {
        return false;
    }
    if !id.bytes().all(|b| ENCODING.contains(&b)) {
        return false;
    }
    id.as_bytes()[0] <= b'7'
}

fn encode_time(mut ms: u64) -> String {
    let mut buf = [0u8; TIME_LEN];
    for slot in buf.iter_mut().rev() {
        *slot = ENCODING[(ms % 32) as usize];
        ms /= 32;
    }
    // Safe: every byte comes from the ASCII encoding table
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TIME_MAX: u64 = (1 << 48) - 1;

    #[test]
    fn generated_ids_are_valid() {
        for _ in 0..100 {
            let id = generate();
            assert_eq!(id.len(), ULID_LEN);
            assert!(is_valid(&id), "invalid ulid: {id}");
        }
    }

    #[test]
    fn rejects_bad_ids() {
        assert!(!is_valid(""));
        assert!(!is_valid("too-short"));
        // Right length, lowercase not in the alphabet
        assert!(!is_valid(&"a".repeat(ULID_LEN)));
        // Right length and alphabet, but timestamp exceeds 48 bits
        assert!(!is_valid(&format!("8{}", "0".repeat(ULID_LEN - 1))));
        assert!(is_valid(&format!("7{}", "Z".repeat(ULID_LEN - 1))));
    }

    #[test]
    fn ambiguous_crockford_letters_are_excluded() {
        for c in ["I", "L", "O", "U"] {
            assert!(!is_valid(&c.repeat(ULID_LEN)));
        }
    }

    proptest! {
        #[test]
        fn time_component_orders_lexicographically(a in 0..=TIME_MAX, b in 0..=TIME_MAX) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(encode_time(lo) <= encode_time(hi));
        }

        #[test]
        fn time_component_is_fixed_length(ms in 0..=TIME_MAX) {
            prop_assert_eq!(encode_time(ms).len(), 10);
        }
    }
}
