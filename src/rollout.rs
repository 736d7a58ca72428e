use sha1::{Digest, Sha1};

use crate::util::normalize_key;

/// Number of buckets a customer can fall into; exposure percentages map one bucket per percent.
pub const BUCKET_COUNT: u32 = 100;

const HASH_HEX_DIGITS: usize = 15;
const BUCKET_SCALE: u64 = 1 << (HASH_HEX_DIGITS * 4);

/// Returns the rollout bucket in `[0, 100)` for a customer and gate.
///
/// The bucket is derived from a SHA-1 digest of the lowercased gate name and the customer id, so
/// it is identical on every replica and across restarts. No salt is mixed in.
pub fn bucket(gate_name: &str, customer_id: &str) -> u32 {
    let mut hash = Sha1::new();
    hash.update(normalize_key(gate_name).as_bytes());
    hash.update(b".");
    hash.update(customer_id.as_bytes());

    let digest = hash.finalize();
    let hexhash = base16ct::lower::encode_string(&digest);

    // 15 hex digits fit in 60 bits; a digest is always longer than that and always valid hex
    let numhash = u64::from_str_radix(&hexhash[..HASH_HEX_DIGITS], 16).unwrap_or_default();

    ((u128::from(numhash) * u128::from(BUCKET_COUNT)) / u128::from(BUCKET_SCALE)) as u32
}

/// Returns true if the customer falls inside the exposed share of a gate's rollout.
///
/// Without a customer id there is nothing stable to bucket on, so only a full rollout passes.
pub fn is_exposed(gate_name: &str, customer_id: Option<&str>, exposure: u32) -> bool {
    if exposure >= BUCKET_COUNT {
        return true;
    }
    if exposure == 0 {
        return false;
    }
    match customer_id {
        Some(id) => bucket(gate_name, id) < exposure,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use spectral::prelude::*;

    #[test]
    fn bucket_is_stable_for_the_same_inputs() {
        let first = bucket("checkout", "customer-42");
        for _ in 0..10 {
            assert_eq!(bucket("checkout", "customer-42"), first);
        }
    }

    #[test]
    fn bucket_ignores_gate_name_case() {
        assert_eq!(bucket("Checkout", "c1"), bucket("checkout", "c1"));
    }

    #[test]
    fn bucket_depends_on_gate_name() {
        let differing = (0..200)
            .map(|i| format!("customer-{}", i))
            .filter(|id| bucket("gateA", id) != bucket("gateB", id))
            .count();
        assert_that!(differing).is_greater_than(150);
    }

    #[test]
    fn buckets_are_roughly_uniform() {
        let exposed = (0..10_000)
            .filter(|i| is_exposed("uniform", Some(&i.to_string()), 30))
            .count();
        assert_that!(exposed).is_greater_than(2_700);
        assert_that!(exposed).is_less_than(3_300);
    }

    #[test]
    fn missing_customer_only_passes_full_rollout() {
        assert!(!is_exposed("gate", None, 99));
        assert!(is_exposed("gate", None, 100));
        assert!(!is_exposed("gate", None, 0));
    }

    #[test]
    fn exposure_is_monotonic_for_a_customer() {
        let b = bucket("monotonic", "customer-7");
        assert!(!is_exposed("monotonic", Some("customer-7"), b));
        assert!(is_exposed("monotonic", Some("customer-7"), b + 1));
    }

    proptest! {
        #[test]
        fn bucket_is_in_range(gate in "[a-zA-Z0-9_.-]{1,20}", customer in ".{0,40}") {
            prop_assert!(bucket(&gate, &customer) < BUCKET_COUNT);
        }

        #[test]
        fn zero_percent_is_never_exposed(customer in ".{0,40}") {
            prop_assert!(!is_exposed("gateX", Some(&customer), 0));
        }

        #[test]
        fn hundred_percent_is_always_exposed(customer in ".{0,40}") {
            prop_assert!(is_exposed("gateX", Some(&customer), 100));
        }
    }
}
