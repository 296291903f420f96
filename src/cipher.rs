//! Repeating-key XOR keystream. Weak on purpose: it only decorrelates the input
//! before it reaches the automaton.

use crate::types::DenisError;

/// XOR `buf` in place with `key` repeated from offset 0.
///
/// Applying it twice with the same key restores the input.
pub fn apply_keystream(buf: &mut [u8], key: &[u8]) -> Result<(), DenisError> {
    if key.is_empty() {
        return Err(DenisError::Invalid("keystream key must not be empty"));
    }
    for (b, k) in buf.iter_mut().zip(key.iter().cycle()) {
        *b ^= k;
    }
    Ok(())
}

/// Copying variant of [`apply_keystream`].
pub fn keystream(data: &[u8], key: &[u8]) -> Result<Vec<u8>, DenisError> {
    let mut out = data.to_vec();
    apply_keystream(&mut out, key)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            keystream(b"abc", &[]),
            Err(DenisError::Invalid(_))
        ));
    }

    #[test]
    fn key_repeats() {
        let out = keystream(&[0u8; 5], &[1, 2]).unwrap();
        assert_eq!(out, [1, 2, 1, 2, 1]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            failure_persistence: None,
            .. ProptestConfig::default()
        })]

        #[test]
        fn prop_involution(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            key in proptest::collection::vec(any::<u8>(), 1..40),
        ) {
            let once = keystream(&data, &key).unwrap();
            let twice = keystream(&once, &key).unwrap();
            prop_assert_eq!(twice, data);
        }
    }
}
