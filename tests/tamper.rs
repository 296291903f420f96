use denis::{
    ContentTag, DenisError, ErrorKind, Key, PAIR_SIZE, VERSION, decode_bytes, encode_bytes,
    encode_container, inspect_file,
};
use tempfile::tempdir;

fn key() -> Key {
    "0f0e0d0c0b0a09080706050403020100:0002".parse().unwrap()
}

fn container() -> Vec<u8> {
    // Short input: the bottom-right grid byte, which ends the payload, can't reach 0xFF.
    encode_bytes(b"integrity matters", &key(), ContentTag::Any).unwrap()
}

/// Flip one magic byte and expect a magic mismatch naming both values.
#[test]
fn flipped_magic_fails() {
    let mut ct = container();
    ct[0] ^= 0x20;
    match decode_bytes(&ct, &key()) {
        Err(e @ DenisError::MagicMismatch { .. }) => {
            assert_eq!(e.kind(), ErrorKind::Integrity);
            let msg = e.to_string();
            assert!(msg.contains("DENIS") && msg.contains("dENIS"), "{msg}");
        }
        other => panic!("expected MagicMismatch, got {other:?}"),
    }
}

/// Drop the last terminator byte.
#[test]
fn truncated_terminator_fails() {
    let mut ct = container();
    ct.pop();
    assert!(matches!(
        decode_bytes(&ct, &key()),
        Err(DenisError::TerminatorMismatch { .. })
    ));
}

/// Overwrite one terminator byte in place.
#[test]
fn corrupted_terminator_fails() {
    let mut ct = container();
    let last = ct.len() - 3;
    ct[last] = 0x00;
    assert!(matches!(
        decode_bytes(&ct, &key()),
        Err(DenisError::TerminatorMismatch { .. })
    ));
}

/// Change the declared payload length.
#[test]
fn altered_payload_length_fails() {
    let mut ct = container();
    ct[16] ^= 0x01;
    match decode_bytes(&ct, &key()) {
        Err(DenisError::SizeMismatch { declared, actual }) => {
            assert_eq!(actual, 16_384);
            assert_ne!(declared, actual);
        }
        other => panic!("expected SizeMismatch, got {other:?}"),
    }
}

#[test]
fn unsupported_version_fails() {
    let mut ct = container();
    ct[5] = 7;
    let err = decode_bytes(&ct, &key()).unwrap_err();
    assert!(matches!(err, DenisError::UnsupportedVersion(7)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn extra_trailing_bytes_fail() {
    let mut ct = container();
    ct.extend_from_slice(&[0xFF; 4]);
    assert!(decode_bytes(&ct, &key()).is_err());
}

#[test]
fn empty_input_fails() {
    assert!(matches!(
        decode_bytes(&[], &key()),
        Err(DenisError::Truncated { len: 0, .. })
    ));
}

/// `inspect` must refuse exactly what `decode` refuses.
#[test]
fn inspect_and_decode_agree_on_bad_shapes() {
    let dir = tempdir().unwrap();

    let (_, ragged) = encode_container(&[0u8; 100], ContentTag::Any, VERSION, 0).unwrap();
    let ragged_path = dir.path().join("ragged.denis");
    std::fs::write(&ragged_path, &ragged).unwrap();
    assert!(matches!(
        inspect_file(&ragged_path),
        Err(DenisError::MisalignedPayload { len: 100, .. })
    ));
    assert!(matches!(
        decode_bytes(&ragged, &key()),
        Err(DenisError::MisalignedPayload { len: 100, .. })
    ));

    let (_, padded) =
        encode_container(&vec![0u8; PAIR_SIZE], ContentTag::Any, VERSION, 9000).unwrap();
    let padded_path = dir.path().join("padded.denis");
    std::fs::write(&padded_path, &padded).unwrap();
    let err = inspect_file(&padded_path).unwrap_err();
    assert!(matches!(err, DenisError::PaddingOutOfRange { padding: 9000, .. }));
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert!(matches!(
        decode_bytes(&padded, &key()),
        Err(DenisError::PaddingOutOfRange { padding: 9000, .. })
    ));
}
