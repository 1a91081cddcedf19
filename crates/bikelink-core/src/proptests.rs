#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::channel::{decrypt, encrypt};
    use crate::config::DEFAULT_MAX_COMMAND_LEN;
    use crate::session::SessionContext;
    use crate::wire::{
        PairRequest, SecureFrame, SessionRequest, FRAME_OVERHEAD, PAIR_REQUEST_LEN,
        SESSION_REQUEST_LEN,
    };
    use crate::errors::LinkError;

    fn session(key: [u8; 32], id: [u8; 32]) -> SessionContext {
        SessionContext::new([1; 32], [2; 32], id, &key)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_channel_round_trip(
            key in any::<[u8; 32]>(),
            id in any::<[u8; 32]>(),
            command in proptest::collection::vec(any::<u8>(), 0..=DEFAULT_MAX_COMMAND_LEN)
        ) {
            let s = session(key, id);
            let frame = encrypt(&s, &command, DEFAULT_MAX_COMMAND_LEN).unwrap();
            prop_assert_eq!(frame.len(), command.len() + FRAME_OVERHEAD);
            let opened = decrypt(&s, &frame, DEFAULT_MAX_COMMAND_LEN).unwrap();
            prop_assert_eq!(opened.as_slice(), command.as_slice());
        }

        #[test]
        fn test_channel_single_byte_mutation_fails(
            key in any::<[u8; 32]>(),
            command in proptest::collection::vec(any::<u8>(), 1..128),
            position in any::<usize>(),
            mask in 1u8..=255
        ) {
            let s = session(key, [9; 32]);
            let mut frame = encrypt(&s, &command, DEFAULT_MAX_COMMAND_LEN).unwrap().to_vec();
            let idx = position % frame.len();
            frame[idx] ^= mask;
            prop_assert_eq!(
                decrypt(&s, &frame, DEFAULT_MAX_COMMAND_LEN).unwrap_err(),
                LinkError::AuthenticationFailed
            );
        }

        #[test]
        fn test_decoders_reject_every_wrong_length(len in 0usize..400) {
            prop_assume!(len != PAIR_REQUEST_LEN && len != SESSION_REQUEST_LEN);
            let bytes = vec![0xA5u8; len];
            prop_assert!(PairRequest::decode(&bytes).is_err());
            prop_assert!(SessionRequest::decode(&bytes).is_err());
        }

        #[test]
        fn test_frame_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..200)) {
            match SecureFrame::decode(&bytes) {
                Ok(frame) => prop_assert_eq!(frame.ciphertext.len(), bytes.len() - FRAME_OVERHEAD),
                Err(_) => prop_assert!(bytes.len() < FRAME_OVERHEAD),
            }
        }

        #[test]
        fn test_garbage_frames_fail_authentication(
            bytes in proptest::collection::vec(any::<u8>(), 0..200)
        ) {
            let s = session([3; 32], [4; 32]);
            prop_assert_eq!(
                decrypt(&s, &bytes, DEFAULT_MAX_COMMAND_LEN).unwrap_err(),
                LinkError::AuthenticationFailed
            );
        }
    }
}
