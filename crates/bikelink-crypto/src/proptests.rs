#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::keypair::KeyPair;
    use crate::primitives::{aead_open, aead_seal, hash_kdf, scalar_mult, scalar_mult_base};
    use crate::xeddsa::{sign, verify};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        // verify(scalar_mult_base(sk), m, sign(sk, m)) holds for every key and message
        #[test]
        fn test_xeddsa_round_trip(
            secret in any::<[u8; 32]>(),
            message in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let public = scalar_mult_base(&secret);
            let sig = sign(&secret, &message).unwrap();
            prop_assert!(verify(&public, &message, &sig));
        }

        #[test]
        fn test_xeddsa_message_bit_flip_fails(
            secret in any::<[u8; 32]>(),
            message in proptest::collection::vec(any::<u8>(), 1..256),
            bit in any::<usize>()
        ) {
            let public = scalar_mult_base(&secret);
            let sig = sign(&secret, &message).unwrap();

            let mut tampered = message.clone();
            let bit = bit % (tampered.len() * 8);
            tampered[bit / 8] ^= 1 << (bit % 8);
            prop_assert!(!verify(&public, &tampered, &sig));
        }

        #[test]
        fn test_dh_commutes(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let a_pub = scalar_mult_base(&a);
            let b_pub = scalar_mult_base(&b);
            let ab = scalar_mult(&a, &b_pub).unwrap();
            let ba = scalar_mult(&b, &a_pub).unwrap();
            prop_assert_eq!(*ab, *ba);
        }

        #[test]
        fn test_aead_round_trip_and_tamper(
            key in any::<[u8; 32]>(),
            nonce in any::<[u8; 24]>(),
            ad in any::<[u8; 32]>(),
            plaintext in proptest::collection::vec(any::<u8>(), 1..512),
            flip in any::<usize>()
        ) {
            let (ct, mac) = aead_seal(&key, &nonce, &ad, &plaintext).unwrap();
            let pt = aead_open(&key, &nonce, &ad, &ct, &mac).unwrap();
            prop_assert_eq!(pt.as_slice(), plaintext.as_slice());

            let mut bad = ct.clone();
            let idx = flip % bad.len();
            bad[idx] ^= 0x01;
            prop_assert!(aead_open(&key, &nonce, &ad, &bad, &mac).is_err());
        }

        #[test]
        fn test_keypair_serialization_restores(secret in any::<[u8; 32]>()) {
            let kp = KeyPair::from_secret(&secret);
            let restored = KeyPair::from_bytes(&kp.to_bytes()).unwrap();
            prop_assert_eq!(restored.public(), kp.public());
            prop_assert_eq!(*kp.public(), scalar_mult_base(&secret));
        }

        #[test]
        fn test_kdf_depends_on_every_chunk(
            dh in any::<[[u8; 32]; 4]>(),
            which in 0..4usize,
            byte in 0..32usize
        ) {
            let original = hash_kdf(&[&dh[0][..], &dh[1][..], &dh[2][..], &dh[3][..]]);
            let mut changed = dh;
            changed[which][byte] ^= 0x80;
            let other = hash_kdf(&[
                &changed[0][..],
                &changed[1][..],
                &changed[2][..],
                &changed[3][..],
            ]);
            prop_assert_ne!(*original, *other);
        }
    }
}
