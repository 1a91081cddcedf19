#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::config::AgentConfig;
    use crate::identity::parse_server_key;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_server_key_hex_round_trip(key in any::<[u8; 32]>()) {
            prop_assert_eq!(parse_server_key(&hex::encode(key)).unwrap(), key);
            prop_assert_eq!(parse_server_key(&hex::encode_upper(key)).unwrap(), key);
        }

        #[test]
        fn test_server_key_wrong_length_rejected(
            bytes in proptest::collection::vec(any::<u8>(), 0..64)
        ) {
            prop_assume!(bytes.len() != 32);
            prop_assert!(parse_server_key(&hex::encode(&bytes)).is_err());
        }

        #[test]
        fn test_numeric_overrides_apply_or_fail_cleanly(value in "\\PC{0,12}") {
            let mut config = AgentConfig::default();
            let result = config.apply_overrides(vec![
                ("BIKELINK_MAX_PAIRED_PHONES".to_string(), value.clone()),
            ]);
            match value.parse::<usize>() {
                Ok(n) => {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(config.link.max_paired_phones, n);
                    prop_assert_eq!(config.validate().is_ok(), (1..=255).contains(&n));
                }
                Err(_) => prop_assert!(result.is_err()),
            }
        }

        #[test]
        fn test_queue_depth_from_toml(depth in 0usize..1024) {
            let config = AgentConfig::from_toml(&format!("queue_depth = {depth}")).unwrap();
            prop_assert_eq!(config.queue_depth, depth);
            prop_assert_eq!(config.validate().is_ok(), depth > 0);
        }
    }
}
