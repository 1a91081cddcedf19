//! Pairing protocol: validate a server-authorised pair request and issue a
//! fresh per-phone pairing keypair.

use tracing::{info, warn};

use bikelink_crypto::utils::{constant_time_compare_array, is_all_zero};
use bikelink_crypto::{xeddsa, KeyPair};

use crate::config::LinkConfig;
use crate::errors::LinkError;
use crate::store::{PairingRecord, TrustStore};
use crate::types::key_prefix;
use crate::wire::{PairRequest, PairResponse, PairResponseContents};

/// Result of a successful pairing.
#[derive(Debug, Clone)]
pub struct PairingOutcome {
    pub slot: usize,
    pub response: PairResponse,
}

/// Handle a raw `PairRequest`.
///
/// On success the new pairing record is already persisted and the returned
/// response is signed with the new bike pairing key. On failure nothing in
/// the store has changed.
pub fn handle_pair_request(
    store: &mut TrustStore,
    config: &LinkConfig,
    now_unix: u64,
    bytes: &[u8],
) -> Result<PairingOutcome, LinkError> {
    let request = PairRequest::decode(bytes)?;
    let contents = &request.contents;

    if is_all_zero(&contents.phone_identity_pk) || is_all_zero(&contents.phone_pairing_pk) {
        return Err(LinkError::MalformedRequest(
            "phone key is all zero".to_string(),
        ));
    }

    if !constant_time_compare_array(&contents.bike_identity_pk, store.identity().public()) {
        warn!(
            bike = %key_prefix(&contents.bike_identity_pk),
            "pair request addressed to another bike"
        );
        return Err(LinkError::UntrustedPairingRequest);
    }

    if !xeddsa::verify(
        store.server_public_key(),
        &contents.to_bytes(),
        &request.signature,
    ) {
        warn!(
            phone = %key_prefix(&contents.phone_identity_pk),
            "pair request not signed by the trusted server"
        );
        return Err(LinkError::UntrustedPairingRequest);
    }

    if !contents.validity.is_well_formed() {
        return Err(LinkError::MalformedRequest(
            "validity window starts after it ends".to_string(),
        ));
    }
    if config.enforce_validity_window && contents.validity.end < now_unix {
        warn!(
            end = contents.validity.end,
            now = now_unix,
            "pair request validity window already over"
        );
        return Err(LinkError::PairingExpired);
    }

    let known = store.find_pairing_by_phone_identity(&contents.phone_identity_pk);
    if known.is_none() && store.pairing_count() >= store.capacity() {
        warn!(
            capacity = store.capacity(),
            phone = %key_prefix(&contents.phone_identity_pk),
            "pairing table full"
        );
        return Err(LinkError::PairingTableFull);
    }

    let bike_pairing = KeyPair::generate()?;
    let response_contents = PairResponseContents {
        phone_pairing_pk: contents.phone_pairing_pk,
        bike_pairing_pk: *bike_pairing.public(),
    };
    let signature = bike_pairing.sign(&response_contents.to_bytes())?;

    let slot = store.upsert_pairing(PairingRecord {
        phone_identity_pk: contents.phone_identity_pk,
        bike_pairing,
        phone_pairing_pk: contents.phone_pairing_pk,
        validity: contents.validity,
    })?;

    info!(
        slot,
        repaired = known.is_some(),
        phone = %key_prefix(&contents.phone_identity_pk),
        bike_pairing = %key_prefix(&response_contents.bike_pairing_pk),
        "phone paired"
    );

    Ok(PairingOutcome {
        slot,
        response: PairResponse {
            signature,
            contents: response_contents,
        },
    })
}
