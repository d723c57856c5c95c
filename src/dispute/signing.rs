use secp256k1::{schnorr::Signature, KeyPair, Message, Secp256k1, XOnlyPublicKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::common::error::EscrowError;

/// Bytes a dispute result signature is computed over. The only way to get
/// one is through `CanonicalBytes::new`, so signing and verification can
/// never disagree on the serialization used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    pub fn new(obj: &impl Serialize) -> Result<Self, EscrowError> {
        let bytes = serde_json::to_vec(obj)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn digest(&self) -> Result<Message, EscrowError> {
        let hash = Sha256::digest(&self.0);
        Ok(Message::from_slice(hash.as_slice())?)
    }
}

pub(crate) fn sign(data: &CanonicalBytes, keypair: &KeyPair) -> Result<Signature, EscrowError> {
    let secp = Secp256k1::signing_only();
    let message = data.digest()?;
    Ok(secp.sign_schnorr_no_aux_rand(&message, keypair))
}

pub(crate) fn verify(
    data: &CanonicalBytes,
    signature: &Signature,
    pubkey: &XOnlyPublicKey,
) -> Result<(), EscrowError> {
    let secp = Secp256k1::verification_only();
    let message = data.digest()?;
    secp.verify_schnorr(signature, &message, pubkey)
        .map_err(|error| {
            EscrowError::InvalidDisputeResult(format!(
                "Signature verification against {} failed - {}",
                pubkey, error
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SomeTestParams;

    #[test]
    fn signature_verifies_only_for_the_signed_bytes() {
        let keypair = SomeTestParams::arbitrator_keypair();
        let (pubkey, _) = keypair.x_only_public_key();

        let data = CanonicalBytes::new(&("trade", 1_200_000u64)).unwrap();
        let signature = sign(&data, &keypair).unwrap();
        verify(&data, &signature, &pubkey).unwrap();

        let other = CanonicalBytes::new(&("trade", 1_200_001u64)).unwrap();
        assert!(matches!(
            verify(&other, &signature, &pubkey),
            Err(EscrowError::InvalidDisputeResult(_))
        ));
    }

    #[test]
    fn signature_does_not_verify_under_another_key() {
        let data = CanonicalBytes::new(&"payload").unwrap();
        let signature = sign(&data, &SomeTestParams::arbitrator_keypair()).unwrap();
        let (rogue_pubkey, _) = SomeTestParams::rogue_keypair().x_only_public_key();
        assert!(verify(&data, &signature, &rogue_pubkey).is_err());
    }
}
