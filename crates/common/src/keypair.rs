use ed25519_dalek::{Signer, SigningKey};
use std::fmt;
use stellar_strkey::ed25519::{PrivateKey, PublicKey};

use crate::error::{Error, Result};

/// An ed25519 keypair for a Stellar account, built from its secret seed
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    address: String,
}

impl Keypair {
    /// Parse a secret seed (`S...`) and derive the account address (`G...`)
    pub fn from_secret(seed: &str) -> Result<Self> {
        let private_key = PrivateKey::from_string(seed).map_err(|_| Error::InvalidSeed)?;
        let signing_key = SigningKey::from_bytes(&private_key.0);
        let address = PublicKey(signing_key.verifying_key().to_bytes()).to_string();

        Ok(Self {
            signing_key,
            address,
        })
    }

    /// Account identifier in StrKey form
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Raw 32-byte public key
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Last four bytes of the public key, used as the signature hint
    pub fn hint(&self) -> [u8; 4] {
        let public_key = self.public_key();
        [public_key[28], public_key[29], public_key[30], public_key[31]]
    }

    /// Sign an arbitrary payload (normally a transaction hash)
    pub fn sign(&self, payload: &[u8]) -> [u8; 64] {
        self.signing_key.sign(payload).to_bytes()
    }
}

// Never print the seed
impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish()
    }
}

/// Decode an account identifier (`G...`) into its raw public key
pub fn decode_account_id(account_id: &str) -> Option<[u8; 32]> {
    PublicKey::from_string(account_id).ok().map(|key| key.0)
}

/// Check whether a string is a well-formed account identifier
pub fn is_valid_account_id(account_id: &str) -> bool {
    decode_account_id(account_id).is_some()
}

/// Encode a raw public key as an account identifier
pub fn encode_account_id(public_key: [u8; 32]) -> String {
    PublicKey(public_key).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_derives_address() {
        let seed = PrivateKey([7u8; 32]).to_string();
        let keypair = Keypair::from_secret(&seed).unwrap();

        assert!(keypair.address().starts_with('G'));
        assert!(is_valid_account_id(keypair.address()));
        assert_eq!(
            decode_account_id(keypair.address()),
            Some(keypair.public_key())
        );
    }

    #[test]
    fn test_invalid_seed_is_rejected() {
        assert!(matches!(
            Keypair::from_secret("not-a-seed"),
            Err(Error::InvalidSeed)
        ));

        // An account id is not a seed
        let address = encode_account_id([1u8; 32]);
        assert!(Keypair::from_secret(&address).is_err());
    }

    #[test]
    fn test_debug_hides_seed() {
        let seed = PrivateKey([9u8; 32]).to_string();
        let keypair = Keypair::from_secret(&seed).unwrap();
        let printed = format!("{:?}", keypair);
        assert!(!printed.contains(&seed));
        assert!(printed.contains(keypair.address()));
    }
}
