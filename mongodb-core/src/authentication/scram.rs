//! SCRAM credential derivation for users stored in the automation config.

use anyhow::{anyhow, Context, Result};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::deployment::ScramCreds;

const CLIENT_KEY: &[u8] = b"Client Key";
const SERVER_KEY: &[u8] = b"Server Key";

/// The hash function a set of SCRAM credentials is derived with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScramVariant {
    Sha1,
    Sha256,
}

impl ScramVariant {
    pub fn iterations(&self) -> u32 {
        match self {
            Self::Sha1 => 10_000,
            Self::Sha256 => 15_000,
        }
    }

    /// Salt length in bytes: the digest length minus four.
    pub fn salt_len(&self) -> usize {
        match self {
            Self::Sha1 => 20 - 4,
            Self::Sha256 => 32 - 4,
        }
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    fn hmac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        Ok(match self {
            Self::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(|_| anyhow!("invalid HMAC key length"))?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            Self::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|_| anyhow!("invalid HMAC key length"))?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    /// The password fed into the key derivation.
    ///
    /// SHA-1 credentials are derived from the legacy MONGODB-CR digest of the password.
    fn input_password(&self, username: &str, password: &str) -> Vec<u8> {
        match self {
            Self::Sha1 => hex::encode(Md5::digest(format!("{}:mongo:{}", username, password).as_bytes())).into_bytes(),
            Self::Sha256 => password.as_bytes().to_vec(),
        }
    }

    /// The iterated HMAC of RFC 5802, `Hi(password, salt, i)`.
    fn salted_password(&self, password: &[u8], salt: &[u8], iterations: u32) -> Result<Vec<u8>> {
        let mut block = salt.to_vec();
        block.extend_from_slice(&1u32.to_be_bytes());
        let mut prev = self.hmac(password, &block)?;
        let mut result = prev.clone();
        for _ in 1..iterations {
            prev = self.hmac(password, &prev)?;
            result.iter_mut().zip(prev.iter()).for_each(|(acc, byte)| *acc ^= byte);
        }
        Ok(result)
    }
}

/// Derive credentials for the given user with a freshly generated salt.
pub fn compute_creds(variant: ScramVariant, username: &str, password: &str) -> Result<ScramCreds> {
    let mut salt = vec![0u8; variant.salt_len()];
    rand::thread_rng().fill_bytes(&mut salt);
    compute_creds_with_salt(variant, username, password, &salt, variant.iterations())
}

/// Derive credentials for the given user using a known salt.
pub fn compute_creds_with_salt(variant: ScramVariant, username: &str, password: &str, salt: &[u8], iterations: u32) -> Result<ScramCreds> {
    let salted = variant.salted_password(&variant.input_password(username, password), salt, iterations)?;
    let client_key = variant.hmac(&salted, CLIENT_KEY)?;
    let server_key = variant.hmac(&salted, SERVER_KEY)?;
    let stored_key = variant.hash(&client_key);
    Ok(ScramCreds {
        iteration_count: iterations,
        salt: base64::encode(salt),
        server_key: base64::encode(&server_key),
        stored_key: base64::encode(&stored_key),
    })
}

/// Check whether existing credentials were derived from the given password.
///
/// Used to keep the stored salt when a password did not change.
pub fn creds_match(creds: &ScramCreds, variant: ScramVariant, username: &str, password: &str) -> Result<bool> {
    let salt = base64::decode(&creds.salt).context("error decoding SCRAM salt")?;
    let derived = compute_creds_with_salt(variant, username, password, &salt, creds.iteration_count)?;
    Ok(&derived == creds)
}
