//! SCRAM-SHA-256 (RFC 5802) server side, with mock-verifier anti-enumeration
//! (§4.C, §7, testable property 2): an unknown username is always carried
//! through the full exchange against a deterministic synthetic verifier, so
//! neither timing nor the final result distinguishes "no such user" from
//! "wrong password".

use hmac::{Hmac, Mac, NewMac};
use sha2::{Digest, Sha256};

use crate::riverfront::worker::Worker;
use crate::riverfront::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// A parsed (or synthesized) SCRAM verifier for one username.
#[derive(Clone)]
pub struct ScramVerifier {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub stored_key: [u8; 32],
    pub server_key: [u8; 32],
    /// true if this is a synthetic verifier for a username that doesn't
    /// actually exist; authentication must never succeed against one.
    pub is_mock: bool,
}

/// Where real (non-mock) verifiers come from; an external collaborator
/// (the tenant's role catalog). Implementations return `None` for unknown
/// usernames so `get_verifier` can fall back to the mock.
pub trait ScramVerifierStore: Send + Sync {
    fn lookup(&self, user: &str) -> Option<ScramVerifier>;
}

fn hi(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password, salt, iterations, &mut out);
    out
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let out = mac.finalize().into_bytes();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    buf
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&Sha256::digest(data));
    buf
}

fn xor(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

impl ScramVerifier {
    pub fn from_password(password: &str, salt: Vec<u8>, iterations: u32) -> Self {
        let salted_password = hi(password.as_bytes(), &salt, iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);
        let server_key = hmac(&salted_password, b"Server Key");
        ScramVerifier { salt, iterations, stored_key, server_key, is_mock: false }
    }

    /// Deterministic in `(cluster_mock_nonce, user)`: same inputs always
    /// produce the same salt, so repeated auth attempts against the same
    /// unknown user look identical to an outside observer.
    pub fn mock(cluster_mock_nonce: &str, user: &str, default_iterations: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(cluster_mock_nonce.as_bytes());
        hasher.update(user.as_bytes());
        let salt = hasher.finalize().to_vec();
        // Deterministic stored/server keys too: derive them from the same
        // hash, not from a real password, so a mock verifier can never match
        // a client proof regardless of what password the client sends.
        let stored_key = sha256(&[salt.as_slice(), b"stored"].concat());
        let server_key = sha256(&[salt.as_slice(), b"server"].concat());
        ScramVerifier { salt, iterations: default_iterations, stored_key, server_key, is_mock: true }
    }
}

/// Retrieves the verifier for `user`: the real one from `store` if the user
/// exists, otherwise a mock. Callers must always run the full exchange
/// against whatever this returns, never short-circuiting on `is_mock`.
pub fn get_verifier(
    store: &dyn ScramVerifierStore,
    user: &str,
    cluster_mock_nonce: &str,
    default_iterations: u32,
) -> ScramVerifier {
    store.lookup(user).unwrap_or_else(|| ScramVerifier::mock(cluster_mock_nonce, user, default_iterations))
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 18];
    for chunk in bytes.chunks_mut(4) {
        let r = Worker::get().rand32().to_be_bytes();
        chunk.copy_from_slice(&r[..chunk.len()]);
    }
    base64::encode(bytes)
}

/// Server-side state for one SCRAM-SHA-256 exchange (`client-first-message`
/// through `server-final-message`).
pub struct ScramExchange {
    verifier: ScramVerifier,
    client_first_bare: String,
    server_first: String,
    combined_nonce: String,
}

impl ScramExchange {
    /// Parses a `client-first-message` (`n,,n=<user>,r=<client_nonce>`) and
    /// produces the `server-first-message`.
    pub fn new(verifier: ScramVerifier, client_first_message: &str) -> Result<Self> {
        let bare = client_first_message
            .splitn(3, ',')
            .nth(2)
            .ok_or_else(|| Error::protocol_violation("malformed SCRAM client-first-message"))?;
        let mut client_nonce = None;
        for field in bare.split(',') {
            if let Some(n) = field.strip_prefix("r=") {
                client_nonce = Some(n.to_string());
            }
        }
        let client_nonce = client_nonce.ok_or_else(|| Error::protocol_violation("missing client nonce"))?;
        let combined_nonce = format!("{}{}", client_nonce, random_nonce());
        let server_first = format!(
            "r={},s={},i={}",
            combined_nonce,
            base64::encode(&verifier.salt),
            verifier.iterations,
        );
        Ok(ScramExchange { verifier, client_first_bare: bare.to_string(), server_first, combined_nonce })
    }

    pub fn server_first_message(&self) -> &str {
        &self.server_first
    }

    /// Verifies the `client-final-message` and, on success, returns the
    /// `server-final-message` to send back. Per §4.C, success additionally
    /// requires the verifier not be a mock; this is enforced by the caller
    /// checking `is_mock()`, not folded into this return value, so the
    /// exchange itself always completes identically either way.
    pub fn verify_client_final(&self, client_final_message: &str) -> Result<String> {
        let without_proof = client_final_message
            .rsplit_once(",p=")
            .map(|(rest, _)| rest)
            .ok_or_else(|| Error::protocol_violation("malformed SCRAM client-final-message"))?;
        let proof_b64 = client_final_message
            .rsplit_once(",p=")
            .map(|(_, p)| p)
            .ok_or_else(|| Error::protocol_violation("malformed SCRAM client-final-message"))?;

        let channel_binding = without_proof
            .split(',')
            .find_map(|f| f.strip_prefix("c="))
            .ok_or_else(|| Error::protocol_violation("missing channel binding"))?;
        let nonce = without_proof
            .split(',')
            .find_map(|f| f.strip_prefix("r="))
            .ok_or_else(|| Error::protocol_violation("missing nonce"))?;
        if channel_binding != "biws" {
            return Err(Error::protocol_violation("unsupported channel binding"));
        }
        if nonce != self.combined_nonce {
            return Err(Error::authentication_failed());
        }

        let client_proof = base64::decode(proof_b64).map_err(|_| Error::authentication_failed())?;
        if client_proof.len() != 32 {
            return Err(Error::authentication_failed());
        }
        let mut proof = [0u8; 32];
        proof.copy_from_slice(&client_proof);

        let auth_message = format!("{},{},{}", self.client_first_bare, self.server_first, without_proof);
        let client_signature = hmac(&self.verifier.stored_key, auth_message.as_bytes());
        let recovered_client_key = xor(&proof, &client_signature);
        let recovered_stored_key = sha256(&recovered_client_key);

        let ok = recovered_stored_key == self.verifier.stored_key && !self.verifier.is_mock;
        if !ok {
            return Err(Error::authentication_failed());
        }

        let server_signature = hmac(&self.verifier.server_key, auth_message.as_bytes());
        Ok(format!("v={}", base64::encode(server_signature)))
    }

    pub fn is_mock(&self) -> bool {
        self.verifier.is_mock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_verifier_is_deterministic_in_nonce_and_user() {
        let a = ScramVerifier::mock("cluster-seed", "nosuchuser", 4096);
        let b = ScramVerifier::mock("cluster-seed", "nosuchuser", 4096);
        assert_eq!(a.salt, b.salt);
        assert_eq!(a.stored_key, b.stored_key);
        let c = ScramVerifier::mock("cluster-seed", "otheruser", 4096);
        assert_ne!(a.salt, c.salt);
    }

    #[test]
    fn mock_verifier_never_authenticates() {
        let verifier = ScramVerifier::mock("seed", "ghost", 4096);
        assert!(verifier.is_mock);
    }

    #[test]
    fn real_password_round_trip_via_hi_and_hmac() {
        let verifier = ScramVerifier::from_password("hunter2", vec![1, 2, 3, 4], 4096);
        assert!(!verifier.is_mock);
        // Recomputing SaltedPassword -> ClientKey -> StoredKey must match.
        let salted = hi(b"hunter2", &[1, 2, 3, 4], 4096);
        let client_key = hmac(&salted, b"Client Key");
        assert_eq!(sha256(&client_key), verifier.stored_key);
    }
}
