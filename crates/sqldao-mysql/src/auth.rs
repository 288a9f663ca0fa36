//! Authentication plugins.
//!
//! `mysql_native_password`:
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! `caching_sha2_password` fast path:
//! ```text
//! SHA256(password) XOR SHA256(SHA256(SHA256(password)) + seed)
//! ```
//!
//! The full path of `caching_sha2_password`, and `sha256_password`, send the
//! password either in clear over TLS or RSA-encrypted with the server key.

use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use sqldao_core::DriverError;
use sqldao_core::error::{ConnectionError, ConnectionErrorKind, codes};

pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const SHA256_PASSWORD: &str = "sha256_password";
}

/// Status bytes of the caching_sha2_password exchange.
pub mod caching_sha2 {
    /// Sent by the client to ask for the server's RSA key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// The server scramble is 20 bytes; handshakes usually append a NUL.
fn scramble_seed(auth_data: &[u8]) -> &[u8] {
    match auth_data {
        [seed @ .., 0] if seed.len() == 20 => seed,
        _ if auth_data.len() > 20 => &auth_data[..20],
        _ => auth_data,
    }
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// Scramble for `mysql_native_password`. Empty password, empty response.
pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(scramble_seed(auth_data));
    hasher.update(stage2);
    xor(&stage1, &hasher.finalize())
}

/// Scramble for the `caching_sha2_password` fast path.
pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let hash = Sha256::digest(password.as_bytes());
    let hash_hash = Sha256::digest(hash);
    let mut hasher = Sha256::new();
    hasher.update(hash_hash);
    hasher.update(scramble_seed(auth_data));
    xor(&hash, &hasher.finalize())
}

/// Scramble for whichever plugin the server asked for.
pub fn scramble_for_plugin(plugin: &str, password: &str, auth_data: &[u8]) -> Vec<u8> {
    match plugin {
        plugins::CACHING_SHA2_PASSWORD => caching_sha2_password(password, auth_data),
        // sha256_password sends nothing until asked for the key or TLS is up
        plugins::SHA256_PASSWORD if password.is_empty() => Vec::new(),
        plugins::SHA256_PASSWORD => vec![caching_sha2::REQUEST_PUBLIC_KEY],
        _ => mysql_native_password(password, auth_data),
    }
}

/// NUL-terminated password, for the cleartext exchange over TLS.
pub fn cleartext_password(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// NUL-terminated password XOR the rotating seed.
pub fn xor_password_with_seed(password: &str, seed: &[u8]) -> Vec<u8> {
    let seed = scramble_seed(seed);
    let mut out = cleartext_password(password);
    if !seed.is_empty() {
        for (i, b) in out.iter_mut().enumerate() {
            *b ^= seed[i % seed.len()];
        }
    }
    out
}

fn auth_error(message: String) -> DriverError {
    DriverError::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        code: codes::ER_ACCESS_DENIED,
        message,
        source: None,
    })
}

/// Encrypt the seeded password with the server's RSA public key.
///
/// `use_oaep` selects OAEP (caching_sha2_password on 8.0.5+) over PKCS#1 v1.5.
pub fn sha256_password_rsa(
    password: &str,
    seed: &[u8],
    public_key_pem: &[u8],
    use_oaep: bool,
) -> Result<Vec<u8>, DriverError> {
    if seed.is_empty() {
        return Err(auth_error("empty authentication seed".to_string()));
    }
    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| auth_error(format!("server public key is not PEM text: {e}")))?;
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| auth_error(format!("unreadable server public key: {e}")))?;

    let plain = xor_password_with_seed(password, seed);
    let encrypted = if use_oaep {
        key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &plain)
    } else {
        key.encrypt(&mut OsRng, rsa::Pkcs1v15Encrypt, &plain)
    };
    encrypted.map_err(|e| auth_error(format!("RSA encryption failed: {e}")))
}
