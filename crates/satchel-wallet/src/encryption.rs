//! Password encryption for the wallet payload and for second-password secrets.
//!
//! Keys are stretched with PBKDF2-HMAC-SHA256 using the iteration count
//! carried by the wallet wrapper, then used with AES-256-GCM.
//!
//! # Wire format
//! ```text
//! base64( salt (16 bytes) || nonce (12 bytes) || ciphertext + auth_tag )
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::WalletError;

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Minimum encrypted payload size (salt + nonce + auth tag).
const MIN_ENCRYPTED_LEN: usize = SALT_LEN + NONCE_LEN + 16;

/// Derive a 256-bit key from a password and salt with PBKDF2-HMAC-SHA256.
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations.max(1), key.as_mut());
    key
}

/// Encrypt `plaintext` under `password` and return the base64 payload.
pub fn encrypt(plaintext: &[u8], password: &str, iterations: u32) -> Result<String, WalletError> {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password.as_bytes(), &salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(result))
}

/// Decrypt a payload produced by [`encrypt`].
///
/// Any failure (bad base64, truncated data, wrong password, tampering) is
/// reported as [`WalletError::Decryption`].
pub fn decrypt(payload: &str, password: &str, iterations: u32) -> Result<Vec<u8>, WalletError> {
    let encrypted = BASE64
        .decode(payload.trim())
        .map_err(|e| WalletError::Decryption(format!("payload is not base64: {e}")))?;
    if encrypted.len() < MIN_ENCRYPTED_LEN {
        return Err(WalletError::Decryption(format!(
            "encrypted data too short: {} < {MIN_ENCRYPTED_LEN}",
            encrypted.len()
        )));
    }

    let salt = &encrypted[..SALT_LEN];
    let nonce_bytes = &encrypted[SALT_LEN..SALT_LEN + NONCE_LEN];
    let ciphertext = &encrypted[SALT_LEN + NONCE_LEN..];

    let key = derive_key(password.as_bytes(), salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| WalletError::Decryption(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| WalletError::Decryption("wrong password or corrupt payload".into()))
}

/// Encrypt one private-key string under the second password.
pub fn encrypt_secret(
    secret: &str,
    shared_key: &str,
    second_password: &str,
    iterations: u32,
) -> Result<String, WalletError> {
    let password = Zeroizing::new(format!("{shared_key}{second_password}"));
    encrypt(secret.as_bytes(), &password, iterations)
}

/// Reverse [`encrypt_secret`].
pub fn decrypt_secret(
    encrypted: &str,
    shared_key: &str,
    second_password: &str,
    iterations: u32,
) -> Result<String, WalletError> {
    let password = Zeroizing::new(format!("{shared_key}{second_password}"));
    let plain = decrypt(encrypted, &password, iterations)?;
    String::from_utf8(plain).map_err(|e| WalletError::Decryption(e.to_string()))
}

/// Hash stored in the payload to verify a second password without decrypting.
///
/// SHA-256 is applied `iterations` times to `shared_key || second_password`.
pub fn second_password_hash(shared_key: &str, second_password: &str, iterations: u32) -> String {
    let mut digest = Sha256::digest(format!("{shared_key}{second_password}").as_bytes());
    for _ in 1..iterations.max(1) {
        digest = Sha256::digest(digest);
    }
    hex::encode(digest)
}

/// True when `s` looks like the output of [`encrypt`] rather than a Base58 key.
pub fn is_encrypted_key(s: &str) -> bool {
    !is_base58(s) && BASE64.decode(s).is_ok()
}

/// True when `s` decodes as Base58 (a plaintext WIF, raw key or xpriv).
pub fn is_base58(s: &str) -> bool {
    !s.is_empty() && bs58::decode(s).into_vec().is_ok()
}
