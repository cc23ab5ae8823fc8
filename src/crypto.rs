//! AES-256-CBC encrypt/decrypt with PKCS#7 padding and a random IV prefix (C1).
//!
//! Wire format: `Base64(IV_16 ‖ AES-256-CBC(PKCS7(plaintext), key_32, IV_16))`.

use aes::Aes256;
use base64::Engine as _;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const KEY_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key must be exactly 32 bytes, got {0}")]
    InvalidKey(usize),
    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),
    #[error("invalid PKCS#7 padding")]
    PaddingError,
}

/// Encrypts `plaintext` under `key`, returning a Base64 token.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<String, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKey(key.len()));
    }

    let mut iv = [0u8; BLOCK_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new(key.into(), &iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(BLOCK_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);

    Ok(base64::engine::general_purpose::STANDARD.encode(out))
}

/// Decrypts a Base64 token produced by [`encrypt`] back to plaintext bytes.
pub fn decrypt(token: &str, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKey(key.len()));
    }

    let raw = base64::engine::general_purpose::STANDARD
        .decode(token)
        .map_err(|_| CryptoError::Malformed("not valid base64"))?;

    if raw.len() < BLOCK_LEN {
        return Err(CryptoError::Malformed("ciphertext shorter than one block"));
    }

    let (iv, body) = raw.split_at(BLOCK_LEN);
    let mut buf = body.to_vec();

    let cipher = Aes256CbcDec::new(key.into(), iv.into());
    let plaintext = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| CryptoError::PaddingError)?;

    Ok(plaintext.to_vec())
}
