use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use data_encoding::{BASE64, BASE64URL, BASE64URL_NOPAD, HEXLOWER_PERMISSIVE};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tally_common::time::UnixTimestamp;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 0x80;
const KEY_SIZE_BYTES: usize = 32;
const IV_SIZE_BYTES: usize = 16;
const HMAC_SIZE_BYTES: usize = 32;
/// Version, timestamp and IV.
const HEADER_SIZE_BYTES: usize = 1 + 8 + IV_SIZE_BYTES;
const BLOCK_SIZE_BYTES: usize = 16;

/// Tokens issued further than this in the future are rejected.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Raised if a [`FernetKey`] could not be parsed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum KeyParseError {
    /// The key is neither base64 nor hex.
    #[error("bad key encoding")]
    BadEncoding,
    /// The key does not decode to 32 bytes.
    #[error("bad key length, expected 32 bytes")]
    BadLength,
}

/// Raised if a Fernet token cannot be verified or decrypted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FernetError {
    /// The token is not URL-safe base64 or too short.
    #[error("malformed token")]
    Malformed,
    /// The version byte is not supported.
    #[error("unsupported token version {0:#04x}")]
    UnsupportedVersion(u8),
    /// The token was issued too long ago.
    #[error("token expired")]
    Expired,
    /// The token was issued in the future.
    #[error("token issued in the future")]
    FromFuture,
    /// None of the keys produced a matching signature.
    #[error("invalid token signature")]
    BadSignature,
    /// The signature matched, but the ciphertext could not be decrypted.
    #[error("failed to decrypt token")]
    Decrypt,
}

/// A 256-bit Fernet key.
///
/// The first half of the key signs tokens with HMAC-SHA256, the second half encrypts them with
/// AES-128-CBC. Keys parse from URL-safe base64, standard base64 or hex.
#[derive(Clone, Eq, PartialEq)]
pub struct FernetKey([u8; KEY_SIZE_BYTES]);

impl FernetKey {
    /// Generates a new random key.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE_BYTES]) -> Self {
        Self(bytes)
    }

    fn signing_key(&self) -> &[u8] {
        &self.0[..KEY_SIZE_BYTES / 2]
    }

    fn encryption_key(&self) -> &[u8] {
        &self.0[KEY_SIZE_BYTES / 2..]
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.signing_key()).expect("HMAC takes variable keys")
    }

    /// Encrypts and signs `message` with the current time and a random IV.
    pub fn encrypt(&self, message: &[u8]) -> String {
        self.encrypt_at(message, UnixTimestamp::now(), rand::random())
    }

    /// Encrypts and signs `message` with an explicit timestamp and IV.
    pub fn encrypt_at(
        &self,
        message: &[u8],
        timestamp: UnixTimestamp,
        iv: [u8; IV_SIZE_BYTES],
    ) -> String {
        let cipher = Aes128CbcEnc::new(self.encryption_key().into(), &iv.into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(message);

        let mut token = Vec::with_capacity(HEADER_SIZE_BYTES + ciphertext.len() + HMAC_SIZE_BYTES);
        token.push(VERSION);
        token.extend_from_slice(&timestamp.as_secs().to_be_bytes());
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);

        let mut mac = self.mac();
        mac.update(&token);
        token.extend_from_slice(&mac.finalize().into_bytes());

        BASE64URL.encode(&token)
    }
}

impl fmt::Debug for FernetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FernetKey(\"********\")")
    }
}

impl fmt::Display for FernetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE64URL.encode(&self.0))
    }
}

impl FromStr for FernetKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut error = KeyParseError::BadEncoding;

        for encoding in [&BASE64URL, &BASE64, &BASE64URL_NOPAD, &HEXLOWER_PERMISSIVE] {
            let Ok(bytes) = encoding.decode(s.as_bytes()) else {
                continue;
            };

            match bytes.try_into() {
                Ok(key) => return Ok(Self(key)),
                Err(_) => error = KeyParseError::BadLength,
            }
        }

        Err(error)
    }
}

tally_common::impl_str_serde!(FernetKey, "a base64 encoded 32-byte fernet key");

/// Verifies and decrypts a Fernet token with the first key that produces a matching signature.
///
/// The token must have been issued within `ttl` before `now`, and at most [`MAX_CLOCK_SKEW`]
/// after it.
pub fn verify_and_decrypt(
    token: &[u8],
    ttl: Duration,
    now: UnixTimestamp,
    keys: &[FernetKey],
) -> Result<Vec<u8>, FernetError> {
    let data = BASE64URL
        .decode(token)
        .map_err(|_| FernetError::Malformed)?;

    let min_size = HEADER_SIZE_BYTES + BLOCK_SIZE_BYTES + HMAC_SIZE_BYTES;
    if data.len() < min_size {
        return Err(FernetError::Malformed);
    }

    let (signed, signature) = data.split_at(data.len() - HMAC_SIZE_BYTES);
    let (header, ciphertext) = signed.split_at(HEADER_SIZE_BYTES);
    if ciphertext.len() % BLOCK_SIZE_BYTES != 0 {
        return Err(FernetError::Malformed);
    }

    if header[0] != VERSION {
        return Err(FernetError::UnsupportedVersion(header[0]));
    }

    let mut timestamp = [0; 8];
    timestamp.copy_from_slice(&header[1..9]);
    let issued = UnixTimestamp::from_secs(u64::from_be_bytes(timestamp));
    if issued > now + MAX_CLOCK_SKEW {
        return Err(FernetError::FromFuture);
    }
    if issued + ttl < now {
        return Err(FernetError::Expired);
    }

    let key = keys
        .iter()
        .find(|key| {
            let mut mac = key.mac();
            mac.update(signed);
            mac.verify_slice(signature).is_ok()
        })
        .ok_or(FernetError::BadSignature)?;

    let mut iv = [0; IV_SIZE_BYTES];
    iv.copy_from_slice(&header[9..]);
    Aes128CbcDec::new(key.encryption_key().into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| FernetError::Decrypt)
}
