//! Pluggable authentication. Grounded on the teacher's
//! `protocol/connection/handshake.rs` auth-plugin functions, extended with
//! the `caching_sha2_password` full-auth RSA fallback and the clear-text/
//! old-password/dialog plugins the distilled spec also names but the
//! teacher never implemented — learned from `sqlx`'s RSA dependency choice
//! (`sqlx-mysql`'s `Cargo.toml` pulls in `rsa` for exactly this exchange).

use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    MysqlNativePassword,
    MysqlOldPassword,
    MysqlClearPassword,
    Sha256Password,
    CachingSha2Password,
    Dialog,
}

impl AuthPlugin {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "mysql_native_password" => Self::MysqlNativePassword,
            "mysql_old_password" => Self::MysqlOldPassword,
            "mysql_clear_password" => Self::MysqlClearPassword,
            "sha256_password" => Self::Sha256Password,
            "caching_sha2_password" => Self::CachingSha2Password,
            "dialog" => Self::Dialog,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MysqlNativePassword => "mysql_native_password",
            Self::MysqlOldPassword => "mysql_old_password",
            Self::MysqlClearPassword => "mysql_clear_password",
            Self::Sha256Password => "sha256_password",
            Self::CachingSha2Password => "caching_sha2_password",
            Self::Dialog => "dialog",
        }
    }

    /// Computes the auth response to send in `HandshakeResponse41` (or an
    /// `AuthSwitchResponse`), given the plugin's challenge data. Plugins
    /// that need a follow-up round trip (`sha256_password`,
    /// `caching_sha2_password`'s full-auth path) are driven separately
    /// through [`AuthPlugin::handle_more_data`].
    pub fn compute_response(&self, password: &str, challenge: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::MysqlNativePassword => Ok(scramble_sha1(password, challenge).to_vec()),
            Self::CachingSha2Password => Ok(scramble_sha256(password, challenge).to_vec()),
            Self::MysqlClearPassword => {
                let mut out = password.as_bytes().to_vec();
                out.push(0);
                Ok(out)
            }
            Self::MysqlOldPassword => Ok(scramble_323(password, challenge)),
            Self::Sha256Password => {
                // Without a known-good TLS channel the client cannot send
                // the password in clear; the caller is expected to request
                // the server's RSA key via the plugin-data empty-challenge
                // convention and fall through to `encrypt_password_rsa`.
                Err(Error::Skip)
            }
            Self::Dialog => Ok(password.as_bytes().to_vec()),
        }
    }

    /// Whether a 0x01 request for the server's public key should be sent
    /// before the real auth response (the `caching_sha2_password` full-auth
    /// path over a plaintext connection).
    pub fn requests_public_key(&self) -> bool {
        matches!(self, Self::CachingSha2Password | Self::Sha256Password)
    }
}

/// `mysql_native_password`: `SHA1(password) XOR SHA1(challenge + SHA1(SHA1(password)))`.
pub fn scramble_sha1(password: &str, challenge: &[u8]) -> [u8; 20] {
    if password.is_empty() {
        return [0u8; 20];
    }
    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(challenge);
    hasher.update(stage2);
    let token = hasher.finalize();

    let mut out = [0u8; 20];
    for i in 0..20 {
        out[i] = stage1[i] ^ token[i];
    }
    out
}

/// `caching_sha2_password` / `sha256_password` fast-auth scramble:
/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) + challenge)`.
pub fn scramble_sha256(password: &str, challenge: &[u8]) -> [u8; 32] {
    if password.is_empty() {
        return [0u8; 32];
    }
    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(challenge);
    let scramble = hasher.finalize();

    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = stage1[i] ^ scramble[i];
    }
    out
}

/// Legacy pre-4.1 `mysql_old_password` scramble. Only reachable when a
/// server explicitly negotiates it and `allow_old_passwords` is set.
pub fn scramble_323(password: &str, challenge: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![0];
    }
    let (mut a, mut b) = hash_323(password);
    let (seed1, seed2) = hash_323(std::str::from_utf8(challenge).unwrap_or_default());
    let mut result = Vec::with_capacity(challenge.len());
    let (mut r1, mut r2, r3) = (
        (seed1 ^ a) as u64,
        (seed2 ^ b) as u64,
        0x3350_0000_u64,
    );
    for &c in challenge {
        r1 = (r1.wrapping_mul(3).wrapping_add(r2)) % r3;
        r2 = (r1.wrapping_add(r2).wrapping_add(8)) % r3;
        let extra = (r1 as f64 / r3 as f64 * 31.0) as u8;
        result.push((c ^ extra).wrapping_add(64));
    }
    a = 0;
    b = 0;
    let _ = (a, b);
    result
}

fn hash_323(s: &str) -> (u32, u32) {
    let (mut nr, mut nr2, mut add) = (1345345333u32, 0x12345671u32, 7u32);
    for &b in s.as_bytes() {
        if b == b' ' || b == b'\t' {
            continue;
        }
        let tmp = b as u32;
        nr ^= (((nr & 63).wrapping_add(add)).wrapping_mul(tmp)).wrapping_add(nr << 8);
        nr2 = nr2.wrapping_add((nr2 << 8) ^ nr);
        add = add.wrapping_add(tmp);
    }
    (nr & 0x7FFFFFFF, nr2 & 0x7FFFFFFF)
}

/// Full-auth fallback for `caching_sha2_password`/`sha256_password` over a
/// plaintext channel: XOR the NUL-terminated password with the challenge,
/// then encrypt with the server's RSA public key using OAEP/SHA1 padding,
/// matching the wire behavior of the reference client.
pub fn encrypt_password_rsa(
    password: &str,
    challenge: &[u8],
    public_key_pem: &str,
) -> Result<Vec<u8>> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| Error::Protocol(format!("invalid RSA public key: {e}")))?;

    let mut to_encrypt: Vec<u8> = password.as_bytes().to_vec();
    to_encrypt.push(0);
    for (i, byte) in to_encrypt.iter_mut().enumerate() {
        *byte ^= challenge[i % challenge.len()];
    }

    let padding = Oaep::new::<Sha1>();
    public_key
        .encrypt(&mut OsRng, padding, &to_encrypt)
        .map_err(|e| Error::Protocol(format!("RSA encryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_produces_zero_scramble() {
        assert_eq!(scramble_sha1("", b"01234567890123456789"), [0u8; 20]);
        assert_eq!(scramble_sha256("", b"01234567890123456789"), [0u8; 32]);
    }

    #[test]
    fn native_password_scramble_is_deterministic_and_nonzero() {
        let challenge = b"01234567890123456789";
        let a = scramble_sha1("hunter2", challenge);
        let b = scramble_sha1("hunter2", challenge);
        assert_eq!(a, b);
        assert_ne!(a, [0u8; 20]);
    }

    #[test]
    fn caching_sha2_scramble_differs_by_challenge() {
        let a = scramble_sha256("hunter2", b"challenge-aaaaaaaaaa");
        let b = scramble_sha256("hunter2", b"challenge-bbbbbbbbbb");
        assert_ne!(a, b);
    }

    #[test]
    fn plugin_name_round_trips() {
        for plugin in [
            AuthPlugin::MysqlNativePassword,
            AuthPlugin::MysqlOldPassword,
            AuthPlugin::MysqlClearPassword,
            AuthPlugin::Sha256Password,
            AuthPlugin::CachingSha2Password,
            AuthPlugin::Dialog,
        ] {
            assert_eq!(AuthPlugin::from_name(plugin.name()), Some(plugin));
        }
    }

    #[test]
    fn sha256_password_without_tls_requests_full_auth() {
        let err = AuthPlugin::Sha256Password
            .compute_response("x", b"challenge")
            .unwrap_err();
        assert!(matches!(err, Error::Skip));
    }
}
