//! Password encryption for the login handshake.
//!
//! The server answers the `login` command with an RSA public key. The
//! client encrypts the password with it and sends the result base64
//! encoded:
//!
//! ```text
//! base64(RSA_PKCS1_v1_5_encrypt(public_key, password))
//! ```
//!
//! The key arrives as hex modulus and exponent, usually with a PEM copy
//! alongside. The hex pair is authoritative; the PEM is only consulted
//! when the hex pair cannot be parsed.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};

use crate::protocol::messages::PublicKey;

/// Encrypt `password` with the server's public key and base64 encode it.
pub fn encrypt_password(password: &str, key: &PublicKey) -> Result<String, String> {
    let public_key = match from_hex(&key.public_key_modulus, &key.public_key_exponent) {
        Ok(k) => k,
        Err(hex_err) => match key.public_key_pem.as_deref() {
            Some(pem) => from_pem(pem).map_err(|pem_err| format!("{hex_err}; {pem_err}"))?,
            None => return Err(hex_err),
        },
    };

    let encrypted = public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, password.as_bytes())
        .map_err(|e| format!("RSA PKCS1v1.5 encryption failed: {e}"))?;

    Ok(STANDARD.encode(encrypted))
}

fn from_hex(modulus: &str, exponent: &str) -> Result<RsaPublicKey, String> {
    let n = parse_hex(modulus).ok_or_else(|| format!("Invalid public key modulus: {modulus:?}"))?;
    let e =
        parse_hex(exponent).ok_or_else(|| format!("Invalid public key exponent: {exponent:?}"))?;
    RsaPublicKey::new(n, e).map_err(|e| format!("Invalid RSA public key: {e}"))
}

fn parse_hex(value: &str) -> Option<BigUint> {
    let value = value.trim();
    let value = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if value.is_empty() {
        return None;
    }
    BigUint::parse_bytes(value.as_bytes(), 16)
}

fn from_pem(pem: &str) -> Result<RsaPublicKey, String> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| format!("Failed to parse RSA public key PEM: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::traits::PublicKeyParts;

    fn key_pair() -> (RsaPrivateKey, PublicKey) {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public = private.to_public_key();
        let key = PublicKey {
            public_key_pem: public.to_public_key_pem(LineEnding::LF).ok(),
            public_key_modulus: public.n().to_str_radix(16).to_uppercase(),
            public_key_exponent: public.e().to_str_radix(16),
        };
        (private, key)
    }

    fn decrypt(private: &RsaPrivateKey, encoded: &str) -> String {
        let bytes = STANDARD.decode(encoded).unwrap();
        let plain = private.decrypt(Pkcs1v15Encrypt, &bytes).unwrap();
        String::from_utf8(plain).unwrap()
    }

    #[test]
    fn test_encrypt_password_round_trip() {
        let (private, key) = key_pair();
        let encoded = encrypt_password("s3cret", &key).unwrap();

        assert_eq!(decrypt(&private, &encoded), "s3cret");
        // PKCS#1 v1.5 padding is randomized
        assert_ne!(encrypt_password("s3cret", &key).unwrap(), encoded);
    }

    #[test]
    fn test_falls_back_to_pem() {
        let (private, mut key) = key_pair();
        key.public_key_modulus = "not hex".to_string();

        let encoded = encrypt_password("pw", &key).unwrap();
        assert_eq!(decrypt(&private, &encoded), "pw");
    }

    #[test]
    fn test_tiny_key_is_rejected() {
        let key = PublicKey {
            public_key_pem: None,
            public_key_modulus: "FF".to_string(),
            public_key_exponent: "3".to_string(),
        };
        let err = encrypt_password("password", &key).unwrap_err();
        assert!(err.contains("RSA"), "{err}");
    }

    #[test]
    fn test_bad_hex_without_pem() {
        let key = PublicKey {
            public_key_pem: None,
            public_key_modulus: String::new(),
            public_key_exponent: "10001".to_string(),
        };
        let err = encrypt_password("password", &key).unwrap_err();
        assert!(err.contains("modulus"), "{err}");
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("ff"), Some(BigUint::from(255u32)));
        assert_eq!(parse_hex("0x10001"), Some(BigUint::from(65_537u32)));
        assert_eq!(parse_hex(" 3 "), Some(BigUint::from(3u32)));
        assert_eq!(parse_hex("zz"), None);
        assert_eq!(parse_hex(""), None);
    }
}
