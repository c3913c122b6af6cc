//! CredentialCodec: PEM-style text armor for certificates, CRLs and
//! password-encrypted private keys, so credential files can be moved between
//! machines and re-imported.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::ca::crl::RevocationList;
use crate::cert::Certificate;
use crate::crypto::{self, KdfParams};
use crate::error::{Result, SrcprotectError};

use super::KeyPair;

pub const CERTIFICATE_LABEL: &str = "SRCPROTECT CERTIFICATE";
pub const CRL_LABEL: &str = "SRCPROTECT CRL";
pub const PRIVATE_KEY_LABEL: &str = "SRCPROTECT ENCRYPTED PRIVATE KEY";

const LINE_WIDTH: usize = 64;

/// Serde adapter storing byte vectors as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Wrap bytes in `-----BEGIN <label>-----` armor with 64-column base64 lines.
pub fn pem_encode(label: &str, data: &[u8]) -> String {
    let b64 = BASE64.encode(data);
    let mut output = format!("-----BEGIN {}-----\n", label);
    for chunk in b64.as_bytes().chunks(LINE_WIDTH) {
        // base64 output is pure ASCII, so any chunk boundary is a char boundary
        output.push_str(&String::from_utf8_lossy(chunk));
        output.push('\n');
    }
    output.push_str(&format!("-----END {}-----\n", label));
    output
}

/// Extract the payload of the first block with the given label.
pub fn pem_decode(label: &str, text: &str) -> Result<Vec<u8>> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);

    let start = text
        .find(&begin)
        .ok_or_else(|| SrcprotectError::InvalidInput(format!("missing '{}' header", begin)))?;
    let body_start = start + begin.len();
    let body_len = text[body_start..]
        .find(&end)
        .ok_or_else(|| SrcprotectError::InvalidInput(format!("missing '{}' footer", end)))?;

    let body: String = text[body_start..body_start + body_len]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    BASE64
        .decode(body)
        .map_err(|e| SrcprotectError::InvalidInput(format!("invalid base64 in {} block: {}", label, e)))
}

fn encode_armored<T: Serialize>(label: &str, value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| SrcprotectError::InvalidInput(format!("cannot serialize {}: {}", label, e)))?;
    Ok(pem_encode(label, &json))
}

fn decode_armored<T: DeserializeOwned>(label: &str, text: &str) -> Result<T> {
    let bytes = pem_decode(label, text)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| SrcprotectError::InvalidInput(format!("malformed {}: {}", label, e)))
}

pub fn encode_certificate(certificate: &Certificate) -> Result<String> {
    encode_armored(CERTIFICATE_LABEL, certificate)
}

pub fn decode_certificate(text: &str) -> Result<Certificate> {
    decode_armored(CERTIFICATE_LABEL, text)
}

pub fn encode_crl(crl: &RevocationList) -> Result<String> {
    encode_armored(CRL_LABEL, crl)
}

pub fn decode_crl(text: &str) -> Result<RevocationList> {
    decode_armored(CRL_LABEL, text)
}

/// Password-encrypt the private half of `key_pair` and armor it.
pub fn encode_private_key(key_pair: &KeyPair, passphrase: &str, params: &KdfParams) -> Result<String> {
    let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
        key_pair
            .private_bytes()
            .try_into()
            .map_err(|_| SrcprotectError::CryptoOperationFailure("private key must be a 32-byte seed".into()))?,
    );
    let envelope = crypto::encrypt_key_envelope(&seed, passphrase, params)?;
    Ok(pem_encode(PRIVATE_KEY_LABEL, &envelope))
}

/// Recover the private key seed from its armored, encrypted form.
pub fn decode_private_key(text: &str, passphrase: &str) -> Result<Zeroizing<[u8; 32]>> {
    let envelope = pem_decode(PRIVATE_KEY_LABEL, text)?;
    crypto::decrypt_key_envelope(&envelope, passphrase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::{CryptoProvider, StandardProvider};
    use crate::crypto::test_kdf;

    #[test]
    fn test_pem_lines_are_wrapped() {
        let data = vec![0x5a; 200];
        let pem = pem_encode("TEST BLOCK", &data);
        assert!(pem.starts_with("-----BEGIN TEST BLOCK-----\n"));
        assert!(pem.ends_with("-----END TEST BLOCK-----\n"));
        for line in pem.lines() {
            assert!(line.len() <= 64 || line.starts_with("-----"), "line too long: {}", line);
        }
        assert_eq!(pem_decode("TEST BLOCK", &pem).expect("decode"), data);
    }

    #[test]
    fn test_pem_decode_rejects_wrong_label() {
        let pem = pem_encode(CRL_LABEL, b"abc");
        assert!(pem_decode(CERTIFICATE_LABEL, &pem).is_err());
    }

    #[test]
    fn test_pem_decode_tolerates_crlf_and_surrounding_text() {
        let pem = pem_encode(CERTIFICATE_LABEL, b"hello world").replace('\n', "\r\n");
        let wrapped = format!("exported from host-a\r\n{}trailing", pem);
        assert_eq!(pem_decode(CERTIFICATE_LABEL, &wrapped).expect("decode"), b"hello world");
    }

    #[test]
    fn test_private_key_armor_round_trip() {
        let provider = StandardProvider;
        let pair = provider.generate_key_pair();
        let armored = encode_private_key(&pair, "hunter22", &test_kdf()).expect("encode");
        assert!(armored.contains(PRIVATE_KEY_LABEL));

        let seed = decode_private_key(&armored, "hunter22").expect("decode");
        assert_eq!(seed.as_slice(), pair.private_bytes());

        let wrong = decode_private_key(&armored, "hunter23");
        assert!(matches!(wrong, Err(SrcprotectError::DecryptionFailure(_))));
    }
}
