//! HKDF (HMAC-based Key Derivation Function): RFC 5869
//!
//! Also provides TLS 1.3–specific `HKDF-Expand-Label` and `Derive-Secret`
//! as defined in RFC 8446 §7.1.

use alloc::vec::Vec;

use super::hmac::{hmac, hmac_parts};
use super::sha::HashAlgorithm;
use super::CryptoError;

/// Prefix prepended to every TLS 1.3 label.
pub const LABEL_PREFIX: &[u8] = b"tls13 ";

/// HKDF-Extract(salt, IKM) → PRK. An empty salt means `HashLen` zeros.
pub fn hkdf_extract(alg: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    let zeros = [0u8; 64];
    let s: &[u8] = if salt.is_empty() { &zeros[..alg.output_len()] } else { salt };
    hmac(alg, s, ikm)
}

/// HKDF-Expand(PRK, info, L) → L bytes of OKM.
pub fn hkdf_expand(
    alg: HashAlgorithm,
    prk: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let hash_len = alg.output_len();
    if length > 255 * hash_len {
        return Err(CryptoError::InvalidLength);
    }
    let n = (length + hash_len - 1) / hash_len;
    let mut okm = Vec::with_capacity(n * hash_len);
    let mut t: Vec<u8> = Vec::new();

    for i in 1..=n {
        let counter = [i as u8];
        t = hmac_parts(alg, prk, &[t.as_slice(), info, &counter[..]]);
        okm.extend_from_slice(&t);
    }
    okm.truncate(length);
    Ok(okm)
}

/// HKDF-Expand-Label(Secret, Label, Context, Length)
///
/// ```text
/// struct {
///     uint16 length;
///     opaque label<7..255> = "tls13 " + Label;
///     opaque context<0..255>;
/// } HkdfLabel;
/// ```
pub fn hkdf_expand_label(
    alg: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let full_len = LABEL_PREFIX.len() + label.len();
    if full_len > 255 || context.len() > 255 || length > u16::MAX as usize {
        return Err(CryptoError::InvalidLength);
    }
    let mut hkdf_label = Vec::with_capacity(4 + full_len + context.len());
    hkdf_label.extend_from_slice(&(length as u16).to_be_bytes());
    hkdf_label.push(full_len as u8);
    hkdf_label.extend_from_slice(LABEL_PREFIX);
    hkdf_label.extend_from_slice(label);
    hkdf_label.push(context.len() as u8);
    hkdf_label.extend_from_slice(context);

    hkdf_expand(alg, secret, &hkdf_label, length)
}

/// Derive-Secret(Secret, Label, Messages) =
///   HKDF-Expand-Label(Secret, Label, Hash(Messages), Hash.length)
///
/// `transcript_hash` is the already-computed hash of the messages.
pub fn derive_secret(
    alg: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    hkdf_expand_label(alg, secret, label, transcript_hash, alg.output_len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_rfc5869_case1() {
        let ikm = [0x0bu8; 22];
        let salt = hex!("000102030405060708090a0b0c");
        let info = hex!("f0f1f2f3f4f5f6f7f8f9");
        let prk = hkdf_extract(HashAlgorithm::Sha256, &salt, &ikm);
        assert_eq!(
            prk,
            hex!("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5")
        );
        let okm = hkdf_expand(HashAlgorithm::Sha256, &prk, &info, 42).unwrap();
        assert_eq!(
            okm,
            hex!("3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865")
        );
    }

    #[test]
    fn test_expand_length_limit() {
        let prk = [1u8; 32];
        assert!(hkdf_expand(HashAlgorithm::Sha256, &prk, b"", 255 * 32).is_ok());
        assert_eq!(
            hkdf_expand(HashAlgorithm::Sha256, &prk, b"", 255 * 32 + 1),
            Err(CryptoError::InvalidLength)
        );
    }

    #[test]
    fn test_rfc8448_early_and_derived() {
        let early = hkdf_extract(HashAlgorithm::Sha256, &[], &[0u8; 32]);
        assert_eq!(
            early,
            hex!("33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a")
        );
        let empty_hash = HashAlgorithm::Sha256.hash(b"");
        let derived = derive_secret(HashAlgorithm::Sha256, &early, b"derived", &empty_hash).unwrap();
        assert_eq!(
            derived,
            hex!("6f2615a108c702c5678f54fc9dbab69716c076189c48250cebeac3576c3611ba")
        );
    }

    #[test]
    fn test_rfc8448_handshake_key() {
        let server_hs = hex!("b67b7d690cc16c4e75e54213cb2d37b4e9c912bcded9105d42befd59d391ad38");
        let key = hkdf_expand_label(HashAlgorithm::Sha256, &server_hs, b"key", b"", 16).unwrap();
        let iv = hkdf_expand_label(HashAlgorithm::Sha256, &server_hs, b"iv", b"", 12).unwrap();
        assert_eq!(key, hex!("3fce516009c21727d0f2e4e86ee403bc"));
        assert_eq!(iv, hex!("5d313eb2671276ee13000b30"));
    }
}
