//! Small helpers shared by the register/re-verify operations.

use par_core::DigestAlg;

/// Re-encodes a digest string into base64url, the claim encoding
/// [`par_receipt::ReceiptClaims::proof_digest`] requires. Hex-encoded
/// digests are decoded to bytes first; an already-base64url (multihash)
/// digest passes through unchanged.
pub(crate) fn digest_to_base64url(digest: &str, alg: DigestAlg) -> String {
    use base64::Engine;
    if alg.is_hex_encoded() {
        let bytes: Vec<u8> = (0..digest.len())
            .step_by(2)
            .filter_map(|i| u8::from_str_radix(&digest[i..i + 2], 16).ok())
            .collect();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    } else {
        digest.to_string()
    }
}
