use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Identify a public key for log output without logging the key itself.
///
/// Keys in OpenSSH `<type> <base64> [comment]` form get the `SHA256:`
/// fingerprint `ssh-keygen -l` prints.  Anything else gets a truncated hex
/// digest of the raw text so unparseable input can still be correlated.
pub fn key_fingerprint(key: &str) -> String {
    let mut fields = key.split_whitespace();
    let blob = match (fields.next(), fields.next()) {
        (Some(_), Some(b64)) => base64::engine::general_purpose::STANDARD.decode(b64).ok(),
        _ => None,
    };

    match blob {
        Some(blob) => {
            let hash = Sha256::digest(&blob);
            let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
            format!("SHA256:{encoded}")
        }
        None => {
            let digest = hex::encode(Sha256::digest(key.as_bytes()));
            format!("raw:{}", &digest[..16])
        }
    }
}
