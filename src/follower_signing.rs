// follower_signing.rs — HMAC-SHA256 request signing for the Follower
// venue's REST API. The Master venue is consumed read-only (master.rs);
// the Follower is the one venue this engine actually trades on, so it is
// the one that needs authenticated, signed requests.
use hex;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs a query string with the API secret, returning the hex-encoded
/// signature to append as the `signature` parameter.
pub fn sign_query(secret: &str, query: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Builds the full query string (params in insertion order, each
/// `key=value`, joined with `&`) followed by the computed signature.
pub fn build_signed_query(secret: &str, params: &[(&str, String)]) -> String {
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let signature = sign_query(secret, &query);
    format!("{query}&signature={signature}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic() {
        let params = [("symbol", "BTCUSDT".to_string()), ("timestamp", "1000".to_string())];
        let a = build_signed_query("secret", &params);
        let b = build_signed_query("secret", &params);
        assert_eq!(a, b);
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let params = [("symbol", "BTCUSDT".to_string())];
        let a = sign_query("secret-a", "symbol=BTCUSDT");
        let b = sign_query("secret-b", "symbol=BTCUSDT");
        assert_ne!(a, b);
        let _ = params;
    }
}
