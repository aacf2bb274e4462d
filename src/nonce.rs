//! Cache-busting tokens for URLs. Unique per request, not secret.

use rand::Rng;
use rand::distributions::Alphanumeric;

pub const URL_TOKEN_LEN: usize = 8;
pub const NONCE_LEN: usize = 10;

/// Correlation token for the `n=` segment of the streaming endpoints.
pub fn url_token() -> String {
    random_alphanumeric(URL_TOKEN_LEN)
}

/// Fresh nonce for one direct request. Never reuse a value across requests.
pub fn nonce() -> String {
    random_alphanumeric(NONCE_LEN)
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
