use axum::http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use leadline_core::errors::AuthError;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Checks the shared secret header. Absent or blank is `MissingSecret`;
/// anything else that does not match is `InvalidSecret`.
pub fn verify_webhook_secret(
    headers: &HeaderMap,
    expected: &SecretString,
) -> Result<(), AuthError> {
    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .map(|value| value.as_bytes())
        .filter(|value| !value.iter().all(u8::is_ascii_whitespace))
        .ok_or(AuthError::MissingSecret)?;

    let expected = expected.expose_secret().as_bytes();
    if expected.is_empty() || !bool::from(presented.ct_eq(expected)) {
        return Err(AuthError::InvalidSecret);
    }
    Ok(())
}
