use actix_cors::Cors;
use actix_web::HttpRequest;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::api_error::ApiError;

pub fn cors_middleware() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

/// Require `Authorization: Bearer <secret>` on a request
pub fn require_bearer(req: &HttpRequest, secret: &str) -> Result<(), ApiError> {
    let presented = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if !secret.is_empty() && secrets_match(token, secret) => Ok(()),
        _ => {
            warn!(path = %req.path(), "Rejected request with missing or bad bearer secret");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Constant-time comparison over SHA-256 digests
fn secrets_match(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
