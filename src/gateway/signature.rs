//! Redirect signature verification
//!
//! The gateway signs its return URL with HMAC-SHA512 over the sorted,
//! form-urlencoded `vnp_*` parameters (excluding the hash fields themselves).

use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha512;
use std::fmt;
use std::sync::Arc;

use super::callback::CallbackParams;

type HmacSha512 = Hmac<Sha512>;

pub const SECURE_HASH: &str = "vnp_SecureHash";
pub const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    #[error("payment result is not signed")]
    MissingSignature,

    #[error("payment result signature does not match")]
    SignatureMismatch,

    #[error("failed to canonicalize payment result: {0}")]
    Canonicalize(String),
}

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Arc<str>,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Arc::from(secret.into()),
        }
    }

    fn mac(&self, params: &CallbackParams) -> Result<HmacSha512, CallbackError> {
        let data = canonical_data(params)?;
        let mut mac = HmacSha512::new_from_slice(self.secret.as_bytes())
            .map_err(|e| CallbackError::Canonicalize(e.to_string()))?;
        mac.update(data.as_bytes());
        Ok(mac)
    }

    /// Lowercase hex signature for `params`.
    pub fn sign(&self, params: &CallbackParams) -> Result<String, CallbackError> {
        Ok(hex::encode(self.mac(params)?.finalize().into_bytes()))
    }

    pub fn verify(&self, params: &CallbackParams) -> Result<(), CallbackError> {
        let provided = params
            .get(SECURE_HASH)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or(CallbackError::MissingSignature)?;

        let provided = hex::decode(provided).map_err(|_| CallbackError::SignatureMismatch)?;

        self.mac(params)?
            .verify_slice(&provided)
            .map_err(|_| CallbackError::SignatureMismatch)
    }
}

fn canonical_data(params: &CallbackParams) -> Result<String, CallbackError> {
    let signed = params.iter().filter(|(key, value)| {
        key.starts_with("vnp_")
            && key.as_str() != SECURE_HASH
            && key.as_str() != SECURE_HASH_TYPE
            && !value.is_empty()
    });

    let url = Url::parse_with_params("https://gateway.invalid/", signed)
        .map_err(|e| CallbackError::Canonicalize(e.to_string()))?;

    Ok(url.query().unwrap_or_default().to_string())
}
