//! Payment gateway redirect handling

pub mod callback;
pub mod signature;

pub use callback::{CallbackParams, CallbackVerdict, GatewayCallbackResult};
pub use signature::{CallbackError, SignatureVerifier};
