//! HTTP surface of the return server

pub mod payment_return;

pub use payment_return::{router, PaymentReturnService};
