//! Token verification (C1): bearer credential → normalized [`Principal`].

mod verifier;

pub use verifier::{guest_principal, verify, FederatedAssertion, FederatedVerifier};
