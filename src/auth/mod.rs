//! Phone-number authentication.
//!
//! Issues one-time codes, verifies them, registers or logs the user in and
//! hands out signed session tokens.

pub mod code;
pub mod extractor;
pub mod handlers;
pub mod rate_limit;
pub mod session;
mod service;

pub use extractor::AuthenticatedUser;
pub use rate_limit::IdentityGate;
pub use service::{AuthPolicy, AuthService, AuthSession, ChallengeIssued, LoginOutcome};
pub use session::{Claims, SessionIssuer};
