//! Visitor identity: the pure authenticator and the per-visitor session state machine.

mod authenticator;
mod session;

pub use authenticator::{authenticate, RejectionReason};
pub use session::{Phase, Session, SessionState, SessionStore, Touched, VisitorContext};
