//! Service Layer
//!
//! Business logic on top of the storage seams: cache-first writes, the
//! composite citizen view, resubmission conflicts and phone verification.

mod composite_service;
mod conflict;
mod phone_verification;
mod write_service;

pub use composite_service::*;
pub use conflict::*;
pub use phone_verification::*;
pub use write_service::*;
