//! RMI Core - Entity Types
//!
//! Pure data structures shared by every RMI crate: citizen identity,
//! self-declared sub-field values, sync jobs, phone verification records,
//! input validation, configuration and the error taxonomy.
//! No I/O lives here.

pub mod config;
pub mod entities;
pub mod error;
pub mod fields;
pub mod identity;
pub mod sync;
pub mod validation;
pub mod verification;

pub use config::*;
pub use entities::*;
pub use error::*;
pub use fields::*;
pub use identity::*;
pub use sync::*;
pub use validation::*;
pub use verification::*;
