//! `campus-core`: shared domain building blocks.
//!
//! Identifiers, the domain error model, aggregate identity, a clock seam and
//! environment config helpers. Nothing in here performs IO beyond reading
//! environment variables.

pub mod aggregate;
pub mod clock;
pub mod config;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ConfigError;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, GrantId, ResourceId, TenantId, UserId};
