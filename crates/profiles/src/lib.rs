//! User profile module.
//!
//! A small event-sourced-style aggregate: every mutation changes state and
//! raises a domain event in the same call. Persistence and dispatch happen in
//! the infra layer.

pub mod profile;

pub use profile::{ProfileCreated, ProfileSnapshot, ProfileUpdated, UserProfile};
