//! Grant storage adapters.
//!
//! Both adapters implement the resolver's read seam (`GrantStore`) and the
//! admin write seam (`GrantRepository`) from `campus-auth`.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryGrantStore;
pub use postgres::PostgresGrantStore;
