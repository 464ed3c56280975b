//! Core types and contracts for the annal history tracker.
//!
//! Given a declared record model opted into tracking, this crate derives a
//! parallel "historical" model, captures one immutable snapshot row per
//! create/update/delete, and describes the synthetic relation a query
//! planner needs to traverse the shadow table as if it were an ordinary
//! one-to-many relation.
//!
//! This crate is deliberately free of database dependencies. The host
//! persistence layer (`annal-store-sqlite`) implements the [`store::Store`]
//! contract, emits lifecycle notifications through a [`signals::SignalHub`],
//! and consults the registry when building its relation indexes.

pub mod capture;
pub mod error;
pub mod registry;
pub mod relation;
pub mod schema;
pub mod shadow;
pub mod signals;
pub mod store;
pub mod transform;
pub mod value;

pub use error::{Error, Result};
