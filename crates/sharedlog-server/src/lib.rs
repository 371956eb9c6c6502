//! Request dispatch and lifecycle for the sharedlog log unit.
//!
//! This crate is the thin layer between the transport collaborator and
//! the storage engine: a discriminated union of control messages
//! ([`LogUnitRequest`]), their answers ([`LogUnitResponse`]), and the
//! [`LogUnitServer`] that owns the storage stack and maps one onto the
//! other.
//!
//! Wire framing, connection handling, and epoch validation live in the
//! transport collaborator; by the time a request reaches
//! [`LogUnitServer::handle`] it is already in-epoch.

pub mod request;
pub mod server;

pub use request::{CommitTarget, LogUnitRequest, LogUnitResponse, ReadResponse};
pub use server::LogUnitServer;
