//! gRPC facade for the placement engine.
//!
//! Thin wrapper that decodes requests, delegates to
//! [`PlacementEngine`](crate::placement::PlacementEngine) and the
//! [`Registry`](crate::registry::Registry), and maps scheduler errors to
//! gRPC status codes. No placement logic lives here.

pub mod placement_service;
pub mod server;

pub use server::GrpcServer;
