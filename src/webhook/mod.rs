//! Carrier-facing HTTP layer — signature checks, cXML acknowledgments,
//! and the webhook routes.

pub mod reply;
mod routes;
pub mod signature;

pub use routes::router;
