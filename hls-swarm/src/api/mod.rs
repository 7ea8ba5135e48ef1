//! HTTP server exposing `/metrics`, `/health`, and `/ready` (spec §6),
//! trimmed from the teacher's full API surface down to the endpoints this
//! binary needs.

mod server;

pub use server::{AppState, run};
