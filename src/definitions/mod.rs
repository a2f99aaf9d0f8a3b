// Definition pipeline: load YAML -> validate against contracts -> snapshot

//! # Definition Pipeline
//!
//! Three stages, run at startup and on every reload:
//!
//! 1. [`loader`] walks the configured directories and parses every
//!    `.yaml`/`.yml` file into a [`crate::DomainDefinition`], attaching the
//!    source path and a SHA-256 checksum of the raw bytes.
//! 2. [`validator`] cross-checks the parsed definitions against the OpenAPI
//!    index and against themselves, returning every error it finds rather
//!    than stopping at the first.
//! 3. [`registry`] turns a validated batch into an immutable [`registry::Snapshot`]
//!    and swaps it in atomically; readers never block and never observe a
//!    half-replaced registry.

pub mod loader;
pub mod registry;
pub mod validator;
