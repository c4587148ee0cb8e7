//! edgestore_core — the storage, gating, and request-context subsystem of a
//! local, in-process emulator of a serverless edge runtime.
//!
//! This crate provides the hard, ordering- and atomicity-sensitive pieces a
//! worker-emulating test harness builds on: a layered, pluggable
//! byte-oriented key/value storage abstraction (C3–C7), the namespace
//! engines layered on it (KV, HTTP cache, R2-style object store with
//! multipart uploads), the per-request concurrency model (input/output
//! gates, a request context with subrequest accounting and recursion-depth
//! limits, a FIFO mutex), and a date/flag-driven compatibility resolver.
//!
//! What this crate deliberately does NOT provide: a CLI, wrangler-style
//! config/`.env`/TOML loading, file watching, script loading and module
//! linking, an HTTP server, WebSocket termination, an HTML rewriter, or a
//! cron scheduler. Those are external collaborators that would consume this
//! crate's bindings; a single process embedding this crate owns all state.

pub mod cache;
pub mod clock;
pub mod collation;
pub mod compat;
pub mod context;
pub mod gates;
pub mod kv;
pub mod mutex;
pub mod r2;
pub mod storage;

pub use cache::Cache;
pub use clock::Clock;
pub use compat::CompatibilityResolver;
pub use context::RequestContext;
pub use kv::KvNamespace;
pub use mutex::Mutex;
pub use r2::Bucket;
pub use storage::{MemoryStorage, Storage, StorageFactory};
