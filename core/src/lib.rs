//! Case-aggregation core: turns raw transaction extracts into
//! case-level risk profiles and runs the scheduled tasks around them.
//!
//! The pipeline modules (schema → normalize → chunk → aggregate →
//! pipeline) are pure and single-threaded; the container modules
//! (store, scheduler, status, container, job) put them behind a
//! SQLite-backed task surface.

pub mod aggregate;
pub mod archive;
pub mod chunk;
pub mod config;
pub mod container;
pub mod error;
pub mod job;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod timeparse;
pub mod types;
pub mod workflow;
