//! In-memory caching layer (spec component G): content caches, the
//! domain-lookup caches, and the being-cached barrier.

pub mod barrier;
pub mod content;
pub mod domain;

pub use barrier::{Barrier, BarrierGuard};
pub use content::ContentCache;
pub use domain::DomainCache;
