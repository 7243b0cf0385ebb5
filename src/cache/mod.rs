//! Staleness-checked cache for backlog items.
//!
//! The cache keeps the last full result in memory along with a watermark
//! (the newest change date it contained). Reads probe the server for
//! anything in scope changed after the watermark and reload everything
//! only when the probe finds something.

mod repository;
mod traits;

pub use repository::BacklogRepository;
pub use traits::{CacheResult, CacheSource};
