//! Interpreted execution of compiled solutions.
//!
//! Used to check that the tiled sweep agrees with a plain reference sweep
//! and to time compiled plans without generating code.

pub mod context;
pub mod executor;
pub mod grid;
pub mod tiling;

pub use context::{StencilContext, DEFAULT_TOLERANCE};
pub use executor::{CacheLevel, CountingPrefetch, Executor, NoPrefetch, Prefetcher};
pub use grid::{Grid, GridDim};
pub use tiling::{partition, TileBox, TilingPlan};
