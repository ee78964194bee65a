use std::panic::{self, AssertUnwindSafe};

use crate::error::{panic_message, PipelineError, Result};

pub mod attribute;
mod columns;
pub mod spatial;

pub use attribute::{attribute_join, attribute_join_with, AttributeHow};
pub use spatial::{spatial_join, spatial_join_with, SpatialHow, SpatialPredicate};

// geo asserts on some degenerate inputs; a panic there must not unwind
// through the caller.
fn guarded<T>(step: impl FnOnce() -> T, wrap: fn(String) -> PipelineError) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(step)).map_err(|payload| wrap(panic_message(payload)))
}
