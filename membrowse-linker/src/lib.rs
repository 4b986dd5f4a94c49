//! GNU-LD linker script parsing: expression evaluation and `MEMORY` block
//! extraction.
//!
//! The public entry point is [`parse_memory_regions`]; everything else is
//! exposed for the benefit of `membrowse-report`, which augments the
//! resulting [`MemoryRegion`] values with section bindings and utilization.

mod defaults;
mod error;
mod eval;
mod region;
mod script;

pub use error::{LinkerError, Result};
pub use eval::{evaluate_expression, ParseEnv, Variable};
pub use region::{MemoryRegion, RegionType};
pub use script::{clean_content, parse_memory_regions};
