mod filters;
mod patches;
mod transform;

pub use filters::*;
pub use patches::*;
pub use transform::*;
