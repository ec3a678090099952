mod anneal;
mod checkpoint;
mod grad;
mod runs;
mod step;
mod trainers;

pub use anneal::*;
pub use checkpoint::*;
pub use grad::*;
pub use runs::*;
pub use step::*;
pub use trainers::*;
