pub use block::*;
pub use coverage::*;
pub use gap::*;
pub use milestone::*;
pub use reorg::*;

mod block;
mod coverage;
mod gap;
mod milestone;
mod reorg;
