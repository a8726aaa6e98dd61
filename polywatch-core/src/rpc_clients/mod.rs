pub use circuit_breaker::*;
pub use fallback::*;

mod circuit_breaker;
mod fallback;
