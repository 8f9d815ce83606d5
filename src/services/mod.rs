pub mod extraction;
pub mod metrics;
pub mod mirror;
pub mod quota;
pub mod token_cache;
pub mod tracking;

pub use extraction::*;
pub use metrics::*;
pub use mirror::*;
pub use quota::*;
pub use token_cache::*;
pub use tracking::*;
