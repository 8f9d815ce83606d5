pub mod convert;
pub mod plan;
pub mod quota;

pub use convert::*;
pub use plan::*;
pub use quota::*;
