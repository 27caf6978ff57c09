pub mod analytics;
pub mod health;
pub mod proxy;
pub mod score;

pub use analytics::*;
pub use health::*;
pub use proxy::*;
pub use score::*;
