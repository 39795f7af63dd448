pub mod types;
pub mod error;
pub mod config;
pub mod cache;
pub mod retry;

pub use types::*;
pub use error::*;
pub use config::*;
pub use cache::*;
pub use retry::*;
