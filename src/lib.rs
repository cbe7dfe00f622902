pub mod config;
pub mod core;
pub mod error;
pub mod exec;
pub mod log;
pub mod orchestration;
pub mod remote;
pub mod reporter;
pub mod shipfile;
pub mod shipr;
pub mod util;

pub use error::{Error, Result};
pub use shipfile::Shipfile;
pub use shipr::Shipr;
