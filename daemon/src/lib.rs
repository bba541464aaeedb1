pub mod app;
pub mod config;
pub mod error;
pub mod management;
pub mod storage;
pub mod utils;

pub use error::{Result, SupervisorError};
