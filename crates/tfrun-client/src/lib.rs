pub mod config;
pub mod error;
pub mod http;
pub mod service;

pub use config::*;
pub use error::*;
pub use http::*;
pub use service::*;
