pub mod backoff;
pub mod controller;
pub mod error;
pub mod event_bus;
pub mod poller;
pub mod queue;
pub mod request;
pub mod status;

#[cfg(test)]
mod testing;

pub use backoff::*;
pub use controller::*;
pub use error::*;
pub use event_bus::*;
pub use poller::*;
pub use queue::*;
pub use request::*;
pub use status::*;
