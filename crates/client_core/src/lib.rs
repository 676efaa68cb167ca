//! Front-end synchronization core for drosse processes.
//!
//! [`DrosseRegistry`] keeps the in-memory registry consistent with the
//! host's lifecycle events, reconciles each drosse's remote route table
//! into it and persists the result through a [`CommandGateway`].

pub mod bus;
pub mod config_fetch;
pub mod events;
pub mod gateway;
pub mod io;
pub mod registry;
pub mod routes;

pub use bus::NotificationBus;
pub use config_fetch::{ConfigFetchError, ConfigFetcher, HttpConfigFetcher};
pub use events::{ChannelEventSource, EventSource, EventSourceError, EventStream, WsEventSource};
pub use gateway::{CommandGateway, GatewayError, HttpCommandGateway};
pub use io::{DrosseIo, FileLanguage, FileView};
pub use registry::{DrosseRegistry, RegistryError, RegistryOptions, Subscription};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
