//! Proxy Configuration
//!
//! Messages exchanged with a connected GATT proxy and the client-side
//! state of its filter.

mod filter;
pub mod message;
#[cfg(test)]
mod tests;

pub use filter::{ProxyFilter, ProxyFilterAction, ProxyFilterSetup};
pub use message::{chunk_addresses, FilterType, ProxyConfigurationMessage, MAX_ADDRESSES_PER_MESSAGE};
