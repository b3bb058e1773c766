//! HTTP request handlers served behind the gateway.

pub mod relay;

pub use relay::{relay, relay_router, RelayState};
