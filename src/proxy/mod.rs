//! Inbound proxy listener.

mod gateway;

pub use gateway::{error_status, proxy, start_proxy_server, strip_hop_by_hop};
