//! Origin model shared by the inventory, load balancing and dispatch.
//!
//! Origins are immutable values; the inventory derives [`RemoteHost`]
//! projections and [`OriginsSnapshot`]s from its tracked state.

mod model;
mod remote_host;
mod snapshot;

pub use model::{AppId, Origin, OriginId, TlsSettings};
pub use remote_host::RemoteHost;
pub use snapshot::{OriginsChangeListener, OriginsSnapshot};
