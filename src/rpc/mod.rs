mod guard;
mod inbound;
mod registry;
mod reply;
mod service;
mod setup;
mod stats;

pub use guard::{ConnectionGuard, ConnectionState};
pub use inbound::{Dispatch, InboundDispatcher};
pub use registry::{CorrelationRegistry, PendingReply};
pub use reply::ReplyDispatcher;
pub use service::{RpcService, RpcServiceBuilder};
pub use stats::{RpcStats, RpcStatsSnapshot};
