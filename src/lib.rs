/// Service configuration loading (defaults, file, environment).
pub mod config;
/// Correlation identifiers.
pub mod guid;
/// Structured logging setup (filters, console/file sinks).
pub mod logging;
/// Route table: topic to handler.
pub mod routing;
/// Correlation registry, dispatchers, connection guard and the service facade.
pub mod rpc;
/// Broker transport seam and the in-process topic broker.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Errors and result types.
pub use courier_error::{
    ConfigError, CourierResult, ErrorExt, ResultExt, RouteError, RpcError, StackError,
    StatusCode, TransportError,
};

/// Configuration.
pub use config::{PrefetchConfig, RpcConfig, Settings};
/// Correlation identifiers.
pub use guid::{guid, CorrelationId};
/// Logging.
pub use logging::{init_logging, FileLogConfig, LogFormat, LoggingConfig, LoggingHandle};
/// Routing.
pub use routing::{FnHandler, Route, RouteHandler, RouteKind, RouteTable};
/// RPC engine.
pub use rpc::{
    ConnectionGuard, ConnectionState, CorrelationRegistry, Dispatch, InboundDispatcher, PendingReply,
    ReplyDispatcher, RpcService, RpcServiceBuilder, RpcStats, RpcStatsSnapshot,
};
/// Transport seam.
pub use transport::{
    memory::{MemoryBroker, MemoryConnection},
    Channel, ChannelSetup, ConnectOptions, Connection, ConnectionEvent, ConsumeOptions,
    DeliveryHandler, Envelope, ExchangeKind, ExchangeOptions, MessageProperties, QueueOptions,
    Transport,
};
