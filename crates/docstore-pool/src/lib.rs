//! # docstore-driver-pool
//!
//! Bounded connection pool for a single docstore server.
//!
//! The pool owns every transport session to one server address and serves
//! concurrent checkout/check-in requests against a shared capacity budget.
//! A monotonic generation counter invalidates a whole generation of
//! connections in O(1) when the server monitor reports a fault, without
//! traversing outstanding connections.
//!
//! ## Features
//!
//! - Bounded capacity with a FIFO wait queue and per-request deadlines
//! - Generation stamping: `clear` retires every current connection lazily,
//!   at the next checkout or check-in that sees the stale stamp
//! - Background maintainer keeping `min_pool_size` warm and evicting
//!   idle-expired connections
//! - Retry-safety labeling on pool-cleared errors, consumed by the
//!   write-retry layer
//! - Lifecycle event stream for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use docstore_driver_pool::{Pool, ServerAddress};
//!
//! let pool = Pool::builder()
//!     .address(ServerAddress::new("db.example.com", 7070))
//!     .connector(Arc::new(TcpConnector::new(tls_config)))
//!     .max_pool_size(20)
//!     .wait_queue_timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! // The monitor signals readiness once the server responds to heartbeats.
//! pool.ready();
//!
//! let mut conn = pool.check_out().await?;
//! // Send commands over conn.transport()...
//! // Checked back in when the guard drops.
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod conn;
pub mod error;
pub mod event;
mod maintain;
pub mod pool;
mod wait_queue;

pub use config::PoolConfig;
pub use conn::{Connection, Connector, InterruptHandle, ServerAddress, Transport};
pub use error::{ConnectionError, Error, Result};
pub use event::{CheckoutFailedReason, CloseReason, PoolEvent, PoolEventKind, PoolListener};
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolState, PoolStatus, PooledConnection};
