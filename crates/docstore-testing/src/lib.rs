//! # docstore-testing
//!
//! Test infrastructure for docstore driver development.
//!
//! The pool treats establishment and the established session as opaque
//! collaborators, so its whole behavior can be exercised without a server:
//! this crate provides a scriptable in-memory connector and transport plus
//! an event recorder for asserting on the pool's lifecycle stream.
//!
//! ## Example
//!
//! ```rust,ignore
//! use docstore_testing::{EventRecorder, StubConnector};
//!
//! #[tokio::test]
//! async fn test_checkout_reuses_idle() {
//!     let connector = Arc::new(StubConnector::new());
//!     let recorder = Arc::new(EventRecorder::new());
//!     let pool = Pool::builder()
//!         .address(ServerAddress::new("localhost", 7070))
//!         .connector(Arc::clone(&connector) as Arc<dyn Connector>)
//!         .listener(Arc::clone(&recorder) as Arc<dyn PoolListener>)
//!         .build()
//!         .unwrap();
//!     pool.ready();
//!     // ...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod recorder;
pub mod stub;

pub use recorder::EventRecorder;
pub use stub::{StubConnector, StubTransport};
