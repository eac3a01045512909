//! Test utilities for the signal relay.
//!
//! # Modules
//!
//! - [`transport`] - in-memory client transport (`TestPeer`) driving a real session
//! - [`bus`] - in-process relay bus (`InMemoryBus`) and a publisher that always fails
//! - [`fixtures`] - client frames and relay instances wired for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_test_utils::{RelayInstance, TestPeer};
//!
//! #[tokio::test]
//! async fn test_join() {
//!     let instance = RelayInstance::standalone();
//!     let mut peer = instance.connect();
//!     let id = peer.client_id().await;
//!     peer.send_json(relay_test_utils::fixtures::join_frame("room-1"));
//! }
//! ```

pub mod bus;
pub mod fixtures;
pub mod transport;

pub use bus::{FailingPublisher, InMemoryBus};
pub use fixtures::RelayInstance;
pub use transport::{TestPeer, TestTransportError};
