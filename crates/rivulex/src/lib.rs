//! Distributed messaging runtime built on a Redis-compatible stream log and
//! consumer groups: at-least-once delivery, per-stream FIFO ordering,
//! bounded-concurrency dispatch, retry-then-dead-letter handling, and
//! periodic retention trimming.
//!
//! A subscriber is assembled with [`supervisor::SupervisorBuilder`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use rivulex::config::SubscriberConfig;
//! use rivulex::hooks::HookBus;
//! use rivulex::registry::ActionHandler;
//! use rivulex::supervisor::{StreamRegistration, SupervisorBuilder};
//! use rivulex_helpers::redis::{get_redis_connection, ConnectionConfig};
//!
//! # async fn run(handler: Arc<dyn ActionHandler>) -> Result<(), Box<dyn std::error::Error>> {
//! let connection = get_redis_connection(
//!     &ConnectionConfig {
//!         nodes: vec!["redis://127.0.0.1:6379".to_string()],
//!         password: None,
//!         cluster_mode: false,
//!     },
//!     None,
//! )
//! .await?;
//!
//! let running = SupervisorBuilder::new(connection, HookBus::new())
//!     .register_stream(StreamRegistration::new("users").on_action("u_created", handler))
//!     .listen(SubscriberConfig {
//!         group: "billing".to_string(),
//!         streams: vec!["users".to_string()],
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! running.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod consumer_live;
pub mod consumer_pending;
pub mod errors;
pub mod event;
pub mod hooks;
pub mod processor;
pub mod publisher;
pub mod registry;
pub mod supervisor;
pub mod trimmer;

pub use errors::RivulexError;
pub use event::{Event, Headers, PublishEntry};
pub use processor::Ack;
pub use registry::ActionHandler;
