//! # WastePro Core
//!
//! Agent runtime and message fabric: components compose by subscribing to
//! and publishing broker topics, and request/reply synchronously when
//! needed. This crate owns the parcel envelope and its wire codec, the
//! broker abstraction with an in-process implementation, the agent
//! lifecycle, configuration, and the logging bootstrap.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wastepro_core::prelude::*;
//!
//! let broker = LocalBroker::new();
//! let service = Agent::start(Arc::new(MyService::new()), broker.clone()).await?;
//! let reply = client
//!     .publish_sync("Prompt/LlmService/Services", parcel, Duration::from_secs(20))
//!     .await?;
//! ```

pub mod agent;
pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod parcel;

pub use agent::{Agent, AgentBehavior, AgentHandle, AgentState, HandlerFn, TopicHandler};
pub use broker::{Broker, LocalBroker, SubscriberId, TopicSubscription};
pub use config::{Config, LogLevel};
pub use error::{Error, Result};
pub use parcel::{Body, ContentKind, Parcel, ParcelError};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::agent::{Agent, AgentBehavior, AgentHandle, AgentState};
    pub use crate::broker::{Broker, LocalBroker};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::parcel::{Body, ContentKind, Parcel, ParcelError};
}
