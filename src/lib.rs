//! A time-windowed left-outer join of interactions and observations.
//!
//! Interactions (for example a decision made for a user) arrive as
//! [`message::MessageBatch`]es. Observations (for example the user's
//! later reaction) arrive one [`message::Message`] at a time. Both
//! carry an event id. The [`join::JoinEngine`] emits every interaction
//! batch exactly once as a [`message::JoinedBatch`], with each
//! sub-event grouped together with the observations that share its id
//! and fall within its forward and backward windows.
//!
//! Sources and sinks are traits, see [`inputs`] and [`outputs`].
//! Engines are run and restarted with the helpers in [`run`].

pub mod config;
pub mod dangling;
pub mod errors;
pub mod inputs;
pub mod join;
pub mod message;
pub mod metrics;
pub mod outputs;
pub mod run;
pub mod tracing;
pub mod webserver;
pub mod window;

pub use config::JoinConfig;
pub use errors::{ConfigError, JoinError, RecvError, SinkError};
pub use join::{EngineState, JoinEngine, StepOutcome, Watermarks};
pub use message::{InvalidMessage, InvalidReason, JoinedBatch, Message, MessageBatch};
pub use run::{shutdown_pair, spawn_join_engine, supervise, Shutdown, ShutdownHandle, StartPosition};
pub use window::{SlackMode, WindowPolicy};
