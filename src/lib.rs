//! Lifecycle and command orchestration for an embedded, asynchronously-loaded applet.
//!
//! The embedding environment is reached only through the [`runtime::AppletHost`] and
//! [`runtime::AppletApi`] traits; everything else lives in a single controller task.

pub mod commands;
pub mod document;
pub mod error;
pub mod headless;
pub mod model;
pub mod orchestrator;
pub mod runtime;

pub use error::AppletError;
pub use model::{ControllerConfig, ControllerEvent, LoadConfiguration, ReadinessState};
pub use orchestrator::{spawn_controller, ControllerHandle};
