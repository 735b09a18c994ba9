//! Capability boundary between the controller and the embedding environment.
//!
//! The embedding environment (a browser page, a webview, the headless host used by the
//! console binary, or a test fake) owns the applet runtime. The controller only reaches it
//! through these two traits, and it is the only caller of them.

use crate::model::AppletParams;
use anyhow::Result;
use bytes::Bytes;
use tokio::sync::oneshot;

/// The "current applet instance" handle exposed by the runtime.
pub trait AppletApi: Send {
    fn reset(&mut self) -> Result<()>;

    fn eval_command(&mut self, command: &str) -> Result<()>;

    /// Whether the instance already exposes its resize operation. The controller treats
    /// this as the minimum capability that makes the runtime callable.
    fn can_resize(&self) -> bool;

    fn set_size(&mut self, width: u32, height: u32) -> Result<()>;

    /// Serialized applet-native document, base64 encoded.
    fn get_base64(&mut self) -> Result<String>;
}

/// The environment that loads the runtime and hosts applet instances.
pub trait AppletHost: Send + 'static {
    /// Whether a loader entry point is already present in the environment.
    fn loader_present(&self) -> bool;

    /// Request the loader resource. The receiver resolves when the resource has finished
    /// loading; if the sender is dropped the load is treated as never completing.
    fn request_loader(&mut self, url: &str) -> oneshot::Receiver<()>;

    /// Whether the applet class constructor exists yet.
    fn applet_class_available(&self) -> bool;

    fn container_exists(&self, container: &str) -> bool;

    /// Remove whatever a previous instance rendered into `container`.
    fn clear_container(&mut self, container: &str);

    /// Current layout size of `container`, if it can be measured.
    fn container_size(&self, container: &str) -> Option<(u32, u32)>;

    /// Construct a new applet instance inside `container`. The receiver resolves when the
    /// instance reports that it has finished loading.
    fn inject(&mut self, container: &str, params: &AppletParams) -> Result<oneshot::Receiver<()>>;

    /// The current applet instance, if one exists.
    fn applet(&mut self) -> Option<&mut dyn AppletApi>;

    /// Hand `payload` to the user as a downloadable file called `filename`.
    fn download(&mut self, filename: &str, payload: Bytes) -> Result<()>;
}
