use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub loader_url: String,
    pub container_id: String,
    #[serde(with = "humantime_serde")]
    pub initial_poll_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub resize_debounce: Duration,
    #[serde(with = "humantime_serde")]
    pub command_spacing: Duration,
    pub locale: String,
    pub default_file_stem: String,
    pub file_extension: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            loader_url: "https://www.geogebra.org/apps/deployggb.js".into(),
            container_id: "ggb-element".into(),
            initial_poll_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            resize_debounce: Duration::from_millis(100),
            command_spacing: Duration::from_millis(100),
            locale: "en".into(),
            default_file_stem: "geogebra-export".into(),
            file_extension: "ggb".into(),
        }
    }
}

/// Source-document hints applied whenever the applet is (re)injected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfiguration {
    #[serde(default)]
    pub filename: Option<String>,
    /// Base64-encoded applet-native document.
    #[serde(default)]
    pub document_bytes: Option<String>,
}

impl LoadConfiguration {
    pub fn from_filename(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            document_bytes: None,
        }
    }

    pub fn from_document_bytes(document_bytes: impl Into<String>) -> Self {
        Self {
            filename: None,
            document_bytes: Some(document_bytes.into()),
        }
    }

    /// Overlay `update` on top of `self`; fields set in `update` win.
    pub fn merge(&mut self, update: LoadConfiguration) {
        if update.filename.is_some() {
            self.filename = update.filename;
        }
        if update.document_bytes.is_some() {
            self.document_bytes = update.document_bytes;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filename.is_none() && self.document_bytes.is_none()
    }
}

/// Construction parameters handed to the host when an applet instance is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppletParams {
    pub show_tool_bar: bool,
    pub show_algebra_input: bool,
    pub show_menu_bar: bool,
    pub enable_label_drags: bool,
    pub enable_shift_drag_zoom: bool,
    pub enable_right_click: bool,
    pub show_reset_icon: bool,
    pub language: String,
    pub fill_container: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, rename = "ggbBase64", skip_serializing_if = "Option::is_none")]
    pub document_bytes: Option<String>,
}

impl AppletParams {
    /// Fixed base parameters overlaid with the stored load configuration.
    pub fn build(locale: &str, load: &LoadConfiguration) -> Self {
        Self {
            show_tool_bar: true,
            show_algebra_input: true,
            show_menu_bar: true,
            enable_label_drags: false,
            enable_shift_drag_zoom: true,
            enable_right_click: true,
            show_reset_icon: true,
            language: locale.to_string(),
            fill_container: true,
            filename: load.filename.clone(),
            document_bytes: load.document_bytes.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReadinessState {
    Uninitialized,
    Loading,
    Polling,
    Ready,
}

/// Last size successfully pushed to the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRecord {
    pub width: u32,
    pub height: u32,
}

/// Where a readiness latch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadySource {
    LoaderCallback,
    Poll,
    AppletLoaded,
}

/// Structured events emitted by the controller for presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControllerEvent {
    StateChanged {
        state: ReadinessState,
    },
    Ready {
        source: ReadySource,
    },
    Injected {
        params: AppletParams,
    },
    CommandEvaluated {
        command: String,
        ok: bool,
    },
    SizeApplied {
        size: SizeRecord,
    },
    Saved {
        filename: String,
        bytes: usize,
    },
    Warning(String),
}

impl ControllerEvent {
    /// Render a human-readable message for console output.
    pub fn to_message(&self) -> String {
        match self {
            ControllerEvent::StateChanged { state } => format!("State: {state:?}"),
            ControllerEvent::Ready { source } => format!("Applet ready ({source:?})"),
            ControllerEvent::Injected { params } => match (&params.filename, &params.document_bytes) {
                (Some(f), _) => format!("Applet injected with file {f}"),
                (None, Some(b)) => format!("Applet injected with inline document ({} chars)", b.len()),
                (None, None) => "Applet injected".to_string(),
            },
            ControllerEvent::CommandEvaluated { command, ok } => {
                if *ok {
                    format!("ok: {command}")
                } else {
                    format!("failed: {command}")
                }
            }
            ControllerEvent::SizeApplied { size } => {
                format!("Size applied: {}x{}", size.width, size.height)
            }
            ControllerEvent::Saved { filename, bytes } => {
                format!("Saved {filename} ({bytes} bytes)")
            }
            ControllerEvent::Warning(msg) => msg.clone(),
        }
    }
}
