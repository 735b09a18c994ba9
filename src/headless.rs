//! In-process applet host.
//!
//! Stands in for a browser page: the loader "arrives" after a configurable latency, the
//! applet becomes callable after a boot delay, and downloads land in an output directory.
//! The applet's document is the list of accepted commands, serialized as JSON.

use crate::document::{decode_payload, encode_payload};
use crate::model::AppletParams;
use crate::runtime::{AppletApi, AppletHost};
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlessDocument {
    pub commands: Vec<String>,
}

/// Shared view of the container's layout size, adjustable after the host is handed off.
#[derive(Debug, Clone)]
pub struct ContainerLayout(Arc<Mutex<(u32, u32)>>);

impl ContainerLayout {
    pub fn new(width: u32, height: u32) -> Self {
        Self(Arc::new(Mutex::new((width, height))))
    }

    pub fn set(&self, width: u32, height: u32) {
        if let Ok(mut size) = self.0.lock() {
            *size = (width, height);
        }
    }

    pub fn get(&self) -> Option<(u32, u32)> {
        self.0.lock().ok().map(|size| *size)
    }
}

pub struct HeadlessApplet {
    initial: HeadlessDocument,
    document: HeadlessDocument,
    size: (u32, u32),
    /// `None` when the boot delay is too large to represent; the applet never becomes callable.
    callable_at: Option<Instant>,
}

impl HeadlessApplet {
    fn new(initial: HeadlessDocument, boot_delay: Duration) -> Self {
        Self {
            document: initial.clone(),
            initial,
            size: (0, 0),
            callable_at: Instant::now().checked_add(boot_delay),
        }
    }

    pub fn document(&self) -> &HeadlessDocument {
        &self.document
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

/// Reject commands whose brackets do not pair up.
fn check_brackets(command: &str) -> Result<()> {
    let mut stack = Vec::new();
    for c in command.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    bail!("unexpected `{c}`");
                }
            }
            _ => {}
        }
    }
    if let Some(open) = stack.pop() {
        bail!("unclosed `{open}`");
    }
    Ok(())
}

impl AppletApi for HeadlessApplet {
    fn reset(&mut self) -> Result<()> {
        self.document = self.initial.clone();
        Ok(())
    }

    fn eval_command(&mut self, command: &str) -> Result<()> {
        if command.is_empty() {
            bail!("empty command");
        }
        check_brackets(command)?;
        self.document.commands.push(command.to_string());
        Ok(())
    }

    fn can_resize(&self) -> bool {
        self.callable_at.is_some_and(|at| Instant::now() >= at)
    }

    fn set_size(&mut self, width: u32, height: u32) -> Result<()> {
        self.size = (width, height);
        Ok(())
    }

    fn get_base64(&mut self) -> Result<String> {
        let raw = serde_json::to_vec(&self.document).context("encode document")?;
        Ok(encode_payload(&raw))
    }
}

pub struct HeadlessHost {
    container_id: String,
    layout: ContainerLayout,
    loader_latency: Duration,
    boot_delay: Duration,
    documents_dir: PathBuf,
    download_dir: PathBuf,
    loader_requested: bool,
    class_available: Arc<AtomicBool>,
    applet: Option<HeadlessApplet>,
}

impl HeadlessHost {
    pub fn new(container_id: impl Into<String>, layout: ContainerLayout) -> Self {
        let download_dir = dirs::download_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            container_id: container_id.into(),
            layout,
            loader_latency: Duration::from_millis(200),
            boot_delay: Duration::ZERO,
            documents_dir: PathBuf::from("."),
            download_dir,
            loader_requested: false,
            class_available: Arc::new(AtomicBool::new(false)),
            applet: None,
        }
    }

    pub fn with_loader_latency(mut self, latency: Duration) -> Self {
        self.loader_latency = latency;
        self
    }

    pub fn with_boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    /// Directory against which relative document filenames are resolved.
    pub fn with_documents_dir(mut self, dir: PathBuf) -> Self {
        self.documents_dir = dir;
        self
    }

    pub fn with_download_dir(mut self, dir: PathBuf) -> Self {
        self.download_dir = dir;
        self
    }

    fn read_document(&self, params: &AppletParams) -> Result<HeadlessDocument> {
        // Inline bytes take precedence over a filename, as they do in the browser runtime.
        let raw = if let Some(encoded) = params.document_bytes.as_deref() {
            decode_payload(encoded)?
        } else if let Some(name) = params.filename.as_deref() {
            let path = self.documents_dir.join(name);
            Bytes::from(
                std::fs::read(&path).with_context(|| format!("read {}", path.display()))?,
            )
        } else {
            return Ok(HeadlessDocument::default());
        };
        serde_json::from_slice(&raw).context("parse document")
    }
}

impl AppletHost for HeadlessHost {
    fn loader_present(&self) -> bool {
        self.loader_requested || self.class_available.load(Ordering::Relaxed)
    }

    fn request_loader(&mut self, url: &str) -> oneshot::Receiver<()> {
        debug!(url, latency = ?self.loader_latency, "headless loader requested");
        self.loader_requested = true;
        let (tx, rx) = oneshot::channel();
        let available = self.class_available.clone();
        let latency = self.loader_latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            available.store(true, Ordering::Relaxed);
            let _ = tx.send(());
        });
        rx
    }

    fn applet_class_available(&self) -> bool {
        self.class_available.load(Ordering::Relaxed)
    }

    fn container_exists(&self, container: &str) -> bool {
        container == self.container_id
    }

    fn clear_container(&mut self, container: &str) {
        if container == self.container_id {
            self.applet = None;
        }
    }

    fn container_size(&self, container: &str) -> Option<(u32, u32)> {
        if container == self.container_id {
            self.layout.get()
        } else {
            None
        }
    }

    fn inject(&mut self, container: &str, params: &AppletParams) -> Result<oneshot::Receiver<()>> {
        if container != self.container_id {
            bail!("no container named `{container}`");
        }
        let document = match self.read_document(params) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "document could not be opened; starting empty");
                HeadlessDocument::default()
            }
        };
        self.applet = Some(HeadlessApplet::new(document, self.boot_delay));

        let (tx, rx) = oneshot::channel();
        let boot_delay = self.boot_delay;
        tokio::spawn(async move {
            tokio::time::sleep(boot_delay).await;
            let _ = tx.send(());
        });
        Ok(rx)
    }

    fn applet(&mut self) -> Option<&mut dyn AppletApi> {
        self.applet.as_mut().map(|a| a as &mut dyn AppletApi)
    }

    fn download(&mut self, filename: &str, payload: Bytes) -> Result<()> {
        std::fs::create_dir_all(&self.download_dir)
            .with_context(|| format!("create {}", self.download_dir.display()))?;
        let path = self.download_dir.join(filename);
        std::fs::write(&path, &payload).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), "download written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_check_catches_mismatches() {
        assert!(check_brackets("f(x) = sin(x)").is_ok());
        assert!(check_brackets("L = {1, 2, (3)}").is_ok());
        assert!(check_brackets("f(x = 1").is_err());
        assert!(check_brackets("A = (1, 2]").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn applet_document_tracks_commands_and_reset() {
        let initial = HeadlessDocument {
            commands: vec!["A=(0,0)".into()],
        };
        let mut applet = HeadlessApplet::new(initial.clone(), Duration::ZERO);
        applet.eval_command("B=(1,1)").unwrap();
        assert!(applet.eval_command("C=(1,1").is_err());
        assert_eq!(applet.document().commands, vec!["A=(0,0)", "B=(1,1)"]);

        applet.reset().unwrap();
        assert_eq!(applet.document(), &initial);

        applet.set_size(640, 480).unwrap();
        assert_eq!(applet.size(), (640, 480));
    }

    #[tokio::test(start_paused = true)]
    async fn inline_document_is_loaded_on_inject() {
        let doc = HeadlessDocument {
            commands: vec!["P=(1,2)".into()],
        };
        let encoded = encode_payload(&serde_json::to_vec(&doc).unwrap());
        let mut host = HeadlessHost::new("ggb-element", ContainerLayout::new(640, 480));
        let load = crate::model::LoadConfiguration::from_document_bytes(encoded);
        let params = AppletParams::build("en", &load);
        host.inject("ggb-element", &params).unwrap();

        let applet = host.applet().unwrap();
        let saved = decode_payload(&applet.get_base64().unwrap()).unwrap();
        let round: HeadlessDocument = serde_json::from_slice(&saved).unwrap();
        assert_eq!(round, doc);
    }

    #[tokio::test(start_paused = true)]
    async fn applet_is_not_callable_until_booted() {
        let applet = HeadlessApplet::new(HeadlessDocument::default(), Duration::from_millis(300));
        assert!(!applet.can_resize());
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(applet.can_resize());
    }
}
