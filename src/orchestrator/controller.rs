//! Applet lifecycle controller.
//!
//! A single task owns the host, the applet handle and every timer. Callers drive it through
//! [`ControllerHandle`]; readiness is published on a watch channel.

use super::readiness::Readiness;
use super::sizing::{Debouncer, SizeDecision, SizeSync};
use crate::commands::{dispatch_offset, parse_command_block, strip_comment};
use crate::document::{decode_payload, resolve_download_name};
use crate::error::AppletError;
use crate::model::{
    AppletParams, ControllerConfig, ControllerEvent, LoadConfiguration, ReadinessState,
    ReadySource,
};
use crate::runtime::AppletHost;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Requests sent from handles to the controller task.
#[derive(Debug)]
enum ControllerCommand {
    Initialize,
    ExecuteCommand {
        command: String,
        reply: oneshot::Sender<bool>,
    },
    ExecuteCommands(Vec<String>),
    Reset(oneshot::Sender<bool>),
    SetSize {
        width: u32,
        height: u32,
        reply: oneshot::Sender<bool>,
    },
    NotifyResize,
    LoadNewFile(LoadConfiguration),
    SaveNewFile(Option<String>),
    State(oneshot::Sender<ReadinessState>),
    Configuration(oneshot::Sender<LoadConfiguration>),
    Dispose,
}

/// One staggered command whose offset has elapsed.
struct Dispatch {
    index: usize,
    command: String,
}

/// Cloneable front end to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    cmd_tx: UnboundedSender<ControllerCommand>,
    ready_rx: watch::Receiver<bool>,
}

impl ControllerHandle {
    /// Start acquiring the applet runtime. Repeated calls are no-ops.
    pub fn initialize(&self) {
        let _ = self.cmd_tx.send(ControllerCommand::Initialize);
    }

    /// Evaluate one command. Returns false on any failure.
    pub async fn execute_command(&self, command: impl Into<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        let cmd = ControllerCommand::ExecuteCommand {
            command: command.into(),
            reply,
        };
        if self.cmd_tx.send(cmd).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Reset the applet, then dispatch `commands` at fixed increasing offsets.
    pub fn execute_commands(&self, commands: Vec<String>) {
        let _ = self.cmd_tx.send(ControllerCommand::ExecuteCommands(commands));
    }

    /// Multi-line entry: one command per non-blank line, comments removed.
    pub fn execute_command_block(&self, text: &str) {
        self.execute_commands(parse_command_block(text));
    }

    pub async fn reset(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(ControllerCommand::Reset(reply)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Push a new size to the applet. Returns true only if the runtime was resized.
    pub async fn set_size(&self, width: u32, height: u32) -> bool {
        let (reply, rx) = oneshot::channel();
        let cmd = ControllerCommand::SetSize {
            width,
            height,
            reply,
        };
        if self.cmd_tx.send(cmd).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Raw resize signal from the host environment; debounced before measuring.
    pub fn notify_resize(&self) {
        let _ = self.cmd_tx.send(ControllerCommand::NotifyResize);
    }

    pub fn load_new_file(&self, update: LoadConfiguration) {
        let _ = self.cmd_tx.send(ControllerCommand::LoadNewFile(update));
    }

    pub fn save_new_file(&self, filename: Option<String>) {
        let _ = self.cmd_tx.send(ControllerCommand::SaveNewFile(filename));
    }

    pub async fn readiness_state(&self) -> ReadinessState {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(ControllerCommand::State(reply)).is_err() {
            return ReadinessState::Uninitialized;
        }
        rx.await.unwrap_or(ReadinessState::Uninitialized)
    }

    pub async fn current_configuration(&self) -> LoadConfiguration {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(ControllerCommand::Configuration(reply)).is_err() {
            return LoadConfiguration::default();
        }
        rx.await.unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Readiness signal for host UIs.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// Wait until readiness is latched. Returns false if the controller went away first.
    pub async fn wait_until_ready(&self) -> bool {
        let mut rx = self.ready_rx.clone();
        let ready = rx.wait_for(|ready| *ready).await.is_ok();
        ready
    }

    /// Stop the controller and cancel its poll and resize timers.
    pub fn dispose(&self) {
        let _ = self.cmd_tx.send(ControllerCommand::Dispose);
    }
}

struct AppletController {
    cfg: ControllerConfig,
    host: Box<dyn AppletHost>,
    load: LoadConfiguration,
    readiness: Readiness,
    sizing: SizeSync,
    resize: Debouncer,
    loader_rx: Option<oneshot::Receiver<()>>,
    applet_loaded_rx: Option<oneshot::Receiver<()>>,
    has_instance: bool,
    dispatch_tx: UnboundedSender<Dispatch>,
    event_tx: Option<UnboundedSender<ControllerEvent>>,
}

/// Spawn a controller task for `host` and return its handle.
///
/// Dropping every handle (or calling [`ControllerHandle::dispose`]) ends the task.
pub fn spawn_controller<H: AppletHost>(
    cfg: ControllerConfig,
    host: H,
    event_tx: Option<UnboundedSender<ControllerEvent>>,
) -> (ControllerHandle, tokio::task::JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
    let (dispatch_tx, dispatch_rx) = tokio::sync::mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = watch::channel(false);

    let controller = AppletController {
        resize: Debouncer::new(cfg.resize_debounce),
        cfg,
        host: Box::new(host),
        load: LoadConfiguration::default(),
        readiness: Readiness::new(ready_tx),
        sizing: SizeSync::default(),
        loader_rx: None,
        applet_loaded_rx: None,
        has_instance: false,
        dispatch_tx,
        event_tx,
    };
    let handle = tokio::spawn(controller.run(cmd_rx, dispatch_rx));
    (ControllerHandle { cmd_tx, ready_rx }, handle)
}

async fn recv_signal(rx: &mut Option<oneshot::Receiver<()>>) -> bool {
    match rx {
        Some(rx) => rx.await.is_ok(),
        None => futures::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => futures::future::pending().await,
    }
}

impl AppletController {
    async fn run(
        mut self,
        mut cmd_rx: UnboundedReceiver<ControllerCommand>,
        mut dispatch_rx: UnboundedReceiver<Dispatch>,
    ) {
        loop {
            let poll_at = self.readiness.poll_deadline();
            let resize_at = self.resize.deadline();
            let loader_rx = &mut self.loader_rx;
            let applet_loaded_rx = &mut self.applet_loaded_rx;

            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ControllerCommand::Dispose) | None => break,
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                Some(dispatch) = dispatch_rx.recv() => {
                    debug!(index = dispatch.index, "staggered dispatch");
                    self.execute_command(&dispatch.command);
                }
                loaded = recv_signal(loader_rx) => {
                    self.loader_rx = None;
                    if loaded {
                        self.on_loader_loaded();
                    } else {
                        // Loader will never report completion; polling is the only way out.
                        debug!("loader completion signal dropped");
                    }
                }
                loaded = recv_signal(applet_loaded_rx) => {
                    self.applet_loaded_rx = None;
                    if loaded {
                        self.on_applet_loaded();
                    }
                }
                _ = sleep_until(poll_at) => {
                    self.on_poll_tick();
                }
                _ = sleep_until(resize_at) => {
                    if self.resize.fire(Instant::now()) {
                        self.sync_to_container();
                    }
                }
            }
        }

        self.readiness.cancel_poll();
        self.resize.cancel();
        info!("applet controller disposed");
    }

    fn handle_command(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::Initialize => self.initialize(),
            ControllerCommand::ExecuteCommand { command, reply } => {
                let _ = reply.send(self.execute_command(&command));
            }
            ControllerCommand::ExecuteCommands(commands) => self.execute_commands(commands),
            ControllerCommand::Reset(reply) => {
                let _ = reply.send(self.reset());
            }
            ControllerCommand::SetSize {
                width,
                height,
                reply,
            } => {
                let _ = reply.send(self.set_size(width, height));
            }
            ControllerCommand::NotifyResize => self.resize.signal(Instant::now()),
            ControllerCommand::LoadNewFile(update) => self.load_new_file(update),
            ControllerCommand::SaveNewFile(filename) => self.save_new_file(filename.as_deref()),
            ControllerCommand::State(reply) => {
                let _ = reply.send(self.readiness.state());
            }
            ControllerCommand::Configuration(reply) => {
                let _ = reply.send(self.load.clone());
            }
            ControllerCommand::Dispose => {}
        }
    }

    fn emit(&self, event: ControllerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn emit_state(&self) {
        self.emit(ControllerEvent::StateChanged {
            state: self.readiness.state(),
        });
    }

    fn initialize(&mut self) {
        if self.readiness.state() != ReadinessState::Uninitialized
            || self.readiness.is_latched()
            || self.host.loader_present()
        {
            debug!("initialize ignored: runtime acquisition already started");
            return;
        }
        info!(url = %self.cfg.loader_url, "requesting applet loader");
        self.loader_rx = Some(self.host.request_loader(&self.cfg.loader_url));
        self.readiness
            .begin_loading(Instant::now(), self.cfg.initial_poll_delay);
        if self.readiness.poll_deadline().is_none() {
            warn!(delay = ?self.cfg.initial_poll_delay, "initial poll delay out of range; polling disabled");
        }
        self.emit_state();
    }

    /// The runtime exists and exposes its resize operation.
    fn runtime_callable(&mut self) -> bool {
        self.host
            .applet()
            .map(|applet| applet.can_resize())
            .unwrap_or(false)
    }

    fn latch_ready(&mut self, source: ReadySource) {
        if self.readiness.latch() {
            info!(?source, "applet runtime ready");
            self.emit_state();
            self.emit(ControllerEvent::Ready { source });
        }
    }

    fn on_loader_loaded(&mut self) {
        debug!("applet loader finished loading");
        if let Err(e) = self.inject() {
            warn!(error = %e, "applet injection after loader completion failed");
        }
        if self.runtime_callable() {
            self.latch_ready(ReadySource::LoaderCallback);
        }
    }

    fn on_applet_loaded(&mut self) {
        if self.readiness.is_latched() {
            if self.readiness.reaffirm() {
                debug!("applet instance reloaded");
                self.emit_state();
            }
        } else {
            self.latch_ready(ReadySource::AppletLoaded);
        }
    }

    fn on_poll_tick(&mut self) {
        if self
            .readiness
            .poll_tick(Instant::now(), self.cfg.poll_interval)
        {
            self.emit_state();
        }
        if !self.readiness.is_latched() && self.runtime_callable() {
            self.latch_ready(ReadySource::Poll);
        }
    }

    fn inject(&mut self) -> Result<(), AppletError> {
        if !self.host.applet_class_available() {
            return Err(AppletError::RuntimeUnavailable);
        }
        let container = self.cfg.container_id.clone();
        if !self.host.container_exists(&container) {
            return Err(AppletError::ContainerMissing { container });
        }
        if self.has_instance || self.host.applet().is_some() {
            debug!(%container, "clearing previous applet instance");
            self.host.clear_container(&container);
        }

        let params = AppletParams::build(&self.cfg.locale, &self.load);
        let loaded_rx = self.host.inject(&container, &params).map_err(|e| {
            error!(error = %format!("{e:#}"), "host failed to construct applet");
            AppletError::RuntimeUnavailable
        })?;
        self.has_instance = true;
        self.applet_loaded_rx = Some(loaded_rx);
        info!(
            %container,
            filename = params.filename.as_deref().unwrap_or("-"),
            inline_document = params.document_bytes.is_some(),
            "applet injected"
        );
        self.emit(ControllerEvent::Injected { params });
        Ok(())
    }

    fn execute_command(&mut self, raw: &str) -> bool {
        let command = strip_comment(raw);
        let Some(applet) = self.host.applet() else {
            warn!(command, error = %AppletError::RuntimeUnavailable, "command not executed");
            return false;
        };
        let result = applet.eval_command(command);
        match result {
            Ok(()) => {
                debug!(command, "command evaluated");
                self.emit(ControllerEvent::CommandEvaluated {
                    command: command.to_string(),
                    ok: true,
                });
                true
            }
            Err(e) => {
                let err = AppletError::EvaluationFailure {
                    command: command.to_string(),
                    reason: format!("{e:#}"),
                };
                error!(error = %err, "command evaluation failed");
                self.emit(ControllerEvent::CommandEvaluated {
                    command: command.to_string(),
                    ok: false,
                });
                false
            }
        }
    }

    fn execute_commands(&mut self, commands: Vec<String>) {
        if self.host.applet().is_none() {
            warn!(error = %AppletError::RuntimeUnavailable, "command batch not executed");
            return;
        }
        if commands.is_empty() {
            warn!("command batch is empty");
            return;
        }

        self.reset();
        info!(count = commands.len(), "dispatching command batch");
        // Ordering comes from the offsets alone; a slow runtime may overlap evaluations.
        for (index, command) in commands.into_iter().enumerate() {
            let delay = dispatch_offset(index, self.cfg.command_spacing);
            let tx = self.dispatch_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Dispatch { index, command });
            });
        }
    }

    fn reset(&mut self) -> bool {
        let Some(applet) = self.host.applet() else {
            debug!("reset skipped: no applet instance");
            return false;
        };
        match applet.reset() {
            Ok(()) => {
                info!("applet reset");
                true
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "applet reset failed");
                false
            }
        }
    }

    fn set_size(&mut self, width: u32, height: u32) -> bool {
        let size = match self
            .sizing
            .decide(width, height, self.readiness.is_latched())
        {
            SizeDecision::Apply(size) => size,
            SizeDecision::Unchanged | SizeDecision::Rejected => return false,
        };
        let Some(applet) = self.host.applet() else {
            return false;
        };
        match applet.set_size(size.width, size.height) {
            Ok(()) => {
                let previous = self.sizing.last();
                self.sizing.commit(size);
                debug!(width, height, ?previous, "applet resized");
                self.emit(ControllerEvent::SizeApplied { size });
                true
            }
            Err(e) => {
                warn!(width, height, error = %format!("{e:#}"), "applet resize failed");
                false
            }
        }
    }

    fn sync_to_container(&mut self) {
        match self.host.container_size(&self.cfg.container_id) {
            Some((width, height)) => {
                self.set_size(width, height);
            }
            None => debug!(container = %self.cfg.container_id, "container size unavailable"),
        }
    }

    fn load_new_file(&mut self, update: LoadConfiguration) {
        if !self.readiness.is_latched() {
            warn!("load ignored: applet is not ready");
            self.emit(ControllerEvent::Warning(
                "Applet is not ready; load ignored".into(),
            ));
            return;
        }
        self.load.merge(update);
        // The current instance stays in place, and Ready, unless a new one was constructed.
        match self.inject() {
            Ok(()) => {
                self.readiness.begin_reinjection();
                self.emit_state();
            }
            Err(e) => warn!(error = %e, "applet reinjection failed"),
        }
    }

    fn save_new_file(&mut self, filename: Option<&str>) {
        if !self.readiness.is_latched() {
            warn!("save ignored: applet is not ready");
            self.emit(ControllerEvent::Warning(
                "Applet is not ready; save ignored".into(),
            ));
            return;
        }
        if !self.host.applet_class_available() {
            warn!(error = %AppletError::RuntimeUnavailable, "save ignored");
            return;
        }
        let Some(applet) = self.host.applet() else {
            warn!(error = %AppletError::RuntimeUnavailable, "save ignored");
            return;
        };

        let payload = applet
            .get_base64()
            .map_err(|e| AppletError::SerializationFailure {
                reason: format!("{e:#}"),
            })
            .and_then(|encoded| decode_payload(&encoded));
        let payload = match payload {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "save failed");
                return;
            }
        };

        let name = resolve_download_name(
            filename,
            &self.cfg.default_file_stem,
            &self.cfg.file_extension,
        );
        let bytes = payload.len();
        match self.host.download(&name, payload) {
            Ok(()) => {
                info!(filename = %name, bytes, "document saved");
                self.emit(ControllerEvent::Saved {
                    filename: name,
                    bytes,
                });
            }
            Err(e) => error!(filename = %name, error = %format!("{e:#}"), "download failed"),
        }
    }
}
