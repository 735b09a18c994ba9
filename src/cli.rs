use anyhow::{Context, Result};
use applet_lifecycle::headless::{ContainerLayout, HeadlessHost};
use applet_lifecycle::{spawn_controller, ControllerConfig, ControllerEvent, LoadConfiguration};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// What the console prints: replies to directives go to stdout, controller events to stderr
/// so that stdout stays scriptable.
enum ConsoleOutput {
    Reply(String),
    Event(ControllerEvent),
}

/// Spawn the console printer on a blocking thread; it exits when every sender is dropped.
fn spawn_console_printer() -> (
    mpsc::UnboundedSender<ConsoleOutput>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ConsoleOutput>();
    let handle = tokio::task::spawn_blocking(move || {
        let mut replies = std::io::LineWriter::new(std::io::stdout().lock());
        let mut events = std::io::LineWriter::new(std::io::stderr().lock());

        while let Some(output) = rx.blocking_recv() {
            let _ = match output {
                ConsoleOutput::Reply(msg) => writeln!(replies, "{msg}"),
                ConsoleOutput::Event(ev) => writeln!(events, "{}", ev.to_message()),
            };
        }

        let _ = replies.flush();
        let _ = events.flush();
    });
    (tx, handle)
}

/// Spawn a blocking stdin reader; the channel closes on EOF.
fn spawn_input_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    // Detached: a blocking read on stdin cannot be interrupted, so the thread is not joined.
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "applet-console",
    version,
    about = "Drive an embedded applet from the terminal"
)]
pub struct Cli {
    /// URL of the applet loader script
    #[arg(long, default_value = "https://www.geogebra.org/apps/deployggb.js")]
    pub loader_url: String,

    /// Name of the container element the applet is mounted into
    #[arg(long, default_value = "ggb-element")]
    pub container: String,

    /// Delay before the first readiness poll
    #[arg(long, default_value = "500ms")]
    pub initial_poll_delay: humantime::Duration,

    /// Interval between readiness polls
    #[arg(long, default_value = "100ms")]
    pub poll_interval: humantime::Duration,

    /// Quiet period before a resize is applied
    #[arg(long, default_value = "100ms")]
    pub resize_debounce: humantime::Duration,

    /// Spacing between commands of a batch
    #[arg(long, default_value = "100ms")]
    pub command_spacing: humantime::Duration,

    /// Applet locale
    #[arg(long, default_value = "en")]
    pub locale: String,

    /// JSON controller config; replaces the timing and naming flags above
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Document to open once the applet is ready
    #[arg(long)]
    pub open: Option<String>,

    /// Directory document filenames are resolved against
    #[arg(long, default_value = ".")]
    pub documents_dir: PathBuf,

    /// Directory saved documents are written to (defaults to the user's download directory)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Initial container width
    #[arg(long, default_value_t = 800)]
    pub width: u32,

    /// Initial container height
    #[arg(long, default_value_t = 600)]
    pub height: u32,

    /// Simulated loader latency of the headless runtime
    #[arg(long, default_value = "200ms")]
    pub loader_latency: humantime::Duration,

    /// Simulated time for the headless applet to become callable
    #[arg(long, default_value = "0ms")]
    pub boot_delay: humantime::Duration,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    pub log_level: tracing::Level,
}

/// Build a `ControllerConfig` from CLI arguments, or from `--config` when given.
pub fn build_config(args: &Cli) -> Result<ControllerConfig> {
    if let Some(path) = args.config.as_deref() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()));
    }
    Ok(ControllerConfig {
        loader_url: args.loader_url.clone(),
        container_id: args.container.clone(),
        initial_poll_delay: Duration::from(args.initial_poll_delay),
        poll_interval: Duration::from(args.poll_interval),
        resize_debounce: Duration::from(args.resize_debounce),
        command_spacing: Duration::from(args.command_spacing),
        locale: args.locale.clone(),
        ..ControllerConfig::default()
    })
}

/// A line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleLine {
    Command(String),
    BeginBatch,
    EndBatch,
    Reset,
    Size(u32, u32),
    Resize(u32, u32),
    Open(String),
    OpenInline(String),
    Save(Option<String>),
    State,
    Help,
    Quit,
    Invalid(String),
}

fn parse_dimensions(rest: &str) -> Option<(u32, u32)> {
    let mut parts = rest.split_whitespace();
    let w = parts.next()?.parse().ok()?;
    let h = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((w, h))
}

fn parse_console_line(line: &str) -> ConsoleLine {
    let trimmed = line.trim();
    let Some(directive) = trimmed.strip_prefix(':') else {
        return ConsoleLine::Command(line.to_string());
    };
    let (name, rest) = directive
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((directive, ""));
    match name {
        "batch" => ConsoleLine::BeginBatch,
        "end" => ConsoleLine::EndBatch,
        "reset" => ConsoleLine::Reset,
        "size" => parse_dimensions(rest)
            .map(|(w, h)| ConsoleLine::Size(w, h))
            .unwrap_or_else(|| ConsoleLine::Invalid("usage: :size WIDTH HEIGHT".into())),
        "resize" => parse_dimensions(rest)
            .map(|(w, h)| ConsoleLine::Resize(w, h))
            .unwrap_or_else(|| ConsoleLine::Invalid("usage: :resize WIDTH HEIGHT".into())),
        "open" if !rest.is_empty() => ConsoleLine::Open(rest.to_string()),
        "open-inline" if !rest.is_empty() => ConsoleLine::OpenInline(rest.to_string()),
        "open" | "open-inline" => ConsoleLine::Invalid(format!("usage: :{name} SOURCE")),
        "save" => ConsoleLine::Save((!rest.is_empty()).then(|| rest.to_string())),
        "state" => ConsoleLine::State,
        "help" => ConsoleLine::Help,
        "quit" | "exit" => ConsoleLine::Quit,
        other => ConsoleLine::Invalid(format!("unknown directive :{other} (try :help)")),
    }
}

fn describe_source(cfg: &LoadConfiguration) -> String {
    if cfg.is_empty() {
        return "no document loaded".to_string();
    }
    format!(
        "file: {}, inline document: {}",
        cfg.filename.as_deref().unwrap_or("-"),
        cfg.document_bytes.is_some()
    )
}

const HELP: &str = "\
Plain lines are evaluated as applet commands.
  :batch ... :end    run the enclosed lines as a batch (resets first)
  :reset             reset the applet
  :size W H          set the applet size directly
  :resize W H        resize the container and let the controller follow
  :open FILE         reopen the applet with a document file
  :open-inline B64   reopen the applet with an inline base64 document
  :save [NAME]       download the current document
  :state             show readiness
  :quit              exit";

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    let layout = ContainerLayout::new(args.width, args.height);
    let mut host = HeadlessHost::new(cfg.container_id.clone(), layout.clone())
        .with_loader_latency(Duration::from(args.loader_latency))
        .with_boot_delay(Duration::from(args.boot_delay))
        .with_documents_dir(args.documents_dir.clone());
    if let Some(dir) = args.output_dir.clone() {
        host = host.with_download_dir(dir);
    }

    let (out_tx, out_handle) = spawn_console_printer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<ControllerEvent>();
    let (handle, controller_task) = spawn_controller(cfg, host, Some(evt_tx));

    let evt_out = out_tx.clone();
    let event_printer = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            let _ = evt_out.send(ConsoleOutput::Event(ev));
        }
    });

    handle.initialize();

    let startup = {
        let handle = handle.clone();
        let open = args.open.clone();
        let width = args.width;
        let height = args.height;
        tokio::spawn(async move {
            if !handle.wait_until_ready().await {
                return;
            }
            handle.set_size(width, height).await;
            if let Some(filename) = open {
                handle.load_new_file(LoadConfiguration::from_filename(filename));
            }
        })
    };

    let mut input = spawn_input_reader();
    let mut batch: Option<Vec<String>> = None;

    loop {
        let line = tokio::select! {
            line = input.recv() => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let parsed = parse_console_line(&line);
        if let Some(lines) = batch.as_mut() {
            match parsed {
                ConsoleLine::EndBatch => {
                    let text = lines.join("\n");
                    batch = None;
                    handle.execute_command_block(&text);
                }
                _ => lines.push(line),
            }
            continue;
        }

        match parsed {
            ConsoleLine::Command(cmd) => {
                if cmd.trim().is_empty() {
                    continue;
                }
                if !handle.execute_command(cmd).await {
                    let _ = out_tx.send(ConsoleOutput::Reply("error".into()));
                }
            }
            ConsoleLine::BeginBatch => batch = Some(Vec::new()),
            ConsoleLine::EndBatch => {
                let _ = out_tx.send(ConsoleOutput::Reply(":end without :batch".into()));
            }
            ConsoleLine::Reset => {
                let ok = handle.reset().await;
                let _ = out_tx.send(ConsoleOutput::Reply(format!("reset: {ok}")));
            }
            ConsoleLine::Size(w, h) => {
                let ok = handle.set_size(w, h).await;
                let _ = out_tx.send(ConsoleOutput::Reply(format!("size {w}x{h}: {ok}")));
            }
            ConsoleLine::Resize(w, h) => {
                layout.set(w, h);
                handle.notify_resize();
            }
            ConsoleLine::Open(filename) => {
                handle.load_new_file(LoadConfiguration::from_filename(filename));
            }
            ConsoleLine::OpenInline(encoded) => {
                handle.load_new_file(LoadConfiguration::from_document_bytes(encoded));
            }
            ConsoleLine::Save(name) => handle.save_new_file(name),
            ConsoleLine::State => {
                let state = handle.readiness_state().await;
                let cfg = handle.current_configuration().await;
                let _ = out_tx.send(ConsoleOutput::Reply(format!(
                    "state: {state:?}, ready: {}, {}",
                    handle.is_ready(),
                    describe_source(&cfg)
                )));
            }
            ConsoleLine::Help => {
                let _ = out_tx.send(ConsoleOutput::Reply(HELP.to_string()));
            }
            ConsoleLine::Quit => break,
            ConsoleLine::Invalid(msg) => {
                let _ = out_tx.send(ConsoleOutput::Reply(msg));
            }
        }
    }

    // Let the last state query act as a barrier for fire-and-forget requests like :save.
    let _ = handle.readiness_state().await;
    startup.abort();
    handle.dispose();
    drop(handle);
    let _ = controller_task.await;
    let _ = event_printer.await;
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_commands() {
        assert_eq!(
            parse_console_line("A = (1, 2) // origin"),
            ConsoleLine::Command("A = (1, 2) // origin".into())
        );
    }

    #[test]
    fn directives_are_parsed() {
        assert_eq!(parse_console_line(":batch"), ConsoleLine::BeginBatch);
        assert_eq!(parse_console_line("  :size 640 480 "), ConsoleLine::Size(640, 480));
        assert_eq!(parse_console_line(":resize 10 20"), ConsoleLine::Resize(10, 20));
        assert_eq!(parse_console_line(":save"), ConsoleLine::Save(None));
        assert_eq!(
            parse_console_line(":save model"),
            ConsoleLine::Save(Some("model".into()))
        );
        assert_eq!(
            parse_console_line(":open circles.ggb"),
            ConsoleLine::Open("circles.ggb".into())
        );
    }

    #[test]
    fn malformed_directives_are_invalid() {
        assert!(matches!(parse_console_line(":size 640"), ConsoleLine::Invalid(_)));
        assert!(matches!(parse_console_line(":size a b"), ConsoleLine::Invalid(_)));
        assert!(matches!(parse_console_line(":open"), ConsoleLine::Invalid(_)));
        assert!(matches!(parse_console_line(":frobnicate"), ConsoleLine::Invalid(_)));
    }

    #[test]
    fn state_line_describes_document_source() {
        assert_eq!(describe_source(&LoadConfiguration::default()), "no document loaded");
        assert_eq!(
            describe_source(&LoadConfiguration::from_filename("x.ggb")),
            "file: x.ggb, inline document: false"
        );
    }

    #[test]
    fn config_flags_map_to_controller_config() {
        let args = Cli::parse_from(["applet-console", "--poll-interval", "250ms", "--locale", "fr"]);
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.initial_poll_delay, Duration::from_millis(500));
        assert_eq!(cfg.locale, "fr");
        assert_eq!(cfg.container_id, "ggb-element");
    }
}
