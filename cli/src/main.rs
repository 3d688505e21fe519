//! noverify-bridge - Terminal host for the NoVerify language server.
//!
//! The binary wires a [`LifecycleController`] to the surrounding system:
//!
//! 1. Load settings and start a session if the server is enabled.
//! 2. Watch the workspace for PHP edits and forward them to the server.
//! 3. Watch the settings file; on a relevant change, print the restart
//!    prompt and apply it when the user accepts.
//! 4. Read commands from stdin (`restart`, `diags`, `log`, `quit`, ...)
//!    and print diagnostics as they arrive.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use noverify_lsp::settings::{SERVER_NAME, Settings};
use noverify_lsp::{LifecycleController, Notice, RestartPrompt, SettingsChange, StartOutcome};

const DEBOUNCE: Duration = Duration::from_millis(300);
const POLL_PERIOD: Duration = Duration::from_millis(100);
const EVENT_BUDGET: usize = 32;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Options {
    settings_path: PathBuf,
    workspace_root: PathBuf,
}

impl Options {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut settings_path = None;
        let mut workspace_root = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--settings" => {
                    let value = args.next().context("--settings requires a path")?;
                    settings_path = Some(PathBuf::from(value));
                }
                "--workspace" => {
                    let value = args.next().context("--workspace requires a path")?;
                    workspace_root = Some(PathBuf::from(value));
                }
                "--help" | "-h" => {
                    println!("{USAGE}");
                    std::process::exit(0);
                }
                other => bail!("unknown argument {other:?}\n{USAGE}"),
            }
        }

        let settings_path = match settings_path {
            Some(path) => path,
            None => Settings::default_path().context("no user config directory available")?,
        };
        let workspace_root = match workspace_root {
            Some(path) => path,
            None => env::current_dir().context("cannot resolve current directory")?,
        };

        Ok(Self {
            settings_path,
            workspace_root,
        })
    }
}

const USAGE: &str = "\
Usage: noverify-bridge [--settings <file>] [--workspace <dir>]

Commands on stdin:
  restart                        restart the language server
  diags                          print current diagnostics
  log                            print the server output channel
  complete <file> <line> <col>   request completions at a position
  links <file>                   request document links
  quit                           shut down and exit";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let options = Options::parse(env::args().skip(1))?;
    let install_dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    tracing::info!(
        settings = %options.settings_path.display(),
        workspace = %options.workspace_root.display(),
        "Starting bridge"
    );

    let mut settings = Settings::load(&options.settings_path)?;
    let mut controller = LifecycleController::new(
        options.settings_path.clone(),
        install_dir,
        options.workspace_root.clone(),
    );

    match controller.restart().await {
        Ok(StartOutcome::Started) => println!("{SERVER_NAME} started"),
        Ok(StartOutcome::NotStarted) => {
            println!("{SERVER_NAME} is disabled; enable useLanguageServer to start it");
        }
        Err(err) => tracing::error!("Failed to start language server: {err:#}"),
    }

    let (fs_tx, mut fs_rx) = mpsc::channel::<Vec<PathBuf>>(32);
    let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
        if let Ok(events) = result {
            let paths = events.into_iter().map(|event| event.path).collect();
            fs_tx.blocking_send(paths).ok();
        }
    })
    .context("failed to create file watcher")?;

    debouncer
        .watcher()
        .watch(&options.workspace_root, RecursiveMode::Recursive)
        .with_context(|| format!("cannot watch {}", options.workspace_root.display()))?;
    if let Some(settings_dir) = options.settings_path.parent()
        && let Err(err) = debouncer
            .watcher()
            .watch(settings_dir, RecursiveMode::NonRecursive)
    {
        tracing::warn!(dir = %settings_dir.display(), "Not watching settings dir: {err}");
    }

    let (line_tx, mut line_rx) = mpsc::channel::<String>(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut pending_prompt: Option<RestartPrompt> = None;
    let mut poll = tokio::time::interval(POLL_PERIOD);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if controller.poll_events(EVENT_BUDGET) > 0 {
                    print_diagnostics(&controller);
                }
                while let Some(Notice::Error(message)) = controller.take_notice() {
                    eprintln!("error: {message}");
                }
            }

            Some(paths) = fs_rx.recv() => {
                for path in paths {
                    if path == options.settings_path {
                        handle_settings_change(
                            &mut controller,
                            &options.settings_path,
                            &mut settings,
                            &mut pending_prompt,
                        );
                    } else if let Err(err) = forward_edit(&mut controller, &path).await {
                        tracing::warn!(path = %path.display(), "Failed to forward edit: {err:#}");
                    }
                }
            }

            line = line_rx.recv() => {
                let Some(line) = line else { break };
                if !handle_command(&mut controller, line.trim(), &mut pending_prompt).await {
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}

fn handle_settings_change(
    controller: &mut LifecycleController,
    settings_path: &Path,
    settings: &mut Settings,
    pending_prompt: &mut Option<RestartPrompt>,
) {
    let new = match Settings::load(settings_path) {
        Ok(new) => new,
        Err(err) => {
            tracing::warn!("Ignoring settings change: {err:#}");
            return;
        }
    };

    let change = SettingsChange::between(settings, &new);
    if change.is_empty() {
        return;
    }

    if let Some(prompt) = controller.on_configuration_changed(&change, &new) {
        println!("{} [{}/n]", prompt.message, prompt.button);
        *pending_prompt = Some(prompt);
    }
    *settings = new;
}

async fn forward_edit(controller: &mut LifecycleController, path: &Path) -> Result<()> {
    if path.extension().is_none_or(|ext| ext != "php") || !path.is_file() {
        return Ok(());
    }
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    controller.notify_document_changed(path, &text).await
}

/// Handle one stdin command. Returns false when the loop should exit.
async fn handle_command(
    controller: &mut LifecycleController,
    line: &str,
    pending_prompt: &mut Option<RestartPrompt>,
) -> bool {
    // An outstanding prompt consumes the next line: its button label or
    // a plain "y" accepts, anything else dismisses.
    if let Some(prompt) = pending_prompt.take() {
        if line.eq_ignore_ascii_case(&prompt.button) || line.eq_ignore_ascii_case("y") {
            apply_restart(controller).await;
            return true;
        }
        if line.is_empty() || line.eq_ignore_ascii_case("n") {
            println!("dismissed");
            return true;
        }
        // Not an answer; fall through and treat it as a command.
    }

    let mut words = line.split_whitespace();
    match words.next() {
        None => {}
        Some("quit" | "exit") => return false,
        Some("restart") => apply_restart(controller).await,
        Some("diags") => print_diagnostics(controller),
        Some("log") => {
            for line in controller.output().lines() {
                println!("{line}");
            }
        }
        Some("complete") => {
            let (Some(file), Some(line_no), Some(col)) =
                (words.next(), words.next(), words.next())
            else {
                println!("usage: complete <file> <line> <col>");
                return true;
            };
            let (Ok(line_no), Ok(col)) = (line_no.parse(), col.parse()) else {
                println!("usage: complete <file> <line> <col>");
                return true;
            };
            match controller.completion(Path::new(file), line_no, col).await {
                Ok(Some(reply)) => {
                    for item in reply.items() {
                        println!("{}", item.label);
                    }
                }
                Ok(None) => println!("no completions"),
                Err(err) => tracing::warn!("Completion failed: {err:#}"),
            }
        }
        Some("links") => {
            let Some(file) = words.next() else {
                println!("usage: links <file>");
                return true;
            };
            match controller.document_links(Path::new(file)).await {
                Ok(Some(links)) => println!("{links}"),
                Ok(None) => println!("no links"),
                Err(err) => tracing::warn!("Document links failed: {err:#}"),
            }
        }
        Some(other) => println!("unknown command {other:?}\n{USAGE}"),
    }
    true
}

async fn apply_restart(controller: &mut LifecycleController) {
    match controller.restart().await {
        Ok(StartOutcome::Started) => println!("{SERVER_NAME} started"),
        Ok(StartOutcome::NotStarted) => println!("{SERVER_NAME} stopped"),
        Err(err) => tracing::error!("Restart failed: {err:#}"),
    }
}

fn print_diagnostics(controller: &LifecycleController) {
    let snapshot = controller.snapshot();
    if snapshot.is_empty() {
        println!("no diagnostics");
        return;
    }
    for (uri, items) in snapshot.entries() {
        for item in items {
            println!("{}", item.display_with_uri(uri));
        }
    }
    println!(
        "{} issue(s): {} error(s), {} warning(s)",
        snapshot.total_count(),
        snapshot.error_count(),
        snapshot.warning_count(),
    );
}
