use std::sync::Arc;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use crossbeam_channel::select;
use regex::Regex;
use serde::Serialize;

use inwatch::{
    cli::{Cli, OutputFormat},
    Event, EventMask, Watcher,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = cli.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    cli.setup_logging();

    let config = cli.load_config()?;
    let filter = cli.path_filter()?;
    let mask = cli.watch_mask();

    let watcher = Arc::new(Watcher::with_config(config).context("Failed to create inotify watcher")?);
    for path in cli.get_watch_paths() {
        watcher
            .add_watch(&path, mask)
            .with_context(|| format!("Failed to watch {}", path.display()))?;
        tracing::info!("Watching {}", path.display());
    }

    let w = Arc::clone(&watcher);
    ctrlc::set_handler(move || {
        w.close();
    })?;

    if matches!(cli.output, OutputFormat::Text) {
        println!("Press Ctrl+C to quit");
        println!("---");
    }

    run(&cli, &watcher, filter.as_ref())
}

/// Prints events until both streams end.
fn run(cli: &Cli, watcher: &Watcher, filter: Option<&Regex>) -> Result<()> {
    let mut events = Some(watcher.events().clone());
    let mut errors = Some(watcher.errors().clone());

    while events.is_some() || errors.is_some() {
        let events_rx = events.clone().unwrap_or_else(crossbeam_channel::never);
        let errors_rx = errors.clone().unwrap_or_else(crossbeam_channel::never);

        select! {
            recv(events_rx) -> msg => match msg {
                Ok(event) => {
                    if Cli::should_print(filter, &event.full_path()) {
                        print_event(&event, cli)?;
                    }
                }
                Err(_) => events = None,
            },
            recv(errors_rx) -> msg => match msg {
                Ok(err) => tracing::error!("Watcher error: {}", err),
                Err(_) => errors = None,
            },
        }
    }

    tracing::info!("Watcher closed");
    Ok(())
}

fn print_event(event: &Event, cli: &Cli) -> Result<()> {
    match cli.output {
        OutputFormat::Json => println!("{}", serde_json::to_string(&JsonEvent::from(event))?),
        OutputFormat::Text => print_text_event(event, cli),
        OutputFormat::Compact => print_compact_event(event),
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonEvent {
    timestamp: String,
    path: String,
    name: Option<String>,
    mask: EventMask,
    cookie: u32,
}

impl From<&Event> for JsonEvent {
    fn from(event: &Event) -> Self {
        Self {
            timestamp: DateTime::<Local>::from(event.timestamp).to_rfc3339(),
            path: event.path.to_string_lossy().into_owned(),
            name: event.name.as_ref().map(|n| n.to_string_lossy().into_owned()),
            mask: event.mask,
            cookie: event.cookie,
        }
    }
}

fn print_text_event(event: &Event, cli: &Cli) {
    let time_str = DateTime::<Local>::from(event.timestamp).format("%H:%M:%S");

    let color = if event.is_create() {
        "\x1b[32m" // Green
    } else if event.mask.intersects(EventMask::DELETE | EventMask::DELETE_SELF) {
        "\x1b[31m" // Red
    } else if event.is_rename() {
        "\x1b[34m" // Blue
    } else if event.is_ignored() {
        "\x1b[90m" // Grey
    } else {
        "\x1b[33m" // Yellow
    };

    let cookie = if event.cookie != 0 {
        format!(" (cookie {})", event.cookie)
    } else {
        String::new()
    };

    if cli.no_color {
        println!("[{}] {} {}{}", time_str, event.mask, event.full_path().display(), cookie);
    } else {
        println!(
            "[{}] {}{}\x1b[0m {}{}",
            time_str,
            color,
            event.mask,
            event.full_path().display(),
            cookie
        );
    }
}

fn print_compact_event(event: &Event) {
    let event_type = if event.is_create() {
        "C"
    } else if event.is_modify() {
        "M"
    } else if event.mask.intersects(EventMask::DELETE | EventMask::DELETE_SELF) {
        "D"
    } else if event.is_rename() || event.mask.contains(EventMask::MOVE_SELF) {
        "V"
    } else if event.is_ignored() {
        "X"
    } else {
        "-"
    };

    println!("{} {}", event_type, event.full_path().display());
}
