use std::path::{Path, PathBuf};
use clap::{Parser, ValueEnum};
use regex::Regex;
use crate::config::WatcherConfig;
use crate::events::WatchMask;

#[derive(Parser)]
#[command(name = "inwatch")]
#[command(version)]
#[command(about = "Stream filesystem change notifications from inotify")]
#[command(long_about = "inwatch registers inotify watches on the given paths and prints every change notification until interrupted. Only the listed paths are watched, not their descendants.")]
pub struct Cli {
    /// Paths to watch
    #[arg(value_name = "PATH", help = "Paths to watch (defaults to current directory)")]
    pub paths: Vec<PathBuf>,

    /// Event kinds to subscribe to
    #[arg(short, long, value_delimiter = ',', help = "Event kinds to watch (e.g., create,delete)")]
    pub events: Option<Vec<EventKind>>,

    /// Only print events whose full path matches this pattern
    #[arg(long, help = "Regex filter applied to event paths")]
    pub filter: Option<String>,

    /// Output format
    #[arg(long, default_value = "text", help = "Output format")]
    pub output: OutputFormat,

    /// Configuration file
    #[arg(long, help = "TOML file with watcher settings")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Disable colors in output
    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventKind {
    Access,
    Modify,
    Attrib,
    Open,
    Close,
    Create,
    Delete,
    Move,
    /// Deletion or move of a watched path itself
    SelfChange,
    All,
}

impl EventKind {
    pub fn mask(self) -> WatchMask {
        match self {
            EventKind::Access => WatchMask::ACCESS,
            EventKind::Modify => WatchMask::MODIFY,
            EventKind::Attrib => WatchMask::ATTRIB,
            EventKind::Open => WatchMask::OPEN,
            EventKind::Close => WatchMask::CLOSE,
            EventKind::Create => WatchMask::CREATE,
            EventKind::Delete => WatchMask::DELETE,
            EventKind::Move => WatchMask::MOVE,
            EventKind::SelfChange => WatchMask::DELETE_SELF | WatchMask::MOVE_SELF,
            EventKind::All => WatchMask::ALL_EVENTS,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    Text,
    /// JSON lines for scripting
    Json,
    /// Compact single-line format
    Compact,
}

impl Cli {
    pub fn get_watch_paths(&self) -> Vec<PathBuf> {
        if self.paths.is_empty() {
            vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))]
        } else {
            self.paths.clone()
        }
    }

    pub fn watch_mask(&self) -> WatchMask {
        match &self.events {
            Some(kinds) => kinds
                .iter()
                .fold(WatchMask::empty(), |mask, kind| mask | kind.mask()),
            None => WatchMask::ALL_EVENTS,
        }
    }

    pub fn path_filter(&self) -> Result<Option<Regex>, regex::Error> {
        self.filter.as_deref().map(Regex::new).transpose()
    }

    pub fn should_print(filter: Option<&Regex>, path: &Path) -> bool {
        match filter {
            Some(re) => re.is_match(&path.to_string_lossy()),
            None => true,
        }
    }

    pub fn load_config(&self) -> anyhow::Result<WatcherConfig> {
        let config = match &self.config {
            Some(path) => WatcherConfig::load(path)?,
            None => WatcherConfig::default(),
        };
        Ok(config.with_env_overrides())
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .init();
    }

    pub fn validate(&self) -> Result<(), String> {
        for path in self.get_watch_paths() {
            if !path.exists() {
                return Err(format!("Path does not exist: {}", path.display()));
            }
        }

        if self.watch_mask().is_empty() {
            return Err("At least one event kind must be selected".to_string());
        }

        if let Err(err) = self.path_filter() {
            return Err(format!("Invalid filter: {}", err));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_kinds() {
        let cli = Cli::parse_from(["inwatch", "--events", "create,delete", "/tmp"]);

        assert_eq!(cli.paths, vec![PathBuf::from("/tmp")]);
        assert_eq!(cli.watch_mask(), WatchMask::CREATE | WatchMask::DELETE);
    }

    #[test]
    fn test_default_mask_is_all_events() {
        let cli = Cli::parse_from(["inwatch"]);
        assert_eq!(cli.watch_mask(), WatchMask::ALL_EVENTS);
        assert_eq!(cli.get_watch_paths().len(), 1);
    }

    #[test]
    fn test_filter() {
        let cli = Cli::parse_from(["inwatch", "--filter", r"\.rs$"]);
        let filter = cli.path_filter().unwrap();

        assert!(Cli::should_print(filter.as_ref(), Path::new("/src/main.rs")));
        assert!(!Cli::should_print(filter.as_ref(), Path::new("/src/main.py")));
        assert!(Cli::should_print(None, Path::new("/anything")));
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let cli = Cli::parse_from(["inwatch", "/definitely/not/here"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from(["inwatch", "--filter", "(", "/tmp"]);
        assert!(cli.validate().is_err());
    }
}
