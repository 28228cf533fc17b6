//! Logging context
//!
//! One context is built at startup and handed to the components that need to
//! steer diagnostics. It owns the subscriber's reloadable filter and the
//! destination of formatted output, so changing level or moving logs into a
//! campaign directory are explicit calls instead of global logger mutation.

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// File name used when logs are redirected into a directory
pub const LOG_FILE_NAME: &str = "pipeline.log";

enum LogRoute {
    Console,
    File { path: PathBuf, file: File },
}

/// Handle for runtime control of the process logging setup
#[derive(Clone)]
pub struct LogContext {
    filter: reload::Handle<EnvFilter, Registry>,
    route: Arc<Mutex<LogRoute>>,
}

impl LogContext {
    /// Build a context and the subscriber it controls without installing it
    ///
    /// `RUST_LOG` takes precedence over `config.level`. Tests install the returned
    /// subscriber with `tracing::subscriber::with_default`.
    pub fn build(
        config: &LoggingConfig,
    ) -> Result<(LogContext, impl Subscriber + Send + Sync + 'static)> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => parse_filter(&config.level)?,
        };
        let (filter_layer, filter_handle) = reload::Layer::new(filter);

        let route = Arc::new(Mutex::new(LogRoute::Console));
        let context = LogContext {
            filter: filter_handle,
            route: Arc::clone(&route),
        };

        if let Some(path) = &config.file {
            context.redirect_to_file(path)?;
        }

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(RoutedWriter { route });

        let subscriber = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer);

        Ok((context, subscriber))
    }

    /// Build a context and install its subscriber as the global default
    pub fn init(config: &LoggingConfig) -> Result<LogContext> {
        let (context, subscriber) = Self::build(config)?;
        subscriber
            .try_init()
            .map_err(|e| Error::Config(format!("Logging already initialized: {}", e)))?;
        Ok(context)
    }

    /// Replace the active filter (e.g. "debug" or "sfg_pipeline=trace,sqlx=warn")
    pub fn set_level(&self, directive: &str) -> Result<()> {
        let filter = parse_filter(directive)?;
        self.filter
            .reload(filter)
            .map_err(|e| Error::Internal(format!("Failed to reload log filter: {}", e)))
    }

    /// Append all subsequent output to `<dir>/pipeline.log`
    ///
    /// Returns the full path of the log file.
    pub fn redirect_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);
        self.redirect_to_file(&path)?;
        Ok(path)
    }

    /// Append all subsequent output to the given file
    pub fn redirect_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.lock_route() = LogRoute::File {
            path: path.to_path_buf(),
            file,
        };
        Ok(())
    }

    /// Send subsequent output back to stderr
    pub fn route_to_console(&self) {
        *self.lock_route() = LogRoute::Console;
    }

    /// Path of the current log file, or `None` while logging to the console
    pub fn current_log_file(&self) -> Option<PathBuf> {
        match &*self.lock_route() {
            LogRoute::Console => None,
            LogRoute::File { path, .. } => Some(path.clone()),
        }
    }

    fn lock_route(&self) -> MutexGuard<'_, LogRoute> {
        lock(&self.route)
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", directive, e)))
}

fn lock(route: &Mutex<LogRoute>) -> MutexGuard<'_, LogRoute> {
    // A panic while writing a log line leaves the route itself intact
    route.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `MakeWriter` that forwards to whichever destination is currently selected
#[derive(Clone)]
struct RoutedWriter {
    route: Arc<Mutex<LogRoute>>,
}

impl<'a> MakeWriter<'a> for RoutedWriter {
    type Writer = RoutedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for RoutedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut *lock(&self.route) {
            LogRoute::Console => std::io::stderr().write(buf),
            LogRoute::File { file, .. } => file.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut *lock(&self.route) {
            LogRoute::Console => std::io::stderr().flush(),
            LogRoute::File { file, .. } => file.flush(),
        }
    }
}
