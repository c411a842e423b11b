use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Config, Level};

/// Destination for operator-facing alerts (the proxy's alert pane).
pub trait AlertSink: Send + Sync {
    fn issue_alert(&self, message: &str);
}

/// Sink used when the host offers no alert channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlerts;

impl AlertSink for TracingAlerts {
    fn issue_alert(&self, message: &str) {
        warn!(target: "berserko::alert", "{message}");
    }
}

/// Routes messages to the alert sink and the log, honouring the configured levels.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn AlertSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }

    pub fn alert(&self, config: &Config, level: Level, message: &str) {
        if level != Level::None && config.alert_level >= level {
            self.sink.issue_alert(message);
        }
    }

    pub fn log(&self, config: &Config, level: Level, message: &str) {
        if level == Level::None || config.log_level < level {
            return;
        }

        match level {
            Level::Verbose => debug!(target: "berserko", "{message}"),
            _ => info!(target: "berserko", "{message}"),
        }
    }

    pub fn alert_and_log(&self, config: &Config, level: Level, message: &str) {
        self.alert(config, level, message);
        self.log(config, level, message);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(Arc::new(TracingAlerts))
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
