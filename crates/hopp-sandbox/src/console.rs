//! `console.*` capture.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Console method a script called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    /// `console.log`
    Log,
    /// `console.info`
    Info,
    /// `console.warn`
    Warn,
    /// `console.error`
    Error,
    /// `console.debug`
    Debug,
}

impl std::str::FromStr for ConsoleLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(ConsoleLevel::Log),
            "info" => Ok(ConsoleLevel::Info),
            "warn" => Ok(ConsoleLevel::Warn),
            "error" => Ok(ConsoleLevel::Error),
            "debug" => Ok(ConsoleLevel::Debug),
            other => Err(format!("unknown console level '{other}'")),
        }
    }
}

/// One console call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    /// Method used.
    pub level: ConsoleLevel,
    /// Arguments, as plain JSON.
    pub args: Vec<serde_json::Value>,
    /// When the call happened.
    pub timestamp: DateTime<Utc>,
}

/// Console entries for one run, capped at `max_entries`.
#[derive(Debug, Default)]
pub struct ConsoleLog {
    entries: Vec<ConsoleEntry>,
    max_entries: usize,
    dropped: usize,
}

impl ConsoleLog {
    /// Create a log that keeps at most `max_entries`.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
            dropped: 0,
        }
    }

    /// Record a call and mirror it into `tracing`.
    pub fn push(&mut self, level: ConsoleLevel, args: Vec<serde_json::Value>) {
        let line = args
            .iter()
            .map(|a| match a {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        match level {
            ConsoleLevel::Error => tracing::warn!(target: "hopp::sandbox::js", "{}", line),
            ConsoleLevel::Warn => tracing::warn!(target: "hopp::sandbox::js", "{}", line),
            ConsoleLevel::Debug => tracing::debug!(target: "hopp::sandbox::js", "{}", line),
            ConsoleLevel::Log | ConsoleLevel::Info => {
                tracing::info!(target: "hopp::sandbox::js", "{}", line)
            }
        }

        if self.entries.len() >= self.max_entries {
            self.dropped += 1;
            return;
        }
        self.entries.push(ConsoleEntry {
            level,
            args,
            timestamp: Utc::now(),
        });
    }

    /// Entries beyond the cap that were not kept.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Move the entries out.
    pub fn into_entries(self) -> Vec<ConsoleEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_entries_up_to_cap() {
        let mut log = ConsoleLog::new(2);
        log.push(ConsoleLevel::Log, vec![json!("a")]);
        log.push(ConsoleLevel::Warn, vec![json!(1), json!({ "k": true })]);
        log.push(ConsoleLevel::Error, vec![json!("dropped")]);
        assert_eq!(log.dropped(), 1);
        let entries = log.into_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].level, ConsoleLevel::Warn);
        assert_eq!(entries[1].args[1], json!({ "k": true }));
    }

    #[test]
    fn level_parses_method_names() {
        assert_eq!("debug".parse::<ConsoleLevel>().unwrap(), ConsoleLevel::Debug);
        assert!("trace".parse::<ConsoleLevel>().is_err());
    }
}
