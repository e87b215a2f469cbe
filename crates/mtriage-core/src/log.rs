//! Phase-tagged module logs
//!
//! Loggers push formatted lines onto a channel shared by every worker of a
//! module. The module drains the channel into `{base}/logs/{module}.txt` once
//! per phase. Every line is mirrored to `tracing`.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{error, info};

/// Width of the rule that frames error entries
pub const ERROR_RULE_WIDTH: usize = 77;

/// Cloneable handle that tags lines with `{module}: {phase}: `
#[derive(Debug, Clone)]
pub struct Logger {
    module: Arc<str>,
    phase: Arc<str>,
    tx: Sender<String>,
}

impl Logger {
    fn prefix(&self, element: Option<&str>) -> String {
        match element {
            Some(id) => format!("{}: {}: {}: ", self.module, self.phase, id),
            None => format!("{}: {}: ", self.module, self.phase),
        }
    }

    fn send(&self, line: String) {
        // The receiver lives as long as the owning module
        let _ = self.tx.send(line);
    }

    pub fn log(&self, msg: impl Display) {
        let line = format!("{}{}", self.prefix(None), msg);
        info!("{}", line);
        self.send(line);
    }

    /// Log a line about a specific element
    pub fn log_for(&self, element: &str, msg: impl Display) {
        let line = format!("{}{}", self.prefix(Some(element)), msg);
        info!("{}", line);
        self.send(line);
    }

    pub fn error(&self, msg: impl Display) {
        self.send_error(None, msg);
    }

    pub fn error_for(&self, element: &str, msg: impl Display) {
        self.send_error(Some(element), msg);
    }

    fn send_error(&self, element: Option<&str>, msg: impl Display) {
        let context = self.prefix(element);
        error!("{}{}", context, msg);
        self.send(frame_error(&context, &msg.to_string()));
    }

    /// A logger writing to the same log under another module's name
    pub fn for_module(&self, module: &str) -> Logger {
        Logger {
            module: Arc::from(module),
            phase: Arc::clone(&self.phase),
            tx: self.tx.clone(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }
}

/// Frame an error as a blank line, a rule, the message, a rule, a blank line
pub fn frame_error(context: &str, msg: &str) -> String {
    let rule = "-".repeat(ERROR_RULE_WIDTH);
    format!("\n{rule}\nERROR: {context}{msg}\n{rule}\n")
}

/// Buffered log for one module
#[derive(Debug)]
pub struct ModuleLog {
    name: Arc<str>,
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl ModuleLog {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = unbounded();
        Self {
            name: Arc::from(name),
            tx,
            rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logger(&self, phase: &str) -> Logger {
        Logger {
            module: Arc::clone(&self.name),
            phase: Arc::from(phase),
            tx: self.tx.clone(),
        }
    }

    /// Take every line logged since the last drain
    pub fn drain(&self) -> Vec<String> {
        self.rx.try_iter().collect()
    }
}
