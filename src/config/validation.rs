//! Configuration validation

use super::Config;
use crate::dataplane::TableFullPolicy;
use crate::telemetry::is_known_level;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_ports(config, &mut result);
    validate_dataplane(config, &mut result);
    validate_limits(config, &mut result);
    validate_logging(config, &mut result);

    result
}

fn validate_ports(config: &Config, result: &mut ValidationResult) {
    let ports = &config.ports;

    if ports.interfaces.is_empty() {
        result.error("ports.interfaces: at least one interface is required");
        return;
    }

    let mut seen = HashSet::new();
    for name in &ports.interfaces {
        if !seen.insert(name.as_str()) {
            result.error(format!("ports.interfaces: {} listed more than once", name));
        }
    }

    if ports.pairs.is_empty() {
        if ports.interfaces.len() % 2 != 0 {
            result.error(format!(
                "ports.interfaces: {} interfaces cannot be paired consecutively, add ports.pairs",
                ports.interfaces.len()
            ));
        }
        return;
    }

    let mut paired = HashSet::new();
    for (a, b) in &ports.pairs {
        if a == b {
            result.error(format!("ports.pairs: {} paired with itself", a));
            continue;
        }
        for name in [a, b] {
            if ports.index_of(name).is_none() {
                result.error(format!("ports.pairs: {} is not in ports.interfaces", name));
            } else if !paired.insert(name.as_str()) {
                result.error(format!("ports.pairs: {} is in more than one pair", name));
            }
        }
    }

    for name in &ports.interfaces {
        if !paired.contains(name.as_str()) {
            result.error(format!("ports.pairs: {} has no pair", name));
        }
    }
}

fn validate_dataplane(config: &Config, result: &mut ValidationResult) {
    let dp = &config.dataplane;

    if dp.burst_size == 0 {
        result.error("dataplane.burst_size: must be at least 1");
    }
    if dp.drain_interval_us == 0 {
        result.error("dataplane.drain_interval_us: must be at least 1");
    }
    if dp.ports_per_worker == 0 {
        result.error("dataplane.ports_per_worker: must be at least 1");
    }

    if dp.flow_table_capacity == 0 {
        result.warn(format!(
            "dataplane.flow_table_capacity: 0, every packet falls to limits.on_table_full ({:?})",
            config.limits.on_table_full
        ));
    }

    let busy = dp.worker_count(config.ports.interfaces.len());
    if dp.cores.len() > busy {
        result.warn(format!(
            "dataplane.cores: {} cores listed but ports fill only {} workers, the rest idle",
            dp.cores.len(),
            busy
        ));
    }
}

fn validate_limits(config: &Config, result: &mut ValidationResult) {
    if config.limits.on_table_full == TableFullPolicy::FailClosed {
        result.warn(
            "limits.on_table_full: fail_closed drops traffic from new sources while the table cannot make room",
        );
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    if !is_known_level(&config.logging.level) {
        result.warn(format!(
            "logging.level: unknown level {}, using info",
            config.logging.level
        ));
    }
}
