use serde::Serialize;

use super::inst::Opcode;
use super::os::proc::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Lifecycle {
    Created { priority: i32 },
    Dispatched { priority: i32 },
    Preempted,
    Sleeping { cycles: u32 },
    Waiting { event: usize },
    Woke,
    WokeOnEvent { event: usize },
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    Instruction {
        cycle: u64,
        pid: Pid,
        ip: i32,
        opcode: Opcode,
        arg1: i32,
        arg2: i32,
        /// `register[arg1]` after execution; None when arg1 names no register.
        value: Option<i32>,
        zero_flag: bool,
        sign_flag: bool,
    },
    Process {
        cycle: u64,
        pid: Pid,
        #[serde(flatten)]
        event: Lifecycle,
    },
    Fault {
        cycle: u64,
        pid: Pid,
        message: String,
    },
}

/// Recorder for the structured trace. Disabled traces record nothing.
#[derive(Debug, Default)]
pub struct Trace {
    enabled: bool,
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new(enabled: bool) -> Trace {
        Trace {
            enabled,
            events: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, event: TraceEvent) {
        if self.enabled {
            self.events.push(event);
        }
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Pids in the order they were handed the CPU.
    pub fn dispatch_order(&self) -> Vec<Pid> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Process {
                    pid,
                    event: Lifecycle::Dispatched { .. },
                    ..
                } => Some(*pid),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.events)
    }
}
