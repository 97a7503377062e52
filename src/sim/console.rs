use serde::Serialize;

use super::memory::MemoryStats;
use super::os::proc::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Output {
    pub pid: Pid,
    pub register: i32,
    pub value: i32,
}

/// The simulated machine's console. Everything a program shows ends up on
/// stdout and is also kept for inspection after the run.
#[derive(Debug, Default)]
pub struct Console {
    outputs: Vec<Output>,
    stats_reports: usize,
}

impl Console {
    pub fn new() -> Console {
        Console::default()
    }

    pub fn show_reg(&mut self, pid: Pid, register: i32, value: i32) {
        println!("[OUTPUT] R{} = {}", register, value);
        self.outputs.push(Output {
            pid,
            register,
            value,
        });
    }

    pub fn memory_stats(&mut self, stats: &MemoryStats) {
        println!("{}", stats);
        self.stats_reports += 1;
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Values shown by one process, in program order.
    pub fn values_of(&self, pid: Pid) -> Vec<i32> {
        self.outputs
            .iter()
            .filter(|o| o.pid == pid)
            .map(|o| o.value)
            .collect()
    }

    pub fn stats_reports(&self) -> usize {
        self.stats_reports
    }
}
