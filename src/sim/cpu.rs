use log::{debug, info, trace, warn};
use serde::Serialize;

use super::clock::Clock;
use super::console::Console;
use super::fault::{Fault, Res};
use super::inst::{decode_opcode, Instruction, Opcode, INSTRUCTION_SIZE, WORD_SIZE};
use super::memory::MemoryManager;
use super::os::kernel::ProcessManager;
use super::os::proc::{Context, Pid};
use super::trace::{Trace, TraceEvent};
use crate::config::SimConfig;

pub const NUM_LOCKS: usize = 32;
pub const NUM_EVENTS: usize = 10;

const STEP: i32 = INSTRUCTION_SIZE as i32;
const WORD: i32 = WORD_SIZE as i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub cycles: u64,
    pub terminated: usize,
    /// Processes left waiting on an event nobody will signal.
    pub stranded: usize,
}

// What the slice does after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Block,
    Halt,
}

fn table_index(id: i32, len: usize) -> Option<usize> {
    usize::try_from(id).ok().filter(|i| *i < len)
}

/// The execution engine: one live register file, the lock and event tables,
/// and the components it drives.
pub struct Cpu {
    live: Context,
    locks: [bool; NUM_LOCKS],
    events: [bool; NUM_EVENTS],
    clock: Clock,
    kernel: ProcessManager,
    ram: MemoryManager,
    console: Console,
    trace: Trace,
}

impl Cpu {
    pub fn new(config: &SimConfig) -> Cpu {
        let clock = Clock::new();
        Cpu {
            live: Context::default(),
            locks: [false; NUM_LOCKS],
            events: [false; NUM_EVENTS],
            ram: MemoryManager::new(config.page_size, config.physical_pages, clock.clone()),
            kernel: ProcessManager::new(config.time_quantum, config.heap_base, config.initial_sp),
            clock,
            console: Console::new(),
            trace: Trace::new(config.trace),
        }
    }

    pub fn create_process(&mut self, program: &[Instruction], priority: i32) -> Res<Pid> {
        let pid = self
            .kernel
            .create_process(program, priority, &mut self.ram)?;
        self.flush_journal();
        Ok(pid)
    }

    /// Runs until no process can make progress.
    pub fn run(&mut self) -> RunReport {
        loop {
            self.clock.tick();
            match self.kernel.get_next_process() {
                Some(next) => {
                    debug!(
                        "[Cycle {}] Switching to process {} (priority {})\n{}",
                        self.clock.now(),
                        next.pid(),
                        next.priority(),
                        self.kernel
                    );
                    self.kernel.context_switch(Some(next), &mut self.live);
                    self.flush_journal();
                    self.execute_process();
                    self.kernel.suspend_current(&self.live);
                    self.flush_journal();
                }
                None if self.kernel.current().is_some() => {
                    // nothing else is ready; the preempted process goes back
                    // in line for the next poll
                    self.kernel.context_switch(None, &mut self.live);
                    self.flush_journal();
                }
                None => {
                    self.flush_journal();
                    if self.kernel.sleeping_count() == 0 {
                        break;
                    }
                }
            }
        }

        let report = RunReport {
            cycles: self.clock.now(),
            terminated: self.kernel.finished().len(),
            stranded: self.kernel.waiting_count(),
        };
        if report.stranded > 0 {
            warn!(
                "{} process(es) still waiting on events that were never signaled",
                report.stranded
            );
        }
        info!(
            "No more processes in queue; {} terminated, total clock cycles: {}",
            report.terminated, report.cycles
        );
        report
    }

    /// Runs the current process until its quantum is spent, it blocks, or it
    /// terminates. A fault terminates the process and ends the slice.
    pub fn execute_process(&mut self) {
        let mut ip = self.live.ip();
        loop {
            match self.kernel.current() {
                Some(p) if p.time_quantum() > 0 => {}
                _ => break,
            }
            let flow = self.step(&mut ip);
            self.flush_journal();
            match flow {
                Ok(Flow::Next) => {}
                Ok(Flow::Block) | Ok(Flow::Halt) => break,
                Err(fault) => {
                    self.fault(fault);
                    break;
                }
            }
        }
    }

    fn step(&mut self, ip: &mut i32) -> Res<Flow> {
        let cycle = self.clock.tick();
        let pcb = self.kernel.running_mut()?;
        let pid = pcb.pid();
        let at = *ip;
        if at < 0 || at >= pcb.code_len() {
            return Err(Fault::EndOfProgram { pid, ip: at });
        }
        let code = self.ram.read_word(pid, at)?;
        let arg1 = self.ram.read_word(pid, at + WORD)?;
        let arg2 = self.ram.read_word(pid, at + 2 * WORD)?;
        let opcode = decode_opcode(code).ok_or(Fault::UnknownOpcode { pid, ip: at, code })?;

        let flow = self.exec(pid, opcode, arg1, arg2)?;
        if flow == Flow::Next {
            if let Some(value) = self.live.reg(arg1) {
                self.live.set_flags(value);
            }
        }
        if flow != Flow::Halt {
            *ip = at.wrapping_add(STEP);
            self.live.set_ip(*ip);
            self.kernel.running_mut()?.consume_quantum();
        }

        let value = self.live.reg(arg1);
        trace!(
            "[{:04}] pid {} {:<14} {:>4} {:>4} | R{}={:?} | Flags: [Z:{}, S:{}]",
            at,
            pid,
            opcode,
            arg1,
            arg2,
            arg1,
            value,
            self.live.zero_flag,
            self.live.sign_flag
        );
        self.trace.record(TraceEvent::Instruction {
            cycle,
            pid,
            ip: at,
            opcode,
            arg1,
            arg2,
            value,
            zero_flag: self.live.zero_flag,
            sign_flag: self.live.sign_flag,
        });
        Ok(flow)
    }

    fn exec(&mut self, pid: Pid, opcode: Opcode, arg1: i32, arg2: i32) -> Res<Flow> {
        match opcode {
            Opcode::LoadValue => *self.reg_mut(pid, arg1)? = arg2,
            Opcode::Increment => {
                let r = self.reg_mut(pid, arg1)?;
                *r = r.wrapping_add(1);
            }
            Opcode::AddValue => {
                let r = self.reg_mut(pid, arg1)?;
                *r = r.wrapping_add(arg2);
            }
            Opcode::ShowReg => {
                let value = self.reg(pid, arg1)?;
                self.console.show_reg(pid, arg1, value);
            }
            Opcode::Sleep => {
                self.kernel.running_mut()?.sleep(arg1);
                return Ok(Flow::Block);
            }
            Opcode::Terminate => {
                self.terminate_current()?;
                return Ok(Flow::Halt);
            }
            Opcode::MapSharedMem => {
                self.reg(pid, arg2)?;
                let pcb = self.kernel.running_mut()?;
                let addr = self.ram.map_shared_memory(pcb, arg1)?;
                *self.reg_mut(pid, arg2)? = addr;
            }
            Opcode::AcquireLock => {
                if let Some(lock) = table_index(arg1, NUM_LOCKS) {
                    if !self.locks[lock] {
                        self.locks[lock] = true;
                        self.kernel.running_mut()?.add_held_lock(lock);
                        debug!("Process {} acquired lock {}", pid, lock);
                    }
                }
            }
            Opcode::ReleaseLock => {
                if let Some(lock) = table_index(arg1, NUM_LOCKS) {
                    let pcb = self.kernel.running_mut()?;
                    if self.locks[lock] && pcb.is_holding_lock(lock) {
                        pcb.remove_held_lock(lock);
                        self.locks[lock] = false;
                        debug!("Process {} released lock {}", pid, lock);
                    }
                }
            }
            Opcode::SignalEvent => {
                if let Some(event) = table_index(arg1, NUM_EVENTS) {
                    self.events[event] = true;
                    let woken = self.kernel.notify_event(event);
                    debug!("Process {} signaled event {} ({} woken)", pid, event, woken);
                }
            }
            Opcode::WaitEvent => {
                if let Some(event) = table_index(arg1, NUM_EVENTS) {
                    if !self.events[event] {
                        self.kernel.running_mut()?.wait_for(event);
                        return Ok(Flow::Block);
                    }
                }
            }
            Opcode::Alloc => {
                let size = self.reg(pid, arg1)?;
                self.reg(pid, arg2)?;
                let pcb = self.kernel.running_mut()?;
                let addr = self.ram.allocate_heap(pcb, size)?;
                *self.reg_mut(pid, arg2)? = addr;
            }
            Opcode::FreeMemory => {
                let addr = self.reg(pid, arg1)?;
                let pcb = self.kernel.running_mut()?;
                self.ram.free_heap(pcb, addr);
            }
            Opcode::MemoryStats => {
                self.console.memory_stats(&self.ram.stats());
                self.ram.trace_resident();
            }
            Opcode::WriteMem => {
                let addr = self.reg(pid, arg1)?;
                let value = self.reg(pid, arg2)?;
                let pcb = self.kernel.running_mut()?;
                if let Err(fault) = self.ram.write_word(pcb, addr, value) {
                    warn!("Memory write failed: {}", fault);
                    self.record_fault(pid, &fault);
                    self.terminate_current()?;
                    return Ok(Flow::Halt);
                }
            }
        }
        Ok(Flow::Next)
    }

    fn reg(&self, pid: Pid, index: i32) -> Res<i32> {
        self.live
            .reg(index)
            .ok_or(Fault::InvalidRegister { pid, index })
    }

    fn reg_mut(&mut self, pid: Pid, index: i32) -> Res<&mut i32> {
        self.live
            .reg_mut(index)
            .ok_or(Fault::InvalidRegister { pid, index })
    }

    fn terminate_current(&mut self) -> Res<()> {
        let pcb = self.kernel.running_mut()?;
        let pid = pcb.pid();
        for lock in pcb.terminate() {
            if let Some(held) = self.locks.get_mut(lock) {
                *held = false;
            }
        }
        info!("Process {} terminated", pid);
        Ok(())
    }

    fn fault(&mut self, fault: Fault) {
        warn!("CPU exception: {}", fault);
        if let Some(pid) = fault.pid() {
            self.record_fault(pid, &fault);
        }
        if let Err(e) = self.terminate_current() {
            warn!("cannot terminate faulting process: {}", e);
        }
    }

    fn record_fault(&mut self, pid: Pid, fault: &Fault) {
        self.trace.record(TraceEvent::Fault {
            cycle: self.clock.now(),
            pid,
            message: fault.to_string(),
        });
    }

    fn flush_journal(&mut self) {
        let cycle = self.clock.now();
        for (pid, event) in self.kernel.drain_journal() {
            self.trace.record(TraceEvent::Process { cycle, pid, event });
        }
    }

    pub fn context(&self) -> &Context {
        &self.live
    }

    pub fn is_lock_held(&self, lock: usize) -> bool {
        self.locks.get(lock).copied().unwrap_or(false)
    }

    pub fn is_event_signaled(&self, event: usize) -> bool {
        self.events.get(event).copied().unwrap_or(false)
    }

    pub fn cycles(&self) -> u64 {
        self.clock.now()
    }

    pub fn kernel(&self) -> &ProcessManager {
        &self.kernel
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.ram
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }
}
