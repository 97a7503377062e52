use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::sim::heap::HeapBlock;
use crate::sim::memory::PageId;

pub type Pid = u32;

pub const NUM_REGISTERS: usize = 16;
pub const IP_REGISTER: usize = 11;
pub const SP_REGISTER: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcState {
    New,
    Ready,
    Running,
    WaitingSleep,
    WaitingEvent,
    Terminated,
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ProcState::New => "NEW",
            ProcState::Ready => "READY",
            ProcState::Running => "RUNNING",
            ProcState::WaitingSleep => "WAITING_SLEEP",
            ProcState::WaitingEvent => "WAITING_EVENT",
            ProcState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// Register file plus flags: the live CPU copy, or a process's saved copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Context {
    pub regs: [i32; NUM_REGISTERS],
    pub sign_flag: bool,
    pub zero_flag: bool,
}

impl Context {
    pub fn reg(&self, index: i32) -> Option<i32> {
        usize::try_from(index).ok().and_then(|i| self.regs.get(i).copied())
    }

    pub fn reg_mut(&mut self, index: i32) -> Option<&mut i32> {
        usize::try_from(index).ok().and_then(|i| self.regs.get_mut(i))
    }

    pub fn ip(&self) -> i32 {
        self.regs[IP_REGISTER]
    }

    pub fn set_ip(&mut self, ip: i32) {
        self.regs[IP_REGISTER] = ip;
    }

    pub fn set_flags(&mut self, value: i32) {
        self.zero_flag = value == 0;
        self.sign_flag = value < 0;
    }
}

pub struct Pcb {
    pid: Pid,
    priority: i32,
    state: ProcState,
    time_quantum: u32,
    context: Context,
    code_len: i32,
    sleep_counter: u32,
    context_switches: u32,
    held_locks: BTreeSet<usize>,
    waiting_event: Option<usize>,
    heap_allocations: BTreeMap<i32, HeapBlock>,
    working_set: Vec<PageId>,
    heap_next_address: i32,
}

impl Pcb {
    pub fn new(pid: Pid, priority: i32, time_quantum: u32, heap_base: i32, initial_sp: i32) -> Pcb {
        let mut context = Context::default();
        context.regs[SP_REGISTER] = initial_sp;
        Pcb {
            pid,
            priority,
            state: ProcState::New,
            time_quantum,
            context,
            code_len: 0,
            sleep_counter: 0,
            context_switches: 0,
            held_locks: BTreeSet::new(),
            waiting_event: None,
            heap_allocations: BTreeMap::new(),
            working_set: Vec::new(),
            heap_next_address: heap_base,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    pub fn set_state(&mut self, state: ProcState) {
        self.state = state;
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ProcState::Terminated
    }

    pub fn time_quantum(&self) -> u32 {
        self.time_quantum
    }

    pub fn set_time_quantum(&mut self, quantum: u32) {
        self.time_quantum = quantum;
    }

    pub fn consume_quantum(&mut self) {
        self.time_quantum = self.time_quantum.saturating_sub(1);
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn save_context(&mut self, live: &Context) {
        self.context = *live;
    }

    pub fn code_len(&self) -> i32 {
        self.code_len
    }

    pub fn set_code_len(&mut self, len: i32) {
        self.code_len = len;
    }

    pub fn sleep_counter(&self) -> u32 {
        self.sleep_counter
    }

    /// Puts the process to sleep for `cycles` scheduler polls, at least one.
    pub fn sleep(&mut self, cycles: i32) {
        self.sleep_counter = cycles.max(1) as u32;
        self.state = ProcState::WaitingSleep;
    }

    /// Counts one scheduler poll; returns true when the process woke up.
    pub fn decrement_sleep(&mut self) -> bool {
        if self.sleep_counter > 0 {
            self.sleep_counter -= 1;
            if self.sleep_counter == 0 {
                self.state = ProcState::Ready;
                return true;
            }
        }
        false
    }

    pub fn context_switches(&self) -> u32 {
        self.context_switches
    }

    pub fn increment_context_switches(&mut self) {
        self.context_switches += 1;
    }

    pub fn held_locks(&self) -> &BTreeSet<usize> {
        &self.held_locks
    }

    pub fn add_held_lock(&mut self, lock: usize) {
        self.held_locks.insert(lock);
    }

    pub fn remove_held_lock(&mut self, lock: usize) -> bool {
        self.held_locks.remove(&lock)
    }

    pub fn is_holding_lock(&self, lock: usize) -> bool {
        self.held_locks.contains(&lock)
    }

    /// Marks the process terminated and hands back the locks it held so the
    /// caller can clear them in the global table.
    pub fn terminate(&mut self) -> Vec<usize> {
        self.state = ProcState::Terminated;
        std::mem::take(&mut self.held_locks).into_iter().collect()
    }

    pub fn waiting_event(&self) -> Option<usize> {
        self.waiting_event
    }

    pub fn wait_for(&mut self, event: usize) {
        self.waiting_event = Some(event);
        self.state = ProcState::WaitingEvent;
    }

    pub fn clear_waiting_event(&mut self) {
        self.waiting_event = None;
    }

    pub fn heap_allocations(&self) -> &BTreeMap<i32, HeapBlock> {
        &self.heap_allocations
    }

    pub fn add_heap_allocation(&mut self, block: HeapBlock) {
        self.heap_allocations.insert(block.addr, block);
    }

    pub fn remove_heap_allocation(&mut self, addr: i32) -> Option<HeapBlock> {
        self.heap_allocations.remove(&addr)
    }

    pub fn heap_next_address(&self) -> i32 {
        self.heap_next_address
    }

    pub fn set_heap_next_address(&mut self, addr: i32) {
        self.heap_next_address = addr;
    }

    pub fn working_set(&self) -> &[PageId] {
        &self.working_set
    }

    /// Records `page` in the sorted working set if it is not there yet.
    pub fn update_working_set(&mut self, page: PageId) {
        if let Err(i) = self.working_set.binary_search(&page) {
            self.working_set.insert(i, page);
        }
    }
}

impl fmt::Display for Pcb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Process {} Statistics:", self.pid)?;
        writeln!(f, "---------------------")?;
        writeln!(f, "Priority: {}", self.priority)?;
        writeln!(f, "State: {}", self.state)?;
        writeln!(f, "Context Switches: {}", self.context_switches)?;
        writeln!(f, "Time Quantum: {}", self.time_quantum)?;
        writeln!(f, "Sleep Counter: {}", self.sleep_counter)?;
        match self.waiting_event {
            Some(e) => writeln!(f, "Waiting Event: {}", e)?,
            None => writeln!(f, "Waiting Event: none")?,
        }
        writeln!(f, "Held Locks: {:?}", self.held_locks)?;
        let heap: Vec<(i32, i32)> = self
            .heap_allocations
            .values()
            .map(|b| (b.addr, b.size))
            .collect();
        writeln!(f, "Heap Allocations (addr, size): {:?}", heap)?;
        writeln!(f, "Working Set Pages: {:?}", self.working_set)?;
        writeln!(
            f,
            "Flags: [SIGN: {}, ZERO: {}]",
            self.context.sign_flag, self.context.zero_flag
        )?;
        write!(f, "Register Dump:")?;
        for (i, r) in self.context.regs.iter().enumerate() {
            write!(f, "\n  R{:<2}: {}", i, r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcb() -> Pcb {
        Pcb::new(1, 10, 10, 0x1000, 0xFF00)
    }

    #[test]
    fn new_pcb() {
        let p = pcb();
        assert_eq!(ProcState::New, p.state());
        assert_eq!(0xFF00, p.context().regs[SP_REGISTER]);
        assert_eq!(0, p.context().ip());
        assert_eq!(0x1000, p.heap_next_address());
    }

    #[test]
    fn sleep_clamps_to_one() {
        let mut p = pcb();
        p.sleep(0);
        assert_eq!(1, p.sleep_counter());
        assert_eq!(ProcState::WaitingSleep, p.state());
        assert!(p.decrement_sleep());
        assert_eq!(ProcState::Ready, p.state());
        assert!(!p.decrement_sleep());

        p.sleep(-7);
        assert_eq!(1, p.sleep_counter());
    }

    #[test]
    fn terminate_hands_back_locks() {
        let mut p = pcb();
        p.add_held_lock(3);
        p.add_held_lock(7);
        assert_eq!(vec![3, 7], p.terminate());
        assert!(p.held_locks().is_empty());
        assert!(p.is_terminated());
    }

    #[test]
    fn working_set_is_sorted_and_unique() {
        let mut p = pcb();
        for page in [9, 2, 5, 2, 9] {
            p.update_working_set(page);
        }
        assert_eq!(vec![2u32, 5, 9], p.working_set().to_vec());
    }

    #[test]
    fn context_register_bounds() {
        let mut c = Context::default();
        assert_eq!(Some(0), c.reg(15));
        assert_eq!(None, c.reg(16));
        assert_eq!(None, c.reg(-1));
        *c.reg_mut(4).unwrap() = -3;
        c.set_flags(c.reg(4).unwrap());
        assert!(c.sign_flag);
        assert!(!c.zero_flag);
    }
}
