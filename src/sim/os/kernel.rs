use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;

use log::{debug, info};

use super::proc::{Context, Pcb, Pid, ProcState};
use crate::sim::fault::{Fault, Res};
use crate::sim::inst::Instruction;
use crate::sim::memory::MemoryManager;
use crate::sim::trace::Lifecycle;

// Ready-set entry: higher priority first, then first come first served.
struct Ready {
    priority: i32,
    seq: u64,
    pcb: Pcb,
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Ready {}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Scheduler. Owns every PCB that is not on the CPU: the ready set, the
/// sleeping list, the event-wait table and the finished list. The running
/// PCB is held in `current` between `context_switch` calls, and a
/// preempted one stays there until its successor is picked.
pub struct ProcessManager {
    ready: BinaryHeap<Ready>,
    sleeping: Vec<Pcb>,
    waiting: BTreeMap<usize, Vec<Pcb>>,
    finished: Vec<Pcb>,
    current: Option<Pcb>,
    next_pid: Pid,
    seq: u64,
    time_quantum: u32,
    heap_base: i32,
    initial_sp: i32,
    journal: Vec<(Pid, Lifecycle)>,
}

impl ProcessManager {
    pub fn new(time_quantum: u32, heap_base: i32, initial_sp: i32) -> ProcessManager {
        ProcessManager {
            ready: BinaryHeap::new(),
            sleeping: Vec::new(),
            waiting: BTreeMap::new(),
            finished: Vec::new(),
            current: None,
            next_pid: 1,
            seq: 0,
            time_quantum,
            heap_base,
            initial_sp,
            journal: Vec::new(),
        }
    }

    pub fn create_process(
        &mut self,
        program: &[Instruction],
        priority: i32,
        memory: &mut MemoryManager,
    ) -> Res<Pid> {
        let pid = self.next_pid;
        self.next_pid += 1;
        let mut pcb = Pcb::new(
            pid,
            priority,
            self.time_quantum,
            self.heap_base,
            self.initial_sp,
        );
        memory.load_program(&mut pcb, program)?;
        info!("Created process {} with priority {}", pid, priority);
        self.journal.push((pid, Lifecycle::Created { priority }));
        self.enqueue_ready(pcb);
        Ok(pid)
    }

    fn enqueue_ready(&mut self, mut pcb: Pcb) {
        pcb.set_state(ProcState::Ready);
        self.seq += 1;
        self.ready.push(Ready {
            priority: pcb.priority(),
            seq: self.seq,
            pcb,
        });
    }

    pub fn add_sleeping_process(&mut self, pcb: Pcb) {
        if pcb.sleep_counter() > 0 {
            info!(
                "Process {} sleeping for {} cycles",
                pcb.pid(),
                pcb.sleep_counter()
            );
            self.journal.push((
                pcb.pid(),
                Lifecycle::Sleeping {
                    cycles: pcb.sleep_counter(),
                },
            ));
            self.sleeping.push(pcb);
        } else {
            self.enqueue_ready(pcb);
        }
    }

    pub fn add_waiting_process(&mut self, pcb: Pcb) {
        match pcb.waiting_event() {
            Some(event) => {
                info!("Process {} waiting for event {}", pcb.pid(), event);
                self.journal.push((pcb.pid(), Lifecycle::Waiting { event }));
                self.waiting.entry(event).or_default().push(pcb);
            }
            None => self.enqueue_ready(pcb),
        }
    }

    /// Wakes every process waiting on `event`. Returns how many woke.
    pub fn notify_event(&mut self, event: usize) -> usize {
        let woken = self.waiting.remove(&event).unwrap_or_default();
        let n = woken.len();
        for mut pcb in woken {
            pcb.clear_waiting_event();
            info!("Process {} woke up from event {}", pcb.pid(), event);
            self.journal
                .push((pcb.pid(), Lifecycle::WokeOnEvent { event }));
            self.enqueue_ready(pcb);
        }
        n
    }

    /// One scheduler poll: ages every sleeper by one, then hands out the
    /// highest-priority ready process.
    pub fn get_next_process(&mut self) -> Option<Pcb> {
        self.update_sleeping_processes();
        self.ready.pop().map(|r| r.pcb)
    }

    fn update_sleeping_processes(&mut self) {
        let sleeping = std::mem::take(&mut self.sleeping);
        for mut pcb in sleeping {
            if pcb.decrement_sleep() {
                info!("Process {} woke up from sleep", pcb.pid());
                self.journal.push((pcb.pid(), Lifecycle::Woke));
                self.enqueue_ready(pcb);
            } else {
                self.sleeping.push(pcb);
            }
        }
    }

    /// Ends a slice. The live context goes back into the running PCB. A
    /// process that slept, waited or terminated leaves the CPU at once; one
    /// whose quantum ran out stays current until the next `context_switch`,
    /// so it is re-queued only after the next process has been chosen.
    pub fn suspend_current(&mut self, live: &Context) {
        let Some(pcb) = self.current.as_mut() else {
            return;
        };
        pcb.save_context(live);
        if pcb.state() != ProcState::Running {
            if let Some(pcb) = self.current.take() {
                self.park(pcb);
            }
        }
    }

    /// Saves the live context into the outgoing process and routes it by
    /// state, then loads `incoming` (if any) onto the CPU with a fresh
    /// quantum.
    pub fn context_switch(&mut self, incoming: Option<Pcb>, live: &mut Context) {
        if let Some(mut outgoing) = self.current.take() {
            outgoing.save_context(live);
            self.park(outgoing);
        }
        if let Some(mut next) = incoming {
            *live = *next.context();
            next.set_state(ProcState::Running);
            next.set_time_quantum(self.time_quantum);
            next.increment_context_switches();
            debug!(
                "Switched to process {} (priority {})",
                next.pid(),
                next.priority()
            );
            self.journal.push((
                next.pid(),
                Lifecycle::Dispatched {
                    priority: next.priority(),
                },
            ));
            self.current = Some(next);
        }
    }

    fn park(&mut self, pcb: Pcb) {
        match pcb.state() {
            ProcState::Running => {
                debug!("Process {} quantum expired\n{}", pcb.pid(), pcb);
                self.journal.push((pcb.pid(), Lifecycle::Preempted));
                self.enqueue_ready(pcb);
            }
            ProcState::WaitingSleep => self.add_sleeping_process(pcb),
            ProcState::WaitingEvent => self.add_waiting_process(pcb),
            ProcState::Terminated => {
                debug!("Process {} terminated\n{}", pcb.pid(), pcb);
                self.journal.push((pcb.pid(), Lifecycle::Terminated));
                self.finished.push(pcb);
            }
            ProcState::New | ProcState::Ready => self.enqueue_ready(pcb),
        }
    }

    pub fn current(&self) -> Option<&Pcb> {
        self.current.as_ref()
    }

    pub fn running_mut(&mut self) -> Res<&mut Pcb> {
        self.current.as_mut().ok_or(Fault::NoRunningProcess)
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn sleeping_count(&self) -> usize {
        self.sleeping.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub fn finished(&self) -> &[Pcb] {
        &self.finished
    }

    /// Every PCB the scheduler knows about, wherever it currently sits.
    pub fn processes(&self) -> Vec<&Pcb> {
        let mut all: Vec<&Pcb> = self
            .ready
            .iter()
            .map(|r| &r.pcb)
            .chain(self.sleeping.iter())
            .chain(self.waiting.values().flatten())
            .chain(self.finished.iter())
            .chain(self.current.iter())
            .collect();
        all.sort_by_key(|p| p.pid());
        all
    }

    pub fn process(&self, pid: Pid) -> Option<&Pcb> {
        self.processes().into_iter().find(|p| p.pid() == pid)
    }

    pub fn drain_journal(&mut self) -> Vec<(Pid, Lifecycle)> {
        std::mem::take(&mut self.journal)
    }
}

impl fmt::Display for ProcessManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Current Process States:")?;
        writeln!(f, "----------------------")?;
        if let Some(p) = &self.current {
            writeln!(f, "Running: {} (Priority {})", p.pid(), p.priority())?;
        }
        writeln!(f, "Ready Queue:")?;
        let mut ready: Vec<&Ready> = self.ready.iter().collect();
        ready.sort_by(|a, b| b.cmp(a));
        for r in ready {
            writeln!(f, "- Process {} (Priority {})", r.pcb.pid(), r.priority)?;
        }
        writeln!(f, "Sleeping Processes:")?;
        for p in &self.sleeping {
            writeln!(
                f,
                "- Process {} (Sleep counter: {})",
                p.pid(),
                p.sleep_counter()
            )?;
        }
        write!(f, "Event Waiting Processes:")?;
        for (event, pcbs) in &self.waiting {
            for p in pcbs {
                write!(f, "\n- Process {} (Waiting for event {})", p.pid(), event)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::clock::Clock;
    use crate::sim::inst::Opcode;

    fn setup() -> (ProcessManager, MemoryManager) {
        (
            ProcessManager::new(10, 0x1000, 0xFF00),
            MemoryManager::new(256, 32, Clock::new()),
        )
    }

    fn program() -> Vec<Instruction> {
        vec![Instruction::new(Opcode::Terminate, 0, 0)]
    }

    #[test]
    fn dispatch_by_descending_priority() {
        let (mut pm, mut mm) = setup();
        let low = pm.create_process(&program(), 8, &mut mm).unwrap();
        let high = pm.create_process(&program(), 10, &mut mm).unwrap();
        let mid = pm.create_process(&program(), 9, &mut mm).unwrap();
        let order: Vec<Pid> = std::iter::from_fn(|| pm.get_next_process())
            .map(|p| p.pid())
            .collect();
        assert_eq!(vec![high, mid, low], order);
    }

    #[test]
    fn equal_priorities_are_fifo() {
        let (mut pm, mut mm) = setup();
        let a = pm.create_process(&program(), 5, &mut mm).unwrap();
        let b = pm.create_process(&program(), 5, &mut mm).unwrap();
        let c = pm.create_process(&program(), 5, &mut mm).unwrap();
        let order: Vec<Pid> = std::iter::from_fn(|| pm.get_next_process())
            .map(|p| p.pid())
            .collect();
        assert_eq!(vec![a, b, c], order);
    }

    #[test]
    fn pids_are_unique_and_monotonic() {
        let (mut pm, mut mm) = setup();
        let pids: Vec<Pid> = (0..4)
            .map(|_| pm.create_process(&program(), 1, &mut mm).unwrap())
            .collect();
        assert_eq!(vec![1, 2, 3, 4], pids);
        assert_eq!(ProcState::Ready, pm.process(3).unwrap().state());
    }

    #[test]
    fn sleeper_wakes_after_exact_number_of_polls() {
        let (mut pm, mut mm) = setup();
        pm.create_process(&program(), 1, &mut mm).unwrap();
        let mut live = Context::default();
        let p = pm.get_next_process().unwrap();
        pm.context_switch(Some(p), &mut live);
        pm.running_mut().unwrap().sleep(5);
        pm.context_switch(None, &mut live);
        assert_eq!(1, pm.sleeping_count());

        for _ in 0..4 {
            assert!(pm.get_next_process().is_none());
        }
        assert_eq!(1, pm.process(1).unwrap().sleep_counter());
        let p = pm.get_next_process().unwrap();
        assert_eq!(ProcState::Ready, p.state());
        assert_eq!(0, pm.sleeping_count());
    }

    #[test]
    fn notify_wakes_every_waiter() {
        let (mut pm, mut mm) = setup();
        let mut live = Context::default();
        for _ in 0..3 {
            pm.create_process(&program(), 1, &mut mm).unwrap();
        }
        for event in [4, 4, 6] {
            let p = pm.get_next_process().unwrap();
            pm.context_switch(Some(p), &mut live);
            pm.running_mut().unwrap().wait_for(event);
            pm.context_switch(None, &mut live);
        }
        assert_eq!(3, pm.waiting_count());
        assert_eq!(0, pm.notify_event(5));
        assert_eq!(2, pm.notify_event(4));
        assert_eq!(0, pm.notify_event(4));
        assert_eq!(2, pm.ready_count());
        assert_eq!(1, pm.waiting_count());
        let woke = pm.get_next_process().unwrap();
        assert_eq!(None, woke.waiting_event());
    }

    #[test]
    fn context_switch_moves_registers() {
        let (mut pm, mut mm) = setup();
        pm.create_process(&program(), 2, &mut mm).unwrap();
        pm.create_process(&program(), 1, &mut mm).unwrap();
        let mut live = Context::default();

        let first = pm.get_next_process().unwrap();
        pm.context_switch(Some(first), &mut live);
        assert_eq!(0xFF00, live.regs[13]);
        live.regs[0] = 42;
        live.zero_flag = true;

        let second = pm.get_next_process().unwrap();
        pm.context_switch(Some(second), &mut live);
        assert_eq!(0, live.regs[0]);
        assert!(!live.zero_flag);

        // the preempted process went back to the ready set with its context
        let first = pm.process(1).unwrap();
        assert_eq!(ProcState::Ready, first.state());
        assert_eq!(42, first.context().regs[0]);
        assert!(first.context().zero_flag);
        assert_eq!(1, first.context_switches());
        assert_eq!(ProcState::Running, pm.current().unwrap().state());
    }

    #[test]
    fn terminated_process_is_never_rescheduled() {
        let (mut pm, mut mm) = setup();
        pm.create_process(&program(), 1, &mut mm).unwrap();
        let mut live = Context::default();
        let p = pm.get_next_process().unwrap();
        pm.context_switch(Some(p), &mut live);
        pm.running_mut().unwrap().terminate();
        pm.context_switch(None, &mut live);
        assert!(pm.get_next_process().is_none());
        assert_eq!(1, pm.finished().len());
    }

    #[test]
    fn preempted_process_is_requeued_after_its_successor_is_chosen() {
        let (mut pm, mut mm) = setup();
        let high = pm.create_process(&program(), 10, &mut mm).unwrap();
        let low = pm.create_process(&program(), 9, &mut mm).unwrap();
        let mut live = Context::default();

        let p = pm.get_next_process().unwrap();
        pm.context_switch(Some(p), &mut live);
        live.regs[0] = 7;
        pm.suspend_current(&live);
        assert_eq!(high, pm.current().unwrap().pid());
        assert_eq!(1, pm.ready_count());

        let next = pm.get_next_process().unwrap();
        assert_eq!(low, next.pid());
        pm.context_switch(Some(next), &mut live);
        assert_eq!(1, pm.ready_count());
        let parked = pm.process(high).unwrap();
        assert_eq!(ProcState::Ready, parked.state());
        assert_eq!(7, parked.context().regs[0]);
    }

    #[test]
    fn blocked_process_leaves_the_cpu_when_suspended() {
        let (mut pm, mut mm) = setup();
        pm.create_process(&program(), 1, &mut mm).unwrap();
        let mut live = Context::default();
        let p = pm.get_next_process().unwrap();
        pm.context_switch(Some(p), &mut live);
        pm.running_mut().unwrap().sleep(2);
        pm.suspend_current(&live);
        assert!(pm.current().is_none());
        assert_eq!(1, pm.sleeping_count());
        assert!(pm.get_next_process().is_none());
        assert!(pm.get_next_process().is_some());
    }

    #[test]
    fn state_dump() {
        let (mut pm, mut mm) = setup();
        pm.create_process(&program(), 7, &mut mm).unwrap();
        let text = pm.to_string();
        assert!(text.contains("- Process 1 (Priority 7)"));
    }
}
