use std::cell::Cell;
use std::rc::Rc;

/// Global monotonic cycle counter. The execution engine advances it; the
/// memory manager reads it to stamp page accesses for LRU.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    cycles: Rc<Cell<u64>>,
}

impl Clock {
    pub fn new() -> Clock {
        Clock::default()
    }

    pub fn now(&self) -> u64 {
        self.cycles.get()
    }

    pub fn tick(&self) -> u64 {
        let next = self.cycles.get() + 1;
        self.cycles.set(next);
        next
    }
}
