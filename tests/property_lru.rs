//! LRU eviction: with the pool full, paging in one more page evicts the
//! valid private page with the smallest last-used stamp (lowest id among
//! equal stamps), and a dirty victim comes back bit for bit.

use ossim::sim::clock::Clock;
use ossim::sim::inst::{Instruction, Opcode};
use ossim::sim::memory::MemoryManager;
use ossim::sim::os::proc::Pcb;
use proptest::prelude::*;

const PAGE: usize = 64;
const HEAP: i32 = 0x1000;

proptest! {
    #[test]
    fn victim_is_least_recently_used(
        capacity in 2usize..8,
        touches in proptest::collection::vec((0usize..8, any::<bool>()), 0..30),
        value in any::<i32>(),
    ) {
        let clock = Clock::new();
        let mut mm = MemoryManager::new(PAGE, capacity, clock.clone());
        let mut p = Pcb::new(1, 1, 10, HEAP, 0);
        mm.load_program(&mut p, &[Instruction::new(Opcode::Terminate, 0, 0)]).unwrap();

        // fill the pool: the code page plus one touched page per heap allocation
        let mut addrs = vec![0];
        for _ in 1..capacity {
            clock.tick();
            let addr = mm.allocate_heap(&mut p, PAGE as i32).unwrap();
            mm.read_word(1, addr).unwrap();
            addrs.push(addr);
        }
        prop_assert_eq!(capacity, mm.resident_pages());

        for (n, write) in touches {
            clock.tick();
            let addr = addrs[n % addrs.len()];
            if write {
                mm.write_word(&mut p, addr, value).unwrap();
            } else {
                mm.read_word(1, addr).unwrap();
            }
        }

        let expected = (0..capacity as u32 + 2)
            .filter_map(|page| mm.page_info(page).map(|info| (page, info)))
            .filter(|(_, info)| info.valid && !info.pinned)
            .min_by_key(|(_, info)| info.last_used)
            .map(|(page, info)| (page, info.dirty))
            .unwrap();

        clock.tick();
        let fresh = mm.allocate_heap(&mut p, PAGE as i32).unwrap();
        mm.read_word(1, fresh).unwrap();
        prop_assert_eq!(capacity, mm.resident_pages());
        let (victim, dirty) = expected;
        prop_assert!(!mm.page_info(victim).unwrap().valid);
        prop_assert_eq!(dirty, mm.is_on_disk(victim));
    }

    #[test]
    fn dirty_page_round_trips_through_disk(values in proptest::collection::vec(any::<i32>(), 16)) {
        let clock = Clock::new();
        let mut mm = MemoryManager::new(PAGE, 2, clock.clone());
        let mut p = Pcb::new(1, 1, 10, HEAP, 0);
        mm.load_program(&mut p, &[Instruction::new(Opcode::Terminate, 0, 0)]).unwrap();
        let a = mm.allocate_heap(&mut p, PAGE as i32).unwrap();
        for (k, v) in values.iter().enumerate() {
            clock.tick();
            mm.write_word(&mut p, a + 4 * k as i32, *v).unwrap();
        }
        // a newer code stamp and a fresh heap page push the written page out
        clock.tick();
        mm.read_word(1, 0).unwrap();
        clock.tick();
        let fresh = mm.allocate_heap(&mut p, PAGE as i32).unwrap();
        mm.read_word(1, fresh).unwrap();
        let page = mm.translate(1, a).unwrap().0;
        prop_assert!(mm.is_on_disk(page));

        for (k, v) in values.iter().enumerate() {
            clock.tick();
            prop_assert_eq!(*v, mm.read_word(1, a + 4 * k as i32).unwrap());
        }
    }
}
