use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapBlock {
    pub addr: i32,
    pub size: i32,
    pub free: bool,
}

impl HeapBlock {
    pub fn end(&self) -> i32 {
        self.addr + self.size
    }
}

/// Per-process heap: every block ever carved out of the heap region, free
/// or allocated, kept in address order with no gaps between neighbours.
#[derive(Debug, Clone)]
pub struct Heap {
    base: i32,
    end: i32,
    blocks: Vec<HeapBlock>,
}

impl Heap {
    pub fn new(base: i32) -> Heap {
        Heap {
            base,
            end: base,
            blocks: Vec::new(),
        }
    }

    pub fn base(&self) -> i32 {
        self.base
    }

    /// First address past the last block.
    pub fn end(&self) -> i32 {
        self.end
    }

    pub fn blocks(&self) -> &[HeapBlock] {
        &self.blocks
    }

    /// Takes the first free block that fits, splitting off the unused tail
    /// as a new free block right after it.
    pub fn first_fit(&mut self, size: i32) -> Option<HeapBlock> {
        let i = self
            .blocks
            .iter()
            .position(|b| b.free && b.size >= size)?;
        let block = &mut self.blocks[i];
        let rest = block.size - size;
        block.size = size;
        block.free = false;
        let taken = *block;
        if rest > 0 {
            self.blocks.insert(
                i + 1,
                HeapBlock {
                    addr: taken.end(),
                    size: rest,
                    free: true,
                },
            );
        }
        Some(taken)
    }

    /// Appends an allocated block of exactly `size` bytes at the heap end.
    /// Returns None when the heap would run past the address space.
    pub fn append(&mut self, size: i32) -> Option<HeapBlock> {
        let end = self.end.checked_add(size)?;
        let block = HeapBlock {
            addr: self.end,
            size,
            free: false,
        };
        self.blocks.push(block);
        self.end = end;
        Some(block)
    }

    pub fn allocate(&mut self, size: i32) -> Option<HeapBlock> {
        if size <= 0 {
            return None;
        }
        match self.first_fit(size) {
            Some(block) => Some(block),
            None => self.append(size),
        }
    }

    /// Marks the allocated block starting at `addr` free and coalesces.
    pub fn release(&mut self, addr: i32) -> Option<HeapBlock> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.addr == addr && !b.free)?;
        block.free = true;
        let released = *block;
        self.coalesce();
        Some(released)
    }

    // one left-to-right pass; a merged block is compared again with its
    // new right neighbour before moving on
    fn coalesce(&mut self) {
        let mut i = 0;
        while i + 1 < self.blocks.len() {
            if self.blocks[i].free && self.blocks[i + 1].free {
                let next = self.blocks.remove(i + 1);
                self.blocks[i].size += next.size;
            } else {
                i += 1;
            }
        }
    }

    pub fn free_bytes(&self) -> i32 {
        self.blocks.iter().filter(|b| b.free).map(|b| b.size).sum()
    }

    pub fn allocated_bytes(&self) -> i32 {
        self.blocks.iter().filter(|b| !b.free).map(|b| b.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: i32 = 0x1000;

    fn assert_contiguous(heap: &Heap) {
        let mut addr = heap.base();
        for b in heap.blocks() {
            assert_eq!(addr, b.addr);
            addr = b.end();
        }
        assert_eq!(addr, heap.end());
    }

    #[test]
    fn append_when_nothing_fits() {
        let mut heap = Heap::new(BASE);
        let a = heap.allocate(40).unwrap();
        let b = heap.allocate(24).unwrap();
        assert_eq!(BASE, a.addr);
        assert_eq!(BASE + 40, b.addr);
        assert_eq!(BASE + 64, heap.end());
        assert_contiguous(&heap);
    }

    #[test]
    fn first_fit_splits_the_block() {
        let mut heap = Heap::new(BASE);
        let a = heap.allocate(100).unwrap();
        heap.allocate(8).unwrap();
        heap.release(a.addr).unwrap();

        let c = heap.allocate(30).unwrap();
        assert_eq!(a.addr, c.addr);
        assert_eq!(
            HeapBlock {
                addr: BASE + 30,
                size: 70,
                free: true
            },
            heap.blocks()[1]
        );
        assert_eq!(3, heap.blocks().len());
        assert_contiguous(&heap);
    }

    #[test]
    fn exact_fit_does_not_split() {
        let mut heap = Heap::new(BASE);
        let a = heap.allocate(16).unwrap();
        heap.allocate(16).unwrap();
        heap.release(a.addr);
        heap.allocate(16).unwrap();
        assert_eq!(2, heap.blocks().len());
    }

    #[test]
    fn release_coalesces_in_either_order() {
        for reversed in [false, true] {
            let mut heap = Heap::new(BASE);
            let a = heap.allocate(12).unwrap();
            let b = heap.allocate(20).unwrap();
            if reversed {
                heap.release(b.addr).unwrap();
                heap.release(a.addr).unwrap();
            } else {
                heap.release(a.addr).unwrap();
                heap.release(b.addr).unwrap();
            }
            assert_eq!(
                vec![HeapBlock {
                    addr: BASE,
                    size: 32,
                    free: true
                }],
                heap.blocks().to_vec()
            );
            assert_eq!(Some(a.addr), heap.allocate(32).map(|b| b.addr));
        }
    }

    #[test]
    fn release_merges_three_way() {
        let mut heap = Heap::new(BASE);
        let a = heap.allocate(4).unwrap();
        let b = heap.allocate(4).unwrap();
        let c = heap.allocate(4).unwrap();
        heap.release(a.addr);
        heap.release(c.addr);
        assert_eq!(3, heap.blocks().len());
        heap.release(b.addr);
        assert_eq!(1, heap.blocks().len());
        assert_eq!(12, heap.free_bytes());
    }

    #[test]
    fn bad_requests() {
        let mut heap = Heap::new(BASE);
        assert!(heap.allocate(0).is_none());
        assert!(heap.allocate(-5).is_none());
        assert!(heap.release(BASE).is_none());
        let a = heap.allocate(8).unwrap();
        assert!(heap.release(a.addr + 4).is_none());
        assert!(heap.release(a.addr).is_some());
        assert!(heap.release(a.addr).is_none());
        assert!(heap.allocate(i32::MAX).is_none());
    }
}
