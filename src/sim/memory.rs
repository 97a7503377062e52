use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use log::{debug, trace};
use serde::Serialize;

use super::clock::Clock;
use super::fault::{Fault, Res};
use super::heap::Heap;
use super::inst::{encode_program, pack_word, unpack_word, Instruction, WORD_SIZE};
use super::os::proc::{Pcb, Pid};
use crate::utils::format_bytes;

pub type PageId = u32;

pub const SHARED_REGIONS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub valid: bool,
    pub dirty: bool,
    pub last_used: u64,
    pub pinned: bool,
}

/// Paging and heap state for every process.
///
/// Private pages live either in the bounded physical pool (`valid`) or in
/// the disk store, never both. Shared regions are pinned pages outside the
/// pool and are never evicted.
///
/// Each address space is laid out as the code image from page 0, then a
/// window of pages for shared mappings, then the heap. Heap pages are
/// mapped on first access and zero-filled.
pub struct MemoryManager {
    page_size: usize,
    capacity: usize,
    clock: Clock,
    frames: BTreeMap<PageId, Box<[u8]>>,
    disk: BTreeMap<PageId, Box<[u8]>>,
    pages: BTreeMap<PageId, PageInfo>,
    page_tables: HashMap<Pid, BTreeMap<u32, PageId>>,
    heaps: HashMap<Pid, Heap>,
    next_page: PageId,
    resident: usize,
    // (last_used, page) for every valid private page
    lru: BTreeSet<(u64, PageId)>,

    page_faults: u64,
    evictions: u64,
    disk_writes: u64,
}

impl MemoryManager {
    pub fn new(page_size: usize, capacity: usize, clock: Clock) -> MemoryManager {
        let mut mm = MemoryManager {
            page_size,
            capacity,
            clock,
            frames: BTreeMap::new(),
            disk: BTreeMap::new(),
            pages: BTreeMap::new(),
            page_tables: HashMap::new(),
            heaps: HashMap::new(),
            next_page: SHARED_REGIONS as PageId,
            resident: 0,
            lru: BTreeSet::new(),
            page_faults: 0,
            evictions: 0,
            disk_writes: 0,
        };
        for region in 0..SHARED_REGIONS as PageId {
            mm.frames.insert(region, mm.blank_page());
            mm.pages.insert(
                region,
                PageInfo {
                    valid: true,
                    dirty: false,
                    last_used: 0,
                    pinned: true,
                },
            );
        }
        mm
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Private pages currently held in the physical pool.
    pub fn resident_pages(&self) -> usize {
        self.resident
    }

    pub fn page_info(&self, page: PageId) -> Option<PageInfo> {
        self.pages.get(&page).copied()
    }

    pub fn is_on_disk(&self, page: PageId) -> bool {
        self.disk.contains_key(&page)
    }

    pub fn page_table(&self, pid: Pid) -> Option<&BTreeMap<u32, PageId>> {
        self.page_tables.get(&pid)
    }

    pub fn heap(&self, pid: Pid) -> Option<&Heap> {
        self.heaps.get(&pid)
    }

    fn blank_page(&self) -> Box<[u8]> {
        vec![0u8; self.page_size].into_boxed_slice()
    }

    /// Copies the program image into freshly allocated pages mapped from
    /// virtual address 0, records the code length on the PCB and places the
    /// heap past the code and the shared window.
    pub fn load_program(&mut self, pcb: &mut Pcb, program: &[Instruction]) -> Res<()> {
        let pid = pcb.pid();
        let image = encode_program(program);
        let code_len = i32::try_from(image.len()).map_err(|_| Fault::OutOfMemory { pid })?;
        let code_pages = image.len().div_ceil(self.page_size);
        let heap_base = (code_pages + SHARED_REGIONS)
            .checked_mul(self.page_size)
            .and_then(|end| i32::try_from(end).ok())
            .ok_or(Fault::OutOfMemory { pid })?
            .max(pcb.heap_next_address());
        self.page_tables.entry(pid).or_default();
        for (vpn, chunk) in image.chunks(self.page_size).enumerate() {
            let page = self.allocate_page(pid)?;
            if let Some(frame) = self.frames.get_mut(&page) {
                frame[..chunk.len()].copy_from_slice(chunk);
            }
            // the image exists nowhere else, so eviction must persist it
            if let Some(info) = self.pages.get_mut(&page) {
                info.dirty = true;
            }
            self.map(pid, vpn as u32, page);
            pcb.update_working_set(page);
        }
        pcb.set_code_len(code_len);
        pcb.set_heap_next_address(heap_base);
        self.heaps.insert(pid, Heap::new(heap_base));
        debug!(
            "pid {}: loaded {} instructions into {} pages, heap at {:#x}",
            pid,
            program.len(),
            code_pages,
            heap_base
        );
        Ok(())
    }

    /// Maps a shared region at the lowest free page between the code image
    /// and the heap base.
    pub fn map_shared_memory(&mut self, pcb: &mut Pcb, region: i32) -> Res<i32> {
        let pid = pcb.pid();
        let page = match usize::try_from(region) {
            Ok(r) if r < SHARED_REGIONS => r as PageId,
            _ => return Err(Fault::InvalidSharedRegion { pid, region }),
        };
        let code_pages = usize::try_from(pcb.code_len())
            .unwrap_or(0)
            .div_ceil(self.page_size) as u32;
        let heap_base = self
            .heaps
            .get(&pid)
            .map_or(pcb.heap_next_address(), |heap| heap.base());
        let heap_vpn = (usize::try_from(heap_base).unwrap_or(0) / self.page_size) as u32;
        let pt = self.page_tables.entry(pid).or_default();
        let vpn = (code_pages..heap_vpn)
            .find(|vpn| !pt.contains_key(vpn))
            .ok_or(Fault::AddressSpaceFull { pid })?;
        pt.insert(vpn, page);
        pcb.update_working_set(page);
        debug!("pid {}: shared region {} mapped at page {}", pid, region, vpn);
        i32::try_from(vpn as usize * self.page_size).map_err(|_| Fault::OutOfMemory { pid })
    }

    pub fn translate(&self, pid: Pid, addr: i32) -> Res<(PageId, usize)> {
        let fault = Fault::PageFault { pid, addr };
        let a = usize::try_from(addr).map_err(|_| fault.clone())?;
        let vpn = u32::try_from(a / self.page_size).map_err(|_| fault.clone())?;
        let page = self
            .page_tables
            .get(&pid)
            .and_then(|pt| pt.get(&vpn))
            .copied()
            .ok_or(fault)?;
        if a % WORD_SIZE != 0 {
            return Err(Fault::UnalignedAccess { pid, addr });
        }
        Ok((page, a % self.page_size))
    }

    fn in_heap(&self, pid: Pid, addr: i32) -> bool {
        self.heaps
            .get(&pid)
            .is_some_and(|heap| heap.base() <= addr && addr < heap.end())
    }

    // Like translate, but a first touch of an unmapped heap page maps a
    // fresh page id that ensure_resident will zero-fill.
    fn resolve(&mut self, pid: Pid, addr: i32) -> Res<(PageId, usize)> {
        match self.translate(pid, addr) {
            Err(Fault::PageFault { .. }) if self.in_heap(pid, addr) => {
                let a = addr as usize;
                if a % WORD_SIZE != 0 {
                    return Err(Fault::UnalignedAccess { pid, addr });
                }
                let page = self.next_page;
                self.next_page += 1;
                self.pages.insert(
                    page,
                    PageInfo {
                        valid: false,
                        dirty: false,
                        last_used: self.clock.now(),
                        pinned: false,
                    },
                );
                self.map(pid, (a / self.page_size) as u32, page);
                Ok((page, a % self.page_size))
            }
            other => other,
        }
    }

    pub fn read_word(&mut self, pid: Pid, addr: i32) -> Res<i32> {
        let (page, offset) = self.resolve(pid, addr)?;
        self.ensure_resident(pid, page)?;
        self.touch(page, false);
        let frame = self
            .frames
            .get(&page)
            .ok_or(Fault::PageFault { pid, addr })?;
        Ok(unpack_word(frame, offset))
    }

    /// Reads a word without paging anything in or touching LRU stamps.
    /// Evicted pages are read from the disk store; never-written ones read 0.
    pub fn peek_word(&self, pid: Pid, addr: i32) -> Res<i32> {
        let (page, offset) = match self.translate(pid, addr) {
            Err(Fault::PageFault { .. }) if self.in_heap(pid, addr) => {
                if addr as usize % WORD_SIZE != 0 {
                    return Err(Fault::UnalignedAccess { pid, addr });
                }
                return Ok(0);
            }
            other => other?,
        };
        match self.frames.get(&page).or_else(|| self.disk.get(&page)) {
            Some(frame) => Ok(unpack_word(frame, offset)),
            None => Ok(0),
        }
    }

    pub fn write_word(&mut self, pcb: &mut Pcb, addr: i32, value: i32) -> Res<()> {
        let pid = pcb.pid();
        let (page, offset) = self.resolve(pid, addr)?;
        self.ensure_resident(pid, page)?;
        self.touch(page, true);
        let frame = self
            .frames
            .get_mut(&page)
            .ok_or(Fault::PageFault { pid, addr })?;
        pack_word(frame, offset, value);
        pcb.update_working_set(page);
        Ok(())
    }

    fn touch(&mut self, page: PageId, write: bool) {
        let now = self.clock.now();
        let Some(info) = self.pages.get_mut(&page) else {
            return;
        };
        if info.valid && !info.pinned {
            self.lru.remove(&(info.last_used, page));
            self.lru.insert((now, page));
        }
        info.last_used = now;
        if write && !info.pinned {
            info.dirty = true;
        }
    }

    fn map(&mut self, pid: Pid, vpn: u32, page: PageId) {
        self.page_tables.entry(pid).or_default().insert(vpn, page);
    }

    // Page fault on a mapped page that is not resident: bring it back from
    // the disk store, or zero-fill it if it was never persisted.
    fn ensure_resident(&mut self, pid: Pid, page: PageId) -> Res<()> {
        match self.pages.get(&page) {
            Some(info) if info.valid => return Ok(()),
            Some(_) => {}
            None => return Err(Fault::OutOfMemory { pid }),
        }
        self.page_faults += 1;
        self.make_room(pid)?;
        let (frame, restored) = match self.disk.remove(&page) {
            Some(frame) => (frame, true),
            None => (self.blank_page(), false),
        };
        self.frames.insert(page, frame);
        let now = self.clock.now();
        if let Some(info) = self.pages.get_mut(&page) {
            info.valid = true;
            info.dirty = restored;
            info.last_used = now;
        }
        self.lru.insert((now, page));
        self.resident += 1;
        debug!(
            "pid {}: page {} paged in ({})",
            pid,
            page,
            if restored { "from disk" } else { "zero-filled" }
        );
        Ok(())
    }

    fn allocate_page(&mut self, pid: Pid) -> Res<PageId> {
        self.make_room(pid)?;
        let page = self.next_page;
        self.next_page += 1;
        let now = self.clock.now();
        self.frames.insert(page, self.blank_page());
        self.pages.insert(
            page,
            PageInfo {
                valid: true,
                dirty: false,
                last_used: now,
                pinned: false,
            },
        );
        self.lru.insert((now, page));
        self.resident += 1;
        Ok(page)
    }

    fn make_room(&mut self, pid: Pid) -> Res<()> {
        while self.resident >= self.capacity {
            self.evict_lru(pid)?;
        }
        Ok(())
    }

    /// Evicts the valid private page with the oldest access stamp. Equal
    /// stamps resolve to the lowest page id.
    fn evict_lru(&mut self, pid: Pid) -> Res<PageId> {
        let (_, victim) = self.lru.pop_first().ok_or(Fault::OutOfMemory { pid })?;
        let frame = self.frames.remove(&victim);
        let info = self
            .pages
            .get_mut(&victim)
            .ok_or(Fault::OutOfMemory { pid })?;
        let persisted = info.dirty;
        if persisted {
            if let Some(frame) = frame {
                self.disk.insert(victim, frame);
                self.disk_writes += 1;
            }
        }
        info.valid = false;
        info.dirty = false;
        self.resident -= 1;
        self.evictions += 1;
        debug!(
            "page {} evicted (last used {}, {})",
            victim,
            info.last_used,
            if persisted { "written to disk" } else { "dropped" }
        );
        Ok(victim)
    }

    /// Carves `size` heap bytes for the process. Backing pages are mapped
    /// when first touched. Returns 0 when the request cannot be satisfied.
    pub fn allocate_heap(&mut self, pcb: &mut Pcb, size: i32) -> Res<i32> {
        let pid = pcb.pid();
        let heap = self
            .heaps
            .entry(pid)
            .or_insert_with(|| Heap::new(pcb.heap_next_address()));
        let Some(block) = heap.allocate(size) else {
            debug!("pid {}: heap request of {} bytes refused", pid, size);
            return Ok(0);
        };
        pcb.set_heap_next_address(heap.end());
        pcb.add_heap_allocation(block);
        debug!("pid {}: allocated {} bytes at {:#x}", pid, block.size, block.addr);
        Ok(block.addr)
    }

    pub fn free_heap(&mut self, pcb: &mut Pcb, addr: i32) -> bool {
        let pid = pcb.pid();
        if pcb.remove_heap_allocation(addr).is_none() {
            debug!("pid {}: free of unknown heap address {:#x}", pid, addr);
            return false;
        }
        let released = self
            .heaps
            .get_mut(&pid)
            .and_then(|heap| heap.release(addr));
        debug!("pid {}: freed heap block at {:#x}", pid, addr);
        released.is_some()
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            resident_pages: self.resident,
            capacity: self.capacity,
            disk_pages: self.disk.len(),
            shared_pages: SHARED_REGIONS,
            page_faults: self.page_faults,
            evictions: self.evictions,
            disk_writes: self.disk_writes,
            pages: self.pages.iter().map(|(id, info)| (*id, *info)).collect(),
        }
    }

    pub fn dump_page(&self, page: PageId) -> Option<String> {
        self.frames.get(&page).map(|frame| format_bytes(frame, None, None))
    }

    pub fn trace_resident(&self) {
        for page in self.frames.keys() {
            if let Some(dump) = self.dump_page(*page) {
                trace!("page {}:\n{}", page, dump);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub resident_pages: usize,
    pub capacity: usize,
    pub disk_pages: usize,
    pub shared_pages: usize,
    pub page_faults: u64,
    pub evictions: u64,
    pub disk_writes: u64,
    pub pages: Vec<(PageId, PageInfo)>,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Memory Statistics:")?;
        writeln!(f, "------------------")?;
        let used = if self.capacity == 0 {
            0.0
        } else {
            self.resident_pages as f64 * 100.0 / self.capacity as f64
        };
        writeln!(
            f,
            "Physical Pages: {}/{} ({:.1}% used)",
            self.resident_pages, self.capacity, used
        )?;
        writeln!(f, "Shared Pages: {}", self.shared_pages)?;
        writeln!(f, "Disk Pages: {}", self.disk_pages)?;
        writeln!(
            f,
            "Page Faults: {}, Evictions: {}, Disk Writes: {}",
            self.page_faults, self.evictions, self.disk_writes
        )?;
        write!(f, "Page States:")?;
        for (page, info) in &self.pages {
            write!(
                f,
                "\nPage {}: {}, {}{}, LastUsed: {}",
                page,
                if info.valid { "Valid" } else { "Invalid" },
                if info.dirty { "Dirty" } else { "Clean" },
                if info.pinned { ", Shared" } else { "" },
                info.last_used
            )?;
        }
        Ok(())
    }
}
