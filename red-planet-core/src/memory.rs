//! Flat memory image and the two-level, latency-modeling cache hierarchy sitting in front of it.
//!
//! Three layers, leaves first: [`MemoryStorage`] is the flat word-addressed image. [`UncachedMem`]
//! wraps it with a fixed request/response latency. [`CachedMem`] layers a code cache and a data
//! cache on top, each with LRU-by-timestamp eviction and unconditional write-back.

use log::{debug, trace};

/// Total memory size, in words.
pub const MEM_SIZE_WORDS: usize = 1024 * 1024;

const LINE_SIZE_BYTES: u32 = 128;
const LINE_SIZE_WORDS: usize = (LINE_SIZE_BYTES / 4) as usize;
const CODE_CACHE_BYTES: usize = 1024;
const DATA_CACHE_BYTES: usize = 4096;
const CODE_CACHE_ENTRIES: usize = CODE_CACHE_BYTES / LINE_SIZE_BYTES as usize;
const DATA_CACHE_ENTRIES: usize = DATA_CACHE_BYTES / LINE_SIZE_BYTES as usize;

type Line = [u32; LINE_SIZE_WORDS];

fn to_word_addr(addr: u32) -> usize {
    (addr >> 2) as usize
}

fn line_addr(addr: u32) -> u32 {
    addr & !(LINE_SIZE_BYTES - 1)
}

fn line_offset(addr: u32) -> usize {
    to_word_addr(addr) & (LINE_SIZE_WORDS - 1)
}

/// A single request kind handled by [`UncachedMem`] / [`CachedMem`]: either an instruction fetch
/// or a load/store, carrying the word address and (for stores) the data to write.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    Fetch { addr: u32 },
    Load { addr: u32 },
    Store { addr: u32, data: u32 },
}

impl Access {
    fn addr(&self) -> u32 {
        match *self {
            Access::Fetch { addr } | Access::Load { addr } | Access::Store { addr, .. } => addr,
        }
    }
}

/// Flat, word-addressed memory image. Byte addresses are divided by 4 for indexing; subword
/// accesses are not modeled (every access in this simulator is a 32-bit word).
#[derive(Clone)]
pub struct MemoryStorage {
    words: Vec<u32>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            words: vec![0; MEM_SIZE_WORDS],
        }
    }

    pub fn read(&self, addr: u32) -> u32 {
        self.words[to_word_addr(addr)]
    }

    pub fn write(&mut self, addr: u32, data: u32) {
        self.words[to_word_addr(addr)] = data;
    }

    /// Raw byte-level view of the image, used by the ELF loader.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck_words_as_bytes_mut(&mut self.words)
    }
}

fn bytemuck_words_as_bytes_mut(words: &mut [u32]) -> &mut [u8] {
    // SAFETY: `u32` has no padding and any byte pattern is valid, so reinterpreting the backing
    // words as a byte slice of 4x the length is sound as long as alignment is respected, which it
    // is since we hand back a pointer derived from the original `Vec<u32>` allocation.
    let len = words.len() * 4;
    unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, len) }
}

/// Fixed-latency wrapper around [`MemoryStorage`], modeling a single outstanding request.
pub struct UncachedMem {
    storage: MemoryStorage,
    requested_addr: u32,
    wait_cycles: u32,
    latency: u32,
}

impl UncachedMem {
    pub fn new(storage: MemoryStorage, latency: u32) -> Self {
        Self {
            storage,
            requested_addr: 0,
            wait_cycles: 0,
            latency,
        }
    }

    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut MemoryStorage {
        &mut self.storage
    }

    fn request(&mut self, addr: u32) {
        if addr != self.requested_addr {
            self.requested_addr = addr;
            self.wait_cycles = self.latency;
        }
    }

    fn response(&self) -> Option<u32> {
        (self.wait_cycles == 0).then(|| self.storage.read(self.requested_addr))
    }

    /// Bypasses the latency counter; used by [`CachedMem`] for line fills and write-backs.
    fn raw_read(&self, addr: u32) -> u32 {
        self.storage.read(addr)
    }

    fn raw_write(&mut self, addr: u32, data: u32) {
        self.storage.write(addr, data);
    }

    fn clock(&mut self) {
        if self.wait_cycles > 0 {
            self.wait_cycles -= 1;
        }
    }
}

#[derive(Clone, Copy)]
struct CacheEntry {
    tag: u32,
    last_used: u64,
    line: Line,
}

impl CacheEntry {
    const EMPTY: Self = Self {
        tag: 0,
        last_used: 0,
        line: [0; LINE_SIZE_WORDS],
    };
}

enum Lookup {
    Hit { index: usize },
    Miss { line_addr: u32 },
}

/// A single direct-lookup cache: a flat, linearly-scanned table of lines with LRU-by-timestamp
/// eviction (ties broken by lowest index) and unconditional write-back of the evicted line.
struct Cache {
    entries: Vec<CacheEntry>,
    hit_latency: u32,
    miss_latency: u32,
    // Address of the request currently parked in `pending`, so repeated calls to `request` on
    // consecutive ticks of the same in-flight access don't restart its latency countdown. Cleared
    // the moment `pending` is consumed, so a later, unrelated request to the same address is not
    // mistaken for the same one still in flight.
    last_request_addr: Option<u32>,
    pending: Option<(Lookup, usize)>, // (lookup result, word offset within the line)
    wait_cycles: u32,
}

impl Cache {
    fn new(entry_count: usize, hit_latency: u32, miss_latency: u32) -> Self {
        Self {
            entries: vec![CacheEntry::EMPTY; entry_count],
            hit_latency,
            miss_latency,
            last_request_addr: None,
            pending: None,
            wait_cycles: 0,
        }
    }

    fn request(&mut self, addr: u32) {
        if self.last_request_addr == Some(addr) {
            return;
        }
        self.last_request_addr = Some(addr);
        let line = line_addr(addr);
        let offset = line_offset(addr);
        let found = self.entries.iter().position(|e| e.last_used != 0 && e.tag == line);
        match found {
            Some(index) => {
                self.wait_cycles = self.hit_latency;
                self.pending = Some((Lookup::Hit { index }, offset));
            }
            None => {
                self.wait_cycles = self.miss_latency;
                self.pending = Some((Lookup::Miss { line_addr: line }, offset));
            }
        }
    }

    fn evict_victim(&self) -> usize {
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(i, _)| i)
            .unwrap()
    }

    fn clock(&mut self) {
        if self.wait_cycles > 0 {
            self.wait_cycles -= 1;
        }
    }
}

/// Two-level cache (code + data) in front of [`UncachedMem`]. The two caches share a single
/// outstanding request: only one of a fetch or a data access is ever in flight, which keeps the
/// [`crate::cpu::Cpu`] state machine a single sequential pipeline.
pub struct CachedMem {
    mem: UncachedMem,
    code: Cache,
    data: Cache,
}

pub const L_HIT_CODE: u32 = 1;
pub const L_HIT_DATA: u32 = 3;
pub const L_MISS: u32 = 152;

impl CachedMem {
    pub fn new(mem: UncachedMem) -> Self {
        Self {
            mem,
            code: Cache::new(CODE_CACHE_ENTRIES, L_HIT_CODE, L_MISS),
            data: Cache::new(DATA_CACHE_ENTRIES, L_HIT_DATA, L_MISS),
        }
    }

    /// Overrides the cache miss penalty for both the code and data caches.
    pub fn set_miss_latency(&mut self, latency: u32) {
        self.code.miss_latency = latency;
        self.data.miss_latency = latency;
    }

    pub fn storage(&self) -> &MemoryStorage {
        self.mem.storage()
    }

    pub fn storage_mut(&mut self) -> &mut MemoryStorage {
        self.mem.storage_mut()
    }

    /// True while a fetch or data access issued this tick or earlier is still outstanding.
    pub fn is_busy(&self) -> bool {
        self.code.wait_cycles > 0 || self.data.wait_cycles > 0
    }

    pub fn request(&mut self, access: Access) {
        match access {
            Access::Fetch { addr } => self.code.request(addr),
            Access::Load { addr } | Access::Store { addr, .. } => self.data.request(addr),
        }
    }

    /// Polls the code cache for a fetch issued with [`Access::Fetch`]. Returns `None` while the
    /// access is still outstanding.
    pub fn response_fetch(&mut self, cycle: u64) -> Option<u32> {
        if self.code.wait_cycles > 0 {
            return None;
        }
        let (lookup, offset) = self.code.pending.take()?;
        self.code.last_request_addr = None;
        match lookup {
            Lookup::Hit { index } => {
                self.code.entries[index].last_used = cycle;
                trace!("code cache hit at entry {index}");
                Some(self.code.entries[index].line[offset])
            }
            Lookup::Miss { line_addr } => {
                let line = self.fill_line(line_addr);
                let victim = self.code.evict_victim();
                self.writeback_if_occupied(self.code.entries[victim]);
                self.code.entries[victim] = CacheEntry {
                    tag: line_addr,
                    last_used: cycle,
                    line,
                };
                debug!("code cache miss, filled line {line_addr:#010x} into entry {victim}");
                Some(line[offset])
            }
        }
    }

    /// Polls the data cache for a load/store issued with [`Access::Load`]/[`Access::Store`].
    /// Returns `None` while the access is still outstanding; otherwise the result of a load (the
    /// stored word for a store is not meaningful and is `0`).
    pub fn response_data(&mut self, access: Access, cycle: u64) -> Option<u32> {
        if self.data.wait_cycles > 0 {
            return None;
        }
        let (lookup, offset) = self.data.pending.take()?;
        self.data.last_request_addr = None;
        match lookup {
            Lookup::Hit { index } => {
                self.data.entries[index].last_used = cycle;
                match access {
                    Access::Load { .. } => {
                        trace!("data cache hit at entry {index}");
                        Some(self.data.entries[index].line[offset])
                    }
                    Access::Store { data, .. } => {
                        self.data.entries[index].line[offset] = data;
                        trace!("data cache hit at entry {index} (store)");
                        Some(0)
                    }
                    Access::Fetch { .. } => unreachable!("fetches never hit the data cache"),
                }
            }
            Lookup::Miss { line_addr } => {
                // A store miss writes through to backing memory *before* the line fill, so the
                // refilled line observes the new value at the stored offset.
                if let Access::Store { addr, data } = access {
                    self.mem.raw_write(addr, data);
                }
                let line = self.fill_line(line_addr);
                let victim = self.data.evict_victim();
                self.writeback_if_occupied(self.data.entries[victim]);
                self.data.entries[victim] = CacheEntry {
                    tag: line_addr,
                    last_used: cycle,
                    line,
                };
                debug!("data cache miss, filled line {line_addr:#010x} into entry {victim}");
                match access {
                    Access::Load { .. } => Some(line[offset]),
                    Access::Store { .. } => Some(0),
                    Access::Fetch { .. } => unreachable!("fetches never hit the data cache"),
                }
            }
        }
    }

    fn fill_line(&self, line_addr: u32) -> Line {
        let mut line = [0u32; LINE_SIZE_WORDS];
        for (i, word) in line.iter_mut().enumerate() {
            *word = self.mem.raw_read(line_addr + 4 * i as u32);
        }
        line
    }

    fn writeback_if_occupied(&mut self, victim: CacheEntry) {
        if victim.last_used == 0 {
            return;
        }
        for (i, word) in victim.line.iter().enumerate() {
            self.mem.raw_write(victim.tag + 4 * i as u32, *word);
        }
    }

    pub fn clock(&mut self) {
        self.mem.clock();
        self.code.clock();
        self.data.clock();
    }
}
