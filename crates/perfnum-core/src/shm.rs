//! The shared-memory region: header, claim bitmap, result table and worker
//! roster, laid out contiguously:
//!
//! ```text
//! [ limit:i64 | manage_pid:i32 | bitmap_sem:sem | bitmap:ceil(L/8) bytes |
//!   result_sem:sem | results:NPERFNUMS x i64 | roster:NPROCS x Proc ]
//! ```
//!
//! `limit` is carried as `i64` rather than `i32` so a caller can use the
//! full host integer width without an arbitrary extra ceiling; nothing
//! else about the layout changes. Everything in this module is built
//! around manual pointer-offset arithmetic into one `mmap`ed region.

use std::ffi::CString;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU8, Ordering};

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use perfnum_config::Settings;

use crate::error::{PerfError, PerfResult};
use crate::sem;

const SENTINEL_PID: i32 = -1;

#[repr(C)]
struct Header {
    limit: AtomicI64,
    manage_pid: AtomicI32,
    _pad: i32,
}

#[repr(C)]
pub struct ProcSlot {
    pid: AtomicI32,
    found: AtomicI32,
    tested: AtomicI32,
}

#[derive(Debug, Clone, Copy)]
pub struct RosterEntry {
    pub pid: i32,
    pub found: i32,
    pub tested: i32,
}

/// Byte offsets of every sub-region, derived once from `limit` and the
/// roster/result-table capacities. Both `create` and `mount` compute this
/// independently and must agree, since it is the thing that makes "derive
/// expected size from limit" meaningful.
struct Layout {
    bitmap_sem_off: usize,
    bitmap_off: usize,
    bitmap_len: usize,
    result_sem_off: usize,
    results_off: usize,
    roster_off: usize,
    total: usize,
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

fn compute_layout(limit: i64, settings: &Settings) -> Layout {
    let header_end = std::mem::size_of::<Header>();

    let bitmap_sem_off = align_up(header_end, std::mem::align_of::<libc::sem_t>());
    let bitmap_off = bitmap_sem_off + std::mem::size_of::<libc::sem_t>();
    let bitmap_len = ((limit.max(0) as usize) + 7) / 8;

    let result_sem_off = align_up(bitmap_off + bitmap_len, std::mem::align_of::<libc::sem_t>());
    let results_off = align_up(
        result_sem_off + std::mem::size_of::<libc::sem_t>(),
        std::mem::align_of::<i64>(),
    );
    let results_len = settings.nperfnums * std::mem::size_of::<i64>();

    let roster_off = align_up(results_off + results_len, std::mem::align_of::<ProcSlot>());
    let roster_len = settings.nprocs * std::mem::size_of::<ProcSlot>();

    let total = roster_off + roster_len;

    Layout {
        bitmap_sem_off,
        bitmap_off,
        bitmap_len,
        result_sem_off,
        results_off,
        roster_off,
        total,
    }
}

/// A mounted (or created) shared-memory region. `base`/`size` describe the
/// whole `mmap`ed extent; every accessor below derives a typed pointer from
/// `layout`'s offsets into it.
pub struct ShmRegion {
    base: *mut u8,
    size: usize,
    layout: Layout,
    fd: OwnedFd,
    name: String,
    owner: bool,
}

// The region is intentionally shared across processes; within this
// process it is safe to hand references across threads too, since every
// mutation goes through atomics or the semaphores.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    fn shm_path(name: &str) -> PerfResult<CString> {
        CString::new(format!("/{name}")).map_err(|e| PerfError::ShmFailure {
            reason: format!("invalid shared-memory name: {e}"),
        })
    }

    /// Create a fresh region for limit `limit`.
    /// Unlinks any pre-existing region at the well-known name first.
    pub fn create(limit: i64, settings: &Settings) -> PerfResult<Self> {
        if limit <= 0 {
            return Err(PerfError::InvalidLimit { limit });
        }

        let path = Self::shm_path(&settings.shm_name)?;
        match shm_unlink(&path) {
            Ok(()) | Err(nix::Error::ENOENT) => {}
            Err(e) => return Err(e.into()),
        }

        let fd = shm_open(
            &path,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;

        let layout = compute_layout(limit, settings);
        if let Err(e) = ftruncate(&fd, layout.total as i64) {
            let _ = shm_unlink(&path);
            return Err(e.into());
        }

        let base = unsafe {
            mmap(
                None,
                std::num::NonZeroUsize::new(layout.total).expect("non-empty region"),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        };
        let base = match base {
            Ok(p) => p.as_ptr() as *mut u8,
            Err(e) => {
                let _ = shm_unlink(&path);
                return Err(e.into());
            }
        };

        let region = ShmRegion {
            base,
            size: layout.total,
            layout,
            fd,
            name: settings.shm_name.clone(),
            owner: true,
        };

        unsafe {
            (*region.header()).limit.store(limit, Ordering::SeqCst);
            (*region.header())
                .manage_pid
                .store(nix::unistd::getpid().as_raw(), Ordering::SeqCst);
            sem::init(region.bitmap_sem_ptr(), 1)?;
            sem::init(region.result_sem_ptr(), 1)?;
            for slot in region.roster_slice() {
                slot.pid.store(SENTINEL_PID, Ordering::SeqCst);
                slot.found.store(0, Ordering::SeqCst);
                slot.tested.store(0, Ordering::SeqCst);
            }
        }

        Ok(region)
    }

    /// Mount an existing region. Fails if the
    /// on-disk size doesn't match the size derived from the stored limit.
    pub fn mount(settings: &Settings) -> PerfResult<Self> {
        let path = Self::shm_path(&settings.shm_name)?;
        let fd = shm_open(&path, OFlag::O_RDWR, Mode::empty())?;

        let (limit, _manage_pid) = read_header_prefix(fd.as_raw_fd())?;
        let layout = compute_layout(limit, settings);

        let actual_size = unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_END) };
        if actual_size < 0 || actual_size as usize != layout.total {
            return Err(PerfError::ShmFailure {
                reason: format!(
                    "region size mismatch: on-disk {actual_size}, expected {} for limit {limit} (foreign or corrupt region)",
                    layout.total
                ),
            });
        }

        let base = unsafe {
            mmap(
                None,
                std::num::NonZeroUsize::new(layout.total).expect("non-empty region"),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        };
        let base = match base {
            Ok(p) => p.as_ptr() as *mut u8,
            Err(e) => return Err(e.into()),
        };

        Ok(ShmRegion {
            base,
            size: layout.total,
            layout,
            fd,
            name: settings.shm_name.clone(),
            owner: false,
        })
    }

    fn header(&self) -> *mut Header {
        self.base as *mut Header
    }

    fn bitmap_sem_ptr(&self) -> *mut libc::sem_t {
        unsafe { self.base.add(self.layout.bitmap_sem_off) as *mut libc::sem_t }
    }

    fn result_sem_ptr(&self) -> *mut libc::sem_t {
        unsafe { self.base.add(self.layout.result_sem_off) as *mut libc::sem_t }
    }

    fn bitmap_slice(&self) -> &[AtomicU8] {
        unsafe {
            std::slice::from_raw_parts(
                self.base.add(self.layout.bitmap_off) as *const AtomicU8,
                self.layout.bitmap_len,
            )
        }
    }

    fn results_slice(&self) -> &[AtomicI64] {
        let count = (self.layout.roster_off - self.layout.results_off) / std::mem::size_of::<i64>();
        unsafe {
            std::slice::from_raw_parts(
                self.base.add(self.layout.results_off) as *const AtomicI64,
                count,
            )
        }
    }

    fn roster_slice(&self) -> &[ProcSlot] {
        let count = (self.size - self.layout.roster_off) / std::mem::size_of::<ProcSlot>();
        unsafe {
            std::slice::from_raw_parts(self.base.add(self.layout.roster_off) as *const ProcSlot, count)
        }
    }

    pub fn limit(&self) -> i64 {
        unsafe { (*self.header()).limit.load(Ordering::SeqCst) }
    }

    pub fn manage_pid(&self) -> i32 {
        unsafe { (*self.header()).manage_pid.load(Ordering::SeqCst) }
    }

    /// Claim the next untested candidate via double-check-and-set under
    /// the bitmap semaphore. `scan_from` is
    /// advanced across calls so a worker doesn't rescan from zero every time.
    pub fn claim_next(&self, scan_from: &mut usize) -> PerfResult<Option<i64>> {
        let bitmap = self.bitmap_slice();
        let limit = self.limit();

        loop {
            let Some(bit) = first_zero_bit_from(bitmap, limit as usize, *scan_from) else {
                return Ok(None);
            };

            unsafe { sem::wait(self.bitmap_sem_ptr())? };
            let byte = bit / 8;
            let mask = 1u8 << (bit % 8);
            let before = bitmap[byte].fetch_or(mask, Ordering::SeqCst);
            unsafe { sem::post(self.bitmap_sem_ptr())? };

            if before & mask == 0 {
                *scan_from = bit + 1;
                return Ok(Some(bit as i64 + 1));
            }
            // Lost the race under the lock; someone else claimed it first.
            *scan_from = bit + 1;
        }
    }

    /// The lowest untested integer, or `None` if every candidate in
    /// `[1, limit]` has been claimed.
    pub fn lowest_untested(&self) -> Option<i64> {
        let bitmap = self.bitmap_slice();
        first_zero_bit_from(bitmap, self.limit() as usize, 0).map(|bit| bit as i64 + 1)
    }

    /// Insert `n` into the first empty result slot.
    pub fn insert_result(&self, n: i64) -> PerfResult<()> {
        unsafe { sem::wait(self.result_sem_ptr())? };
        let result = (|| {
            for slot in self.results_slice() {
                if slot
                    .compare_exchange(0, n, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Ok(());
                }
            }
            Err(PerfError::ResourceFull {
                what: "result table".into(),
            })
        })();
        unsafe { sem::post(self.result_sem_ptr())? };
        result
    }

    /// Every non-zero result-table entry, in slot order.
    pub fn results(&self) -> Vec<i64> {
        self.results_slice()
            .iter()
            .map(|s| s.load(Ordering::SeqCst))
            .filter(|&v| v != 0)
            .collect()
    }

    /// Insert this process into the first free roster slot. Returns the
    /// slot index for later `clear_self`/counter calls.
    pub fn insert_self(&self, pid: i32) -> PerfResult<usize> {
        for (idx, slot) in self.roster_slice().iter().enumerate() {
            if slot
                .pid
                .compare_exchange(SENTINEL_PID, pid, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                slot.found.store(0, Ordering::SeqCst);
                slot.tested.store(0, Ordering::SeqCst);
                return Ok(idx);
            }
        }
        Err(PerfError::ResourceFull {
            what: "worker roster".into(),
        })
    }

    /// Clear this worker's roster slot on normal exit.
    pub fn clear_self(&self, idx: usize) {
        self.roster_slice()[idx].pid.store(SENTINEL_PID, Ordering::SeqCst);
    }

    pub fn record_found(&self, idx: usize) {
        self.roster_slice()[idx].found.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_tested(&self, idx: usize) {
        self.roster_slice()[idx].tested.fetch_add(1, Ordering::SeqCst);
    }

    /// Every currently-live roster entry. A worker that already cleared
    /// its slot on exit does not contribute to the live sum — this is the
    /// live roster, not a running total across the whole run.
    pub fn live_roster(&self) -> Vec<RosterEntry> {
        self.roster_slice()
            .iter()
            .filter_map(|slot| {
                let pid = slot.pid.load(Ordering::SeqCst);
                if pid == SENTINEL_PID {
                    None
                } else {
                    Some(RosterEntry {
                        pid,
                        found: slot.found.load(Ordering::SeqCst),
                        tested: slot.tested.load(Ordering::SeqCst),
                    })
                }
            })
            .collect()
    }

    /// Total candidates tested, summed across currently-live roster
    /// entries.
    pub fn total_tested(&self) -> i64 {
        self.live_roster().iter().map(|e| e.tested as i64).sum()
    }

    /// Signal every still-live worker with the interactive-interrupt
    /// signal, best-effort.
    pub fn signal_live_workers(&self) {
        for entry in self.live_roster() {
            let pid = nix::unistd::Pid::from_raw(entry.pid);
            if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGINT) {
                tracing::warn!(pid = entry.pid, %e, "failed to signal worker during teardown");
            }
        }
    }

    /// Owner-only teardown: signal live
    /// workers, destroy both semaphores, unlink the region.
    pub fn teardown(self) {
        if !self.owner {
            tracing::warn!("teardown() called on a mounted (non-owned) region; ignoring unlink");
            return;
        }
        self.signal_live_workers();
        unsafe {
            sem::destroy(self.bitmap_sem_ptr());
            sem::destroy(self.result_sem_ptr());
        }
        if let Ok(path) = Self::shm_path(&self.name) {
            if let Err(e) = shm_unlink(&path) {
                tracing::warn!(%e, "shm_unlink failed during teardown");
            }
        }
        // Drop still runs and unmaps; it must not unlink again.
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(
                std::ptr::NonNull::new(self.base as *mut std::ffi::c_void).expect("mapped region"),
                self.size,
            );
        }
        let _ = nix::unistd::close(self.fd);
    }
}

fn first_zero_bit_from(bitmap: &[AtomicU8], limit: usize, start_bit: usize) -> Option<usize> {
    for bit in start_bit..limit {
        let byte = bitmap[bit / 8].load(Ordering::SeqCst);
        if byte & (1 << (bit % 8)) == 0 {
            return Some(bit);
        }
    }
    None
}

fn read_header_prefix(fd: RawFd) -> PerfResult<(i64, i32)> {
    let mut buf = [0u8; std::mem::size_of::<Header>()];
    let n = unsafe {
        libc::pread(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
        )
    };
    if n < 0 || n as usize != buf.len() {
        return Err(PerfError::ShmFailure {
            reason: format!("pread header: {}", std::io::Error::last_os_error()),
        });
    }
    let limit = i64::from_ne_bytes(buf[0..8].try_into().unwrap());
    let manage_pid = i32::from_ne_bytes(buf[8..12].try_into().unwrap());
    Ok((limit, manage_pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings(name: &str) -> Settings {
        let mut s = Settings::default();
        s.shm_name = format!("perfnum-test-{name}-{}", std::process::id());
        s
    }

    #[test]
    fn create_then_mount_agree_on_size() {
        let settings = test_settings("create-mount");
        let created = ShmRegion::create(100, &settings).unwrap();
        assert_eq!(created.limit(), 100);
        assert_eq!(created.manage_pid(), nix::unistd::getpid().as_raw());

        let mounted = ShmRegion::mount(&settings).unwrap();
        assert_eq!(mounted.limit(), 100);
        assert_eq!(mounted.size, created.size);

        created.teardown();
    }

    #[test]
    fn claim_next_never_returns_the_same_bit_twice() {
        let settings = test_settings("claim");
        let region = ShmRegion::create(16, &settings).unwrap();
        let mut scan = 0usize;
        let mut seen = std::collections::HashSet::new();
        while let Some(n) = region.claim_next(&mut scan).unwrap() {
            assert!(seen.insert(n), "candidate {n} claimed twice");
        }
        assert_eq!(seen.len(), 16);
        region.teardown();
    }

    #[test]
    fn insert_result_fills_first_empty_slot_and_rejects_overflow() {
        let settings = test_settings("results");
        let region = ShmRegion::create(10, &settings).unwrap();
        region.insert_result(6).unwrap();
        region.insert_result(28).unwrap();
        assert_eq!(region.results(), vec![6, 28]);

        for i in 0..(settings.nperfnums - 2) {
            region.insert_result(1000 + i as i64).unwrap();
        }
        let err = region.insert_result(999_999).unwrap_err();
        assert!(matches!(err, PerfError::ResourceFull { .. }));
        region.teardown();
    }

    #[test]
    fn roster_insert_and_clear_round_trip() {
        let settings = test_settings("roster");
        let region = ShmRegion::create(10, &settings).unwrap();
        let idx = region.insert_self(4242).unwrap();
        region.record_tested(idx);
        region.record_tested(idx);
        region.record_found(idx);

        let live = region.live_roster();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].pid, 4242);
        assert_eq!(live[0].tested, 2);
        assert_eq!(live[0].found, 1);

        region.clear_self(idx);
        assert!(region.live_roster().is_empty());
        region.teardown();
    }

    #[test]
    fn mount_rejects_size_mismatch_against_a_foreign_limit() {
        let settings = test_settings("mismatch");
        let created = ShmRegion::create(10, &settings).unwrap();

        let mut other = settings.clone();
        other.shm_name = settings.shm_name.clone();
        // Mounting with a settings struct that computes a different
        // per-slot layout (smaller nperfnums) must not silently accept
        // a region sized for the original layout.
        other.nperfnums = settings.nperfnums + 1;
        let err = ShmRegion::mount(&other).unwrap_err();
        assert!(matches!(err, PerfError::ShmFailure { .. }));

        created.teardown();
    }
}
