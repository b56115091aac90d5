/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The io_uring read engine: slot pool, submission, and completion dispatch.
//!
//! # Safety model
//!
//! The kernel writes to slot buffers via DMA, which is invisible to the Rust
//! compiler. To avoid aliasing UB we **never** form `&[u8]` or `&mut [u8]`
//! references to the backing allocation while any IO is in-flight. Instead
//! we:
//!
//! 1. Obtain the base raw pointer (`*mut u8`) **once** at construction —
//!    before any IO is submitted — and store it for later use.
//! 2. Pass raw pointers to io_uring for kernel DMA targets.
//! 3. Only materialise `&[u8]` slices via [`std::slice::from_raw_parts`] for
//!    slots in the `Completed` state (kernel has finished writing) that have
//!    been handed to exactly one worker by [`ReadEngine::wait`].
//!
//! Slot lifecycle: `Free → InFlight → Completed → (InFlight | Retired)`.
//!
//! # Dispatch model
//!
//! A single ring serves every worker. io_uring has no multi-consumer wait, so
//! the ring lives behind a `Mutex` and completions fan out through a small
//! ready-queue plus a condvar: whichever worker arrives at an empty queue
//! while reads are in the kernel becomes the reaper and blocks in
//! `submit_and_wait(1)`; everyone else either picks up a buffered completion
//! or parks until one is produced. Any worker may therefore receive any
//! completion, and a worker blocks only at the dispatcher — never while
//! hashing or scattering digests.
//!
//! Termination is decentralized. [`ReadEngine::submit`] claims the cursor
//! and, on exhaustion, retires the slot; once the last slot retires, every
//! parked worker wakes and observes the drained state for itself. No
//! sentinel messages, no shutdown coordinator.

use std::{
    collections::VecDeque,
    fs::File,
    os::fd::AsRawFd,
    sync::{Condvar, Mutex, MutexGuard},
};

use io_uring::{opcode, types, IoUring};

use disksum::{RunLayout, SumError, SumErrorKind, SumResult};

use crate::aligned::AlignedBuffer;
use crate::pipeline::cursor::BlockCursor;

/// Minimum alignment of slot buffers; raised to the device's logical sector
/// size when that is larger.
pub const BUFFER_ALIGNMENT: usize = 4096;

/// State of each request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Slot has never carried a read.
    Free,
    /// SQE submitted; the kernel may be DMA-ing into the slot's buffer.
    InFlight,
    /// CQE reaped — data is ready. Safe to create `&[u8]`.
    Completed,
    /// The cursor drained before this slot could be re-armed; it has left
    /// the pipeline for good.
    Retired,
}

/// A completed read, as delivered to a worker: the slot identity (sufficient
/// to recover its buffer) and the device offset the read was issued at.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub slot: usize,
    pub offset: u64,
}

/// Outcome of [`ReadEngine::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A fresh block was claimed and its read is in flight.
    Submitted,
    /// The cursor is exhausted; the slot has been retired.
    Drained,
}

/// Everything the ring lock protects.
struct RingState {
    ring: IoUring,
    /// Reaped completions not yet claimed by a worker.
    ready: VecDeque<Completion>,
    /// Device offset of each slot's pending (or delivered) read.
    offsets: Vec<u64>,
    states: Vec<SlotState>,
    /// Reads submitted to the kernel and not yet reaped.
    in_kernel: usize,
    /// Slots that have not been retired.
    active: usize,
    /// Set on the first fatal failure; unblocks every worker with an error.
    failed: bool,
}

/// The bounded read pipeline over one device.
pub struct ReadEngine {
    state: Mutex<RingState>,
    completions: Condvar,
    cursor: BlockCursor,
    /// Raw pointer to the start of the slot pool, obtained once at
    /// construction. All slot access goes through pointer arithmetic on this
    /// base.
    buf_base: *mut u8,
    /// Owns the aligned allocation. **Must not be dereferenced** while any IO
    /// is in-flight — see the module-level safety discussion.
    _buffers: AlignedBuffer,
    io_block_sz: usize,
    read_len: u32,
    device_size: u64,
    queue_depth: usize,
    /// Keeps the registered descriptor alive for the lifetime of the ring.
    _device: File,
}

// SAFETY: `buf_base` is derived from an owned allocation (`_buffers`); every
// mutable access to a slot's bytes happens either in the kernel (between
// submit and reap) or under the state mutex (tail zeroing in `reap`), and a
// slot's bytes are only borrowed by the single worker its completion was
// delivered to. The ring is serialized by the state mutex.
unsafe impl Send for ReadEngine {}
unsafe impl Sync for ReadEngine {}

impl ReadEngine {
    /// Build the engine: ring sized to `queue_depth`, the device descriptor
    /// registered with it, and one zeroed pool carrying `queue_depth` slot
    /// buffers of `layout.io_block_sz` bytes each.
    pub fn new(
        device: File,
        layout: &RunLayout,
        queue_depth: usize,
        buffer_alignment: usize,
    ) -> SumResult<Self> {
        let read_len = u32::try_from(layout.io_block_sz)?;

        let ring = IoUring::new(queue_depth as u32).map_err(SumError::io)?;
        let fd = device.as_raw_fd();
        ring.submitter()
            .register_files(std::slice::from_ref(&fd))
            .map_err(SumError::io)?;

        let mut buffers = AlignedBuffer::new(queue_depth * layout.io_block_sz, buffer_alignment)?;

        // SAFETY: no IOs are in-flight yet, so taking the base pointer is
        // sound. No reference to the allocation is formed after this point.
        let buf_base: *mut u8 = buffers.as_mut_ptr();

        Ok(Self {
            state: Mutex::new(RingState {
                ring,
                ready: VecDeque::with_capacity(queue_depth),
                offsets: vec![0; queue_depth],
                states: vec![SlotState::Free; queue_depth],
                in_kernel: 0,
                active: queue_depth,
                failed: false,
            }),
            completions: Condvar::new(),
            cursor: BlockCursor::new(layout.block_count),
            buf_base,
            _buffers: buffers,
            io_block_sz: layout.io_block_sz,
            read_len,
            device_size: layout.device_size,
            queue_depth,
            _device: device,
        })
    }

    /// Issue the initial window of reads, one per slot.
    ///
    /// On devices smaller than the window some slots drain immediately; that
    /// is not an error.
    pub fn prime(&self) -> SumResult<()> {
        for slot in 0..self.queue_depth {
            self.submit(slot)?;
        }
        Ok(())
    }

    /// Bind `slot` to the next unclaimed block and start its read.
    ///
    /// Claiming and submitting are paired so that exhaustion discovered by
    /// one worker retires its slot on the spot, without blocking any other
    /// worker.
    pub fn submit(&self, slot: usize) -> SumResult<SubmitOutcome> {
        debug_assert!(slot < self.queue_depth);

        let Some(idx) = self.cursor.claim() else {
            let mut st = self.lock_state()?;
            debug_assert!(matches!(
                st.states[slot],
                SlotState::Free | SlotState::Completed
            ));
            st.states[slot] = SlotState::Retired;
            st.active -= 1;
            if st.active == 0 {
                self.completions.notify_all();
            }
            return Ok(SubmitOutcome::Drained);
        };

        let offset = idx * self.io_block_sz as u64;
        let buf_ptr = unsafe { self.buf_base.add(slot * self.io_block_sz) };
        let read_op = opcode::Read::new(types::Fixed(0), buf_ptr, self.read_len)
            .offset(offset)
            .build()
            .user_data(slot as u64);

        let mut st = self.lock_state()?;
        if st.failed {
            return Err(Self::aborted());
        }
        debug_assert!(matches!(
            st.states[slot],
            SlotState::Free | SlotState::Completed
        ));
        st.offsets[slot] = offset;
        st.states[slot] = SlotState::InFlight;

        // SAFETY: `buf_ptr` points into the pre-allocated pool and stays
        // valid until the CQE is reaped; `Drop` drains all in-flight reads
        // before the pool is freed. The slot was owned by the caller, so no
        // other code touches this region while the kernel writes it.
        let push_result = unsafe { st.ring.submission().push(&read_op) };
        if let Err(err) = push_result {
            st.failed = true;
            self.completions.notify_all();
            return Err(SumError::push(err));
        }

        if let Err(err) = Self::ring_submit(&mut st.ring) {
            st.failed = true;
            self.completions.notify_all();
            return Err(err);
        }

        st.in_kernel += 1;
        // A parked worker can become the reaper now.
        self.completions.notify_one();
        Ok(SubmitOutcome::Submitted)
    }

    /// Block until a completed read is available, or until the pipeline is
    /// drained. No timeout.
    ///
    /// Returns `Ok(None)` exactly once per caller when every slot has
    /// retired.
    pub fn wait(&self) -> SumResult<Option<Completion>> {
        let mut st = self.lock_state()?;
        loop {
            if st.failed {
                return Err(Self::aborted());
            }
            if let Some(completion) = st.ready.pop_front() {
                return Ok(Some(completion));
            }
            if st.active == 0 {
                return Ok(None);
            }
            if st.in_kernel > 0 {
                // Become the reaper. Blocking in the kernel while holding
                // the lock is safe: the in-kernel reads this branch is
                // predicated on are guaranteed to complete, and the lock is
                // what serializes the ring.
                let reaped = Self::ring_wait(&mut st.ring).and_then(|_| self.reap(&mut st));
                if let Err(err) = reaped {
                    st.failed = true;
                    self.completions.notify_all();
                    return Err(err);
                }
                continue;
            }
            // Nothing buffered, nothing in the kernel, but other workers
            // still hold live slots: park until one submits or retires.
            st = self
                .completions
                .wait(st)
                .map_err(|_| SumError::lock_poison("completion dispatcher"))?;
        }
    }

    /// Borrow the buffer of a completed slot.
    ///
    /// The caller must be the worker the slot's completion was delivered to,
    /// and must drop the borrow before re-submitting the slot.
    pub fn slot_buf(&self, slot: usize) -> &[u8] {
        debug_assert!(slot < self.queue_depth);
        #[cfg(debug_assertions)]
        if let Ok(st) = self.state.lock() {
            debug_assert_eq!(st.states[slot], SlotState::Completed, "slot {slot}");
        }

        // SAFETY: the slot is Completed — the kernel has finished writing —
        // and ownership was transferred to the calling worker by `wait`.
        // `buf_base` is a valid allocation covering all slots.
        unsafe {
            std::slice::from_raw_parts(self.buf_base.add(slot * self.io_block_sz), self.io_block_sz)
        }
    }

    /// Poison the pipeline so every worker unblocks with an error.
    pub fn abort(&self) {
        if let Ok(mut st) = self.state.lock() {
            st.failed = true;
        }
        self.completions.notify_all();
    }

    pub fn block_count(&self) -> u64 {
        self.cursor.block_count()
    }

    /// Drain every available CQE into the ready queue.
    ///
    /// Kernel-reported errors and unexpected short reads are fatal; a short
    /// read is tolerated only where the rounded-up range crosses the device
    /// end, in which case the unread tail of the buffer is zero-filled so
    /// tail digests are deterministic. All CQEs are consumed before the
    /// first error is returned.
    fn reap(&self, st: &mut RingState) -> SumResult<()> {
        let RingState {
            ring,
            ready,
            offsets,
            states,
            in_kernel,
            active,
            ..
        } = st;

        let mut first_error: Option<SumError> = None;

        for cqe in ring.completion() {
            let slot = cqe.user_data() as usize;
            debug_assert!(slot < self.queue_depth);
            debug_assert_eq!(states[slot], SlotState::InFlight);
            *in_kernel -= 1;

            let offset = offsets[slot];
            let result = cqe.result();

            if result < 0 {
                states[slot] = SlotState::Retired;
                *active -= 1;
                if first_error.is_none() {
                    first_error = Some(
                        SumError::io(std::io::Error::from_raw_os_error(-result))
                            .context(format!("read failed at device offset {offset}")),
                    );
                }
                continue;
            }

            let n = result as usize;
            if n < self.io_block_sz {
                if offset + n as u64 >= self.device_size {
                    // The rounded-up tail crosses the device end. SAFETY:
                    // the CQE has been reaped, so the kernel is done with
                    // this buffer, and the slot is not yet visible to any
                    // worker.
                    unsafe {
                        std::ptr::write_bytes(
                            self.buf_base.add(slot * self.io_block_sz + n),
                            0,
                            self.io_block_sz - n,
                        );
                    }
                } else {
                    states[slot] = SlotState::Retired;
                    *active -= 1;
                    if first_error.is_none() {
                        first_error = Some(SumError::io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!(
                                "short read at device offset {offset}: expected {} bytes, got {n}",
                                self.io_block_sz
                            ),
                        )));
                    }
                    continue;
                }
            }

            states[slot] = SlotState::Completed;
            ready.push_back(Completion { slot, offset });
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                if !ready.is_empty() {
                    // Wake parked workers for any extra completions beyond
                    // the one the reaper itself will take.
                    self.completions.notify_all();
                }
                Ok(())
            }
        }
    }

    fn ring_submit(ring: &mut IoUring) -> SumResult<()> {
        loop {
            match ring.submit() {
                Ok(_) => return Ok(()),
                Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => return Err(SumError::io(err)),
            }
        }
    }

    fn ring_wait(ring: &mut IoUring) -> SumResult<()> {
        loop {
            match ring.submit_and_wait(1) {
                Ok(_) => return Ok(()),
                Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => return Err(SumError::io(err)),
            }
        }
    }

    fn lock_state(&self) -> SumResult<MutexGuard<'_, RingState>> {
        self.state
            .lock()
            .map_err(|_| SumError::lock_poison("read engine state"))
    }

    fn aborted() -> SumError {
        SumError::message(
            SumErrorKind::IOError,
            "read pipeline aborted by an earlier failure",
        )
    }
}

impl Drop for ReadEngine {
    fn drop(&mut self) {
        // Must wait for all in-flight kernel IOs to complete before the
        // allocation backing `_buffers` is freed.
        let st = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut remaining = st.in_kernel;
        while remaining > 0 {
            match st.ring.submit_and_wait(remaining) {
                Ok(_) => {}
                Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(_) => {
                    // Cannot safely deallocate while the kernel may still
                    // hold DMA references.
                    std::process::abort();
                }
            }
            for cqe in st.ring.completion() {
                let _ = cqe;
                remaining = remaining.saturating_sub(1);
            }
        }
        st.in_kernel = 0;
    }
}
