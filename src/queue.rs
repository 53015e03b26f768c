// ============================================================================
// src/queue.rs - Audio Block Queue
// ============================================================================
//!
//! クライアントが投入したブロックの FIFO と、再生し終えたブロックを
//! クライアントへ返す完了キュー。
//!
//! - `pending`: 呼び出し側と割り込みハンドラが共有する唯一の状態。
//!   呼び出し側は割り込みを禁止した上でロックする
//! - `completions`: 割り込みハンドラが積み、遅延コンテキストが取り出す SPSC リング
//!
//! 投入数は `pending + 未通知の完了` で制限されるので、完了キューが
//! 溢れることはない。

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use log::{error, warn};
use spin::Mutex;

use crate::error::{HdaError, HdaResult};
use crate::hal::CompletionScheduler;
use crate::sync::SpscRingBuffer;

/// Completion ring slots (one is always kept free)
pub const COMPLETION_SLOTS: usize = 128;

/// One client buffer queued for playback
#[derive(Debug)]
pub struct AudioBlock {
    /// Opaque client token returned with the completion
    pub cookie: u64,
    data: Box<[u8]>,
    bytes_written: usize,
}

impl AudioBlock {
    pub fn new(cookie: u64, data: Box<[u8]>) -> Self {
        Self {
            cookie,
            data,
            bytes_written: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes already converted into the stream buffer
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.bytes_written..]
    }

    pub fn advance(&mut self, consumed: usize) {
        self.bytes_written = (self.bytes_written + consumed).min(self.data.len());
    }

    pub fn is_drained(&self) -> bool {
        self.bytes_written >= self.data.len()
    }

    fn into_completion(self, cancelled: bool) -> Completion {
        Completion {
            cookie: self.cookie,
            data: self.data,
            cancelled,
        }
    }
}

/// A block handed back to the client
#[derive(Debug, PartialEq, Eq)]
pub struct Completion {
    pub cookie: u64,
    pub data: Box<[u8]>,
    /// Stream was closed before the block finished playing
    pub cancelled: bool,
}

/// Pending FIFO plus the completion ring
pub struct BlockQueue {
    pub(crate) pending: Mutex<VecDeque<AudioBlock>>,
    completions: SpscRingBuffer<Completion, COMPLETION_SLOTS>,
    /// Single consumer of `completions`
    drain: Mutex<()>,
    /// Blocks queued or awaiting notification
    outstanding: AtomicUsize,
    limit: usize,
}

impl BlockQueue {
    pub fn new(limit: usize) -> Self {
        let max = COMPLETION_SLOTS - 1;
        let limit = if limit > max {
            warn!("[HDA] block limit {} clamped to {}", limit, max);
            max
        } else {
            limit
        };
        Self {
            pending: Mutex::new(VecDeque::with_capacity(limit)),
            completions: SpscRingBuffer::new(),
            drain: Mutex::new(()),
            outstanding: AtomicUsize::new(0),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Blocks queued or awaiting notification
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Append a block. Caller masks interrupts around this call.
    pub fn push(&self, block: AudioBlock) -> HdaResult<()> {
        let mut pending = self.pending.lock();
        if self.outstanding.load(Ordering::Acquire) >= self.limit {
            return Err(HdaError::ResourceExhausted);
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        pending.push_back(block);
        Ok(())
    }

    /// Hand a block to the completion ring and schedule one notification.
    ///
    /// Must be called with `pending` locked so there is a single producer.
    pub(crate) fn release<S: CompletionScheduler>(
        &self,
        block: AudioBlock,
        cancelled: bool,
        scheduler: &S,
    ) {
        if let Err(lost) = self.completions.push(block.into_completion(cancelled)) {
            // outstanding の上限で起こり得ない
            error!("[HDA] completion ring full, dropping block {:#x}", lost.cookie);
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        scheduler.schedule();
    }

    /// Return every queued block as cancelled. Caller masks interrupts.
    pub fn cancel_all<S: CompletionScheduler>(&self, scheduler: &S) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        while let Some(block) = pending.pop_front() {
            self.release(block, true, scheduler);
        }
        count
    }

    /// Drain completions in submission order. Deferred context only.
    pub fn poll(&self, mut f: impl FnMut(Completion)) -> usize {
        let _consumer = self.drain.lock();
        let mut count = 0;
        while let Some(done) = self.completions.pop() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            f(done);
            count += 1;
        }
        count
    }

    /// Tear the queue down: undelivered completions first, then every
    /// queued block as cancelled. Nothing is scheduled.
    pub fn into_completions(self) -> Vec<Completion> {
        let mut out = Vec::with_capacity(self.outstanding());
        while let Some(done) = self.completions.pop() {
            out.push(done);
        }
        let pending = self.pending.into_inner();
        out.extend(pending.into_iter().map(|block| block.into_completion(true)));
        out
    }
}
