// ============================================================================
// src/interrupt.rs - Interrupt Dispatcher
// ============================================================================
//!
//! HDA 割り込みハンドラ本体。
//!
//! - INTSTS.GIS が立っていなければ共有 IRQ の他の持ち主に譲る
//! - INTSTS.CIS はコントローラ全体の障害として記録（回復しない）
//! - ストリームごとに SDnSTS を読み、FIFO/ディスクリプタエラーを記録し、
//!   出力ストリームのバッファ完了ではブロックキューから 1 チャンク補充する
//! - 呼び出し側がストリームを保持していて補充できなかったチャンクは、
//!   次のバッファ完了でまとめて補充してカーソルをハードウェアに合わせる
//! - 最後に必ず EOI を発行する
//!
//! ここではコマンドリングを一切使わない（ビジーウェイト禁止）。

use core::fmt;
use core::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use log::{error, trace, warn};

use crate::controller::Controller;
use crate::error::Fault;
use crate::hal::{CompletionScheduler, DmaAllocator, HardwareTransport};
use crate::regs::*;
use crate::stream::StreamState;

/// Whether the interrupt belonged to this controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqOutcome {
    Handled,
    /// GIS clear; another device on a shared line raised it
    NotHandled,
}

/// Interrupt path counters
#[derive(Debug, Default)]
pub struct InterruptStats {
    pub handled: AtomicU64,
    pub not_ours: AtomicU64,
    pub buffer_completions: AtomicU64,
    pub fifo_errors: AtomicU64,
    pub descriptor_errors: AtomicU64,
    pub controller_errors: AtomicU64,
    /// Chunks that needed silence padding
    pub padded_chunks: AtomicU64,
    /// Buffer completions skipped because the caller held the stream
    pub stream_busy: AtomicU64,
}

/// Plain copy of [`InterruptStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptStatsSnapshot {
    pub handled: u64,
    pub not_ours: u64,
    pub buffer_completions: u64,
    pub fifo_errors: u64,
    pub descriptor_errors: u64,
    pub controller_errors: u64,
    pub padded_chunks: u64,
    pub stream_busy: u64,
}

impl InterruptStats {
    pub fn snapshot(&self) -> InterruptStatsSnapshot {
        InterruptStatsSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            not_ours: self.not_ours.load(Ordering::Relaxed),
            buffer_completions: self.buffer_completions.load(Ordering::Relaxed),
            fifo_errors: self.fifo_errors.load(Ordering::Relaxed),
            descriptor_errors: self.descriptor_errors.load(Ordering::Relaxed),
            controller_errors: self.controller_errors.load(Ordering::Relaxed),
            padded_chunks: self.padded_chunks.load(Ordering::Relaxed),
            stream_busy: self.stream_busy.load(Ordering::Relaxed),
        }
    }
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// 上位バイト: 種別、下位バイト: ストリーム番号
const STREAM_FAULT_FIFO: u16 = 1 << 8;
const STREAM_FAULT_DESCRIPTOR: u16 = 2 << 8;

fn latch_stream_fault(slot: &AtomicU16, fault: Fault) {
    let packed = match fault {
        Fault::Fifo { stream } => STREAM_FAULT_FIFO | stream as u16,
        Fault::Descriptor { stream } => STREAM_FAULT_DESCRIPTOR | stream as u16,
        Fault::Controller => return,
    };
    slot.store(packed, Ordering::Release);
}

fn unpack_stream_fault(packed: u16) -> Option<Fault> {
    let stream = packed as u8;
    match packed & 0xFF00 {
        STREAM_FAULT_FIFO => Some(Fault::Fifo { stream }),
        STREAM_FAULT_DESCRIPTOR => Some(Fault::Descriptor { stream }),
        _ => None,
    }
}

impl fmt::Display for InterruptStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "irq handled={} not_ours={} bcis={} fifoe={} dese={} cis={} padded={} busy={}",
            self.handled,
            self.not_ours,
            self.buffer_completions,
            self.fifo_errors,
            self.descriptor_errors,
            self.controller_errors,
            self.padded_chunks,
            self.stream_busy
        )
    }
}

impl<H, A, S> Controller<H, A, S>
where
    H: HardwareTransport,
    A: DmaAllocator,
    S: CompletionScheduler,
{
    /// Take the most recent FIFO or descriptor error, if any.
    ///
    /// Stream errors do not stop playback; the next one overwrites an
    /// unread one.
    pub fn take_stream_fault(&self) -> Option<Fault> {
        unpack_stream_fault(self.stream_fault.swap(0, Ordering::AcqRel))
    }

    /// Service one hardware interrupt. Runs in interrupt context.
    pub fn handle_interrupt(&self) -> IrqOutcome {
        let hw = &self.hw;
        let intsts = hw.read32(REG_INTSTS);

        if intsts & INTSTS_GIS == 0 {
            bump(&self.stats.not_ours);
            hw.end_of_interrupt();
            return IrqOutcome::NotHandled;
        }
        bump(&self.stats.handled);

        if intsts & INTSTS_CIS != 0 {
            error!("[HDA] Controller error (INTSTS={:#010x}), output halted", intsts);
            self.latch_fault();
            bump(&self.stats.controller_errors);
            hw.write8(REG_CORBSTS, CORBSTS_CMEI);
            hw.write8(REG_RIRBSTS, RIRBSTS_RINTFL | RIRBSTS_OIS);
            hw.write16(REG_STATESTS, hw.read16(REG_STATESTS));
        }

        let streams = (self.gcap.total_streams() as u32).min(MAX_STREAM_INTERRUPTS);
        for index in 0..streams {
            if intsts & (1 << index) != 0 {
                self.service_stream(index as u8);
            }
        }

        hw.end_of_interrupt();
        IrqOutcome::Handled
    }

    fn service_stream(&self, index: u8) {
        let hw = &self.hw;
        let sts_reg = stream_desc_offset(index) + REG_SD_STS;
        let sts = StreamStatus::from_bits_retain(hw.read8(sts_reg));

        if sts.contains(StreamStatus::FIFOE) {
            error!("[HDA] Stream {}: FIFO error", index);
            bump(&self.stats.fifo_errors);
            latch_stream_fault(&self.stream_fault, Fault::Fifo { stream: index });
        }
        if sts.contains(StreamStatus::DESE) {
            error!("[HDA] Stream {}: descriptor error", index);
            bump(&self.stats.descriptor_errors);
            latch_stream_fault(&self.stream_fault, Fault::Descriptor { stream: index });
        }
        if sts.contains(StreamStatus::BCIS) && index == self.output_index {
            self.refill_output();
        }

        // W1C
        hw.write8(sts_reg, (sts & StreamStatus::INTERRUPT_BITS).bits());
    }

    fn refill_output(&self) {
        let Some(mut stream) = self.stream.try_lock() else {
            warn!("[HDA] Stream busy, chunk refill deferred");
            bump(&self.stats.stream_busy);
            self.missed_refills.fetch_add(1, Ordering::AcqRel);
            return;
        };
        let missed = self.missed_refills.swap(0, Ordering::AcqRel);
        if stream.state() != StreamState::Running {
            return;
        }

        // 取りこぼした分も含め、DMA が読み終えたチャンクをすべて埋め直す
        let chunks = stream.buffer_size() / stream.chunk_size();
        let backlog = (missed + 1).min(chunks);
        if missed > 0 {
            warn!("[HDA] Catching up {} deferred chunk(s)", missed);
        }
        {
            let mut pending = self.blocks.pending.lock();
            for _ in 0..backlog {
                let refill = stream.refill(&mut pending, |block| {
                    self.blocks.release(block, false, &self.scheduler)
                });
                bump(&self.stats.buffer_completions);
                if refill.padded > 0 {
                    bump(&self.stats.padded_chunks);
                }
                if cfg!(feature = "verbose_logging") {
                    trace!(
                        "[HDA] refill @{:#x}: {} bytes, {} silence, {} released",
                        refill.offset,
                        refill.produced,
                        refill.padded,
                        refill.released
                    );
                }
            }
        }
        self.hw.flush_cache();
    }
}

// ============================================================================
// Tests
// ============================================================================
