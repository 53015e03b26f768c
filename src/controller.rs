// ============================================================================
// src/controller.rs - HDA Controller Context
// ============================================================================
//!
//! # HDA コントローラ
//!
//! レジスタブロック、コマンドリング、コーデック一覧、出力ストリーム、
//! ブロックキューをまとめて所有する明示的なコンテキスト。
//!
//! ## 実行コンテキスト
//! - 呼び出し側: `set_format` / `open` / `close` / `add_block` / `exec_verbs`
//! - 割り込み: [`Controller::handle_interrupt`]
//! - 遅延コンテキスト: [`Controller::poll_completions`]
//!
//! 割り込みと共有するのは出力ストリームとブロックキューの `pending` で、
//! 呼び出し側はどちらも割り込みを禁止した上で触る。

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};

use log::{error, info, warn};
use spin::Mutex;

use crate::codec::{Codec, enumerate_codecs};
use crate::config::{CODEC_WAKE_DELAY_US, ControllerConfig};
use crate::debug::{GlobalRegs, StreamDescriptorRegs};
use crate::error::{Fault, HdaError, HdaResult};
use crate::hal::{CompletionScheduler, DmaAllocator, HardwareTransport, wait_for};
use crate::interrupt::{InterruptStats, InterruptStatsSnapshot};
use crate::queue::{AudioBlock, BlockQueue, Completion};
use crate::regs::*;
use crate::stream::{
    Negotiated, OpenReport, OutputCaps, OutputStream, PcmFormat, StreamState, WaveFormats,
};
use crate::transport::{CodecLink, CommandRing, RingLink};

/// Host-visible handle to one HD Audio controller
pub struct Controller<H, A, S> {
    pub(crate) hw: H,
    alloc: A,
    pub(crate) scheduler: S,
    config: ControllerConfig,
    pub(crate) gcap: Gcap,
    version: (u8, u8),
    ring: Mutex<CommandRing>,
    codecs: Vec<Codec>,
    pub(crate) output_index: u8,
    pub(crate) stream: Mutex<OutputStream>,
    pub(crate) blocks: BlockQueue,
    faulted: AtomicBool,
    /// Last FIFO/descriptor error from the interrupt path, packed (0 = none)
    pub(crate) stream_fault: AtomicU16,
    /// Buffer completions whose refill was skipped while the stream was held
    pub(crate) missed_refills: AtomicUsize,
    pub(crate) stats: InterruptStats,
}

impl<H, A, S> Controller<H, A, S>
where
    H: HardwareTransport,
    A: DmaAllocator,
    S: CompletionScheduler,
{
    /// Bring the controller up: reset, command rings, codec discovery and
    /// the output stream. The IRQ is unmasked last.
    pub fn init(hw: H, alloc: A, scheduler: S, config: ControllerConfig) -> HdaResult<Self> {
        let gcap = Gcap::from(hw.read16(REG_GCAP));
        let version = (hw.read8(REG_VMAJ), hw.read8(REG_VMIN));
        info!(
            "[HDA] Controller v{}.{}: {} in, {} out, {} bidir streams{}",
            version.0,
            version.1,
            gcap.input_streams,
            gcap.output_streams,
            gcap.bidir_streams,
            if gcap.addr64 { ", 64-bit" } else { "" }
        );

        reset_controller(&hw, &gcap, config.reset_timeout_us)?;
        // コーデックが STATESTS に現れるまで待つ
        hw.delay_us(CODEC_WAKE_DELAY_US);
        hw.write32(
            REG_INTCTL,
            hw.read32(REG_INTCTL) | INTCTL_SIE_MASK | INTCTL_CIE | INTCTL_GIE,
        );

        let quirks = config.quirks;
        let mut ring = CommandRing::setup(&hw, &alloc, quirks.rintcnt(), config.command_timeout_us)?;

        let present = hw.read16(REG_STATESTS) & STATESTS_SDIWAKE_MASK;
        info!("[HDA] Codec presence mask: {:#06x}", present);
        let discovered = if present == 0 {
            Err(HdaError::NoCodec)
        } else {
            let mut link = RingLink {
                ring: &mut ring,
                hw: &hw,
            };
            enumerate_codecs(&mut link, present, config.output_stream_tag, quirks)
        };
        let codecs = match discovered {
            Ok(codecs) if !codecs.is_empty() => codecs,
            Ok(_) => return Err(abort(&hw, &alloc, ring, HdaError::NoCodec)),
            Err(e) => return Err(abort(&hw, &alloc, ring, e)),
        };

        if gcap.output_streams == 0 {
            return Err(abort(
                &hw,
                &alloc,
                ring,
                HdaError::InvalidState("controller has no output streams"),
            ));
        }
        // 出力ストリームは入力ストリームの直後から並ぶ
        let output_index = gcap.input_streams;
        let stream = match OutputStream::new(&hw, &alloc, output_index, &config) {
            Ok(stream) => stream,
            Err(e) => return Err(abort(&hw, &alloc, ring, e)),
        };

        hw.unmask_irq();
        info!(
            "[HDA] Ready: {} codec(s), output stream {} tag {}",
            codecs.len(),
            output_index,
            config.output_stream_tag
        );

        Ok(Self {
            hw,
            alloc,
            scheduler,
            blocks: BlockQueue::new(config.max_pending_blocks),
            config,
            gcap,
            version,
            ring: Mutex::new(ring),
            codecs,
            output_index,
            stream: Mutex::new(stream),
            faulted: AtomicBool::new(false),
            stream_fault: AtomicU16::new(0),
            missed_refills: AtomicUsize::new(0),
            stats: InterruptStats::default(),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn gcap(&self) -> Gcap {
        self.gcap
    }

    /// (major, minor)
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    pub fn codecs(&self) -> &[Codec] {
        &self.codecs
    }

    pub fn stream_state(&self) -> StreamState {
        self.with_stream(|stream| stream.state())
    }

    /// Next chunk offset the interrupt path will refill
    pub fn stream_cursor(&self) -> usize {
        self.with_stream(|stream| stream.cursor())
    }

    /// Run `f` on the output stream with interrupts masked
    fn with_stream<R>(&self, f: impl FnOnce(&mut OutputStream) -> R) -> R {
        self.hw.without_interrupts(|| f(&mut self.stream.lock()))
    }

    pub fn stats(&self) -> InterruptStatsSnapshot {
        self.stats.snapshot()
    }

    /// A controller-global fault has been seen
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub(crate) fn latch_fault(&self) {
        self.faulted.store(true, Ordering::Release);
    }

    fn check_fault(&self) -> HdaResult<()> {
        if self.is_faulted() {
            Err(HdaError::HardwareFault(Fault::Controller))
        } else {
            Ok(())
        }
    }

    /// What the output device can play
    pub fn output_caps(&self) -> OutputCaps {
        let (vendor_id, device_id) = self
            .codecs
            .first()
            .map(|c| (c.vendor(), c.device()))
            .unwrap_or_default();
        OutputCaps {
            vendor_id,
            device_id,
            channels: 2,
            formats: WaveFormats::supported(self.config.quirks),
        }
    }

    /// Negotiate the output format. The stream must not be running.
    pub fn set_format(&self, requested: PcmFormat) -> HdaResult<Negotiated> {
        self.check_fault()?;
        let quirks = self.config.quirks;
        self.with_stream(|stream| stream.set_format(requested, quirks))
    }

    /// Program the stream and its converters and start DMA
    pub fn open(&self) -> HdaResult<OpenReport> {
        self.check_fault()?;
        let mut ring = self.ring.lock();
        let mut link = RingLink {
            ring: &mut ring,
            hw: &self.hw,
        };
        self.with_stream(|stream| {
            self.missed_refills.store(0, Ordering::Release);
            stream.open(&self.hw, &mut link, &self.codecs)
        })
    }

    /// Stop the stream. Blocks still queued come back as cancelled
    /// completions; returns how many.
    pub fn close(&self) -> HdaResult<usize> {
        self.with_stream(|stream| {
            self.missed_refills.store(0, Ordering::Release);
            stream.close(&self.hw)
        })?;
        let cancelled = self
            .hw
            .without_interrupts(|| self.blocks.cancel_all(&self.scheduler));
        if cancelled > 0 {
            info!("[HDA] {} queued block(s) cancelled", cancelled);
        }
        Ok(cancelled)
    }

    /// Queue `data` for playback in the negotiated client format.
    ///
    /// `cookie` comes back in the matching [`Completion`].
    pub fn add_block(&self, cookie: u64, data: Box<[u8]>) -> HdaResult<()> {
        self.check_fault()?;
        let block = AudioBlock::new(cookie, data);
        self.hw.without_interrupts(|| self.blocks.push(block))
    }

    /// Hand finished blocks to `f` in submission order. Deferred
    /// context only; returns how many were delivered.
    pub fn poll_completions(&self, f: impl FnMut(Completion)) -> usize {
        self.blocks.poll(f)
    }

    /// Blocks queued or awaiting notification
    pub fn outstanding_blocks(&self) -> usize {
        self.blocks.outstanding()
    }

    /// Run raw codec commands through the ring. Caller context only.
    pub fn exec_verbs(&self, commands: &[u32], responses: &mut [u32]) -> HdaResult<()> {
        if responses.len() < commands.len() {
            return Err(HdaError::InvalidState("response buffer too small"));
        }
        let mut ring = self.ring.lock();
        let mut link = RingLink {
            ring: &mut ring,
            hw: &self.hw,
        };
        link.run_commands(commands, responses)
    }

    pub fn global_regs(&self) -> GlobalRegs {
        GlobalRegs::read(&self.hw)
    }

    pub fn stream_regs(&self) -> StreamDescriptorRegs {
        StreamDescriptorRegs::read(&self.hw, self.output_index)
    }

    /// Stop everything and return all DMA memory to the allocator.
    ///
    /// Blocks never delivered are returned, finished ones first.
    pub fn shutdown(self) -> Vec<Completion> {
        let Self {
            hw,
            alloc,
            ring,
            stream,
            blocks,
            ..
        } = self;
        hw.mask_irq();

        let mut stream = stream.into_inner();
        if stream.state() == StreamState::Running {
            if let Err(e) = stream.close(&hw) {
                warn!("[HDA] close during shutdown failed: {}", e);
            }
        }
        let ring = ring.into_inner();
        ring.stop(&hw);
        hw.write32(REG_INTCTL, 0);

        ring.release(&alloc);
        stream.release(&alloc);
        let leftover = blocks.into_completions();
        info!(
            "[HDA] Shut down, {} block(s) handed back",
            leftover.len()
        );
        leftover
    }
}

/// Undo a partial bring-up
fn abort<H: HardwareTransport, A: DmaAllocator>(
    hw: &H,
    alloc: &A,
    ring: CommandRing,
    err: HdaError,
) -> HdaError {
    error!("[HDA] Initialization failed: {}", err);
    ring.stop(hw);
    hw.write32(REG_INTCTL, 0);
    ring.release(alloc);
    err
}

/// Quiesce all DMA engines and cycle CRST
fn reset_controller<H: HardwareTransport>(hw: &H, gcap: &Gcap, timeout_us: u64) -> HdaResult<()> {
    hw.write8(REG_CORBCTL, 0);
    hw.write8(REG_RIRBCTL, 0);
    for index in 0..gcap.total_streams() {
        let sd = stream_desc_offset(index);
        hw.write8(sd + REG_SD_CTL0, 0);
        hw.write8(sd + REG_SD_CTL2, 0);
    }
    hw.write16(REG_WAKEEN, 0);
    hw.write32(REG_INTCTL, 0);
    hw.write16(REG_STATESTS, STATESTS_SDIWAKE_MASK);
    hw.write8(REG_RIRBSTS, RIRBSTS_RINTFL | RIRBSTS_OIS);

    hw.write32(REG_GCTL, hw.read32(REG_GCTL) & !GCTL_CRST);
    if !wait_for(hw, timeout_us, |hw| hw.read32(REG_GCTL) & GCTL_CRST == 0) {
        error!("[HDA] Controller did not enter reset");
        return Err(HdaError::ResetTimeout);
    }
    hw.write32(REG_GCTL, hw.read32(REG_GCTL) | GCTL_CRST);
    if !wait_for(hw, timeout_us, |hw| hw.read32(REG_GCTL) & GCTL_CRST != 0) {
        error!("[HDA] Controller did not leave reset");
        return Err(HdaError::ResetTimeout);
    }
    info!("[HDA] Controller reset complete");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
