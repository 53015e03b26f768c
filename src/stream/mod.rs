// ============================================================================
// src/stream/mod.rs - Output Stream Engine
// ============================================================================
//!
//! # 出力ストリーム
//!
//! 1 本の再生用 DMA ストリームを管理する。
//!
//! 状態遷移: `Closed` → `Configured`（フォーマット決定）→ `Running` → `Closed`
//!
//! 波形バッファは `chunk_size` バイトのチャンク `bdl_entries` 個のリングで、
//! チャンクごとに IOC 割り込みが上がる。割り込みのたびに書き込みカーソル位置の
//! 1 チャンクをブロックキューから補充し、足りない分は無音で埋める。

pub mod bdl;
pub mod format;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use log::{debug, info, trace, warn};

use crate::codec::Codec;
use crate::codec::verb::{
    VERB_SET_CONV_CHAN_COUNT, VERB_SET_CONV_FMT, VERB_SET_CONV_STREAM, make_command,
};
use crate::config::{ControllerConfig, Quirks};
use crate::error::{HdaError, HdaResult};
use crate::hal::{DmaAllocator, DmaRegion, HardwareTransport, wait_for};
use crate::queue::AudioBlock;
use crate::regs::*;
use crate::transport::CodecLink;

pub use bdl::BdlEntry;
pub use format::{FormatCode, Negotiated, OutputCaps, PcmFormat, WaveFormats, negotiate};

/// Bytes per BDL entry
pub const BDL_ENTRY_SIZE: usize = core::mem::size_of::<BdlEntry>();

/// Stream lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Configured,
    Running,
}

/// Outcome of [`OutputStream::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenReport {
    /// Converter widgets programmed with the stream format
    pub converters: usize,
    /// FIFOE was already latched when RUN was set and has been cleared
    pub fifo_error_cleared: bool,
}

/// What one refill wrote into the cyclic buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Refill {
    /// Chunk offset that was written
    pub offset: usize,
    /// Converted bytes
    pub produced: usize,
    /// Silence bytes
    pub padded: usize,
    /// Blocks fully drained and released
    pub released: usize,
}

/// The controller's single playback stream
#[derive(Debug)]
pub struct OutputStream {
    index: u8,
    tag: u8,
    chunk_size: usize,
    entries: usize,
    wave: DmaRegion,
    bdl: DmaRegion,
    cursor: usize,
    state: StreamState,
    format: Option<Negotiated>,
    reset_timeout_us: u64,
}

impl OutputStream {
    /// Allocate the wave buffer and BDL, then reset the descriptor
    pub fn new<H: HardwareTransport, A: DmaAllocator>(
        hw: &H,
        alloc: &A,
        index: u8,
        config: &ControllerConfig,
    ) -> HdaResult<Self> {
        if config.chunk_size == 0 || config.bdl_entries < 2 || config.bdl_entries > 256 {
            return Err(HdaError::InvalidState("bad stream buffer geometry"));
        }
        let buffer_size = config.buffer_size();
        let wave = alloc.alloc(buffer_size)?;
        let bdl = match alloc.alloc(config.bdl_entries * BDL_ENTRY_SIZE) {
            Ok(region) => region,
            Err(e) => {
                alloc.free(wave);
                return Err(e);
            }
        };
        wave.fill(0, buffer_size, 0);
        bdl::build(&bdl, &wave, config.bdl_entries, config.chunk_size);

        info!(
            "[HDA] Stream {}: wave {:#x} ({} x {} bytes), BDL {:#x}",
            index,
            wave.phys().as_u64(),
            config.bdl_entries,
            config.chunk_size,
            bdl.phys().as_u64()
        );

        let mut stream = Self {
            index,
            tag: config.output_stream_tag,
            chunk_size: config.chunk_size,
            entries: config.bdl_entries,
            wave,
            bdl,
            cursor: 0,
            state: StreamState::Closed,
            format: None,
            reset_timeout_us: config.reset_timeout_us,
        };
        stream.reset(hw);
        Ok(stream)
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn format(&self) -> Option<&Negotiated> {
        self.format.as_ref()
    }

    /// Next chunk offset to refill
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn buffer_size(&self) -> usize {
        self.chunk_size * self.entries
    }

    /// Copy of the cyclic buffer contents
    pub fn wave_snapshot(&self) -> Vec<u8> {
        // SAFETY: 呼び出し側は &self を持つので refill と並行しない
        unsafe { self.wave.bytes(0, self.buffer_size()) }.to_vec()
    }

    #[inline]
    fn reg(&self, offset: u32) -> u32 {
        stream_desc_offset(self.index) + offset
    }

    /// Stop and reset the descriptor, re-arm its interrupts, rewind the cursor.
    ///
    /// A sluggish SRST transition is logged, not fatal.
    pub fn reset<H: HardwareTransport>(&mut self, hw: &H) {
        let ctl = self.reg(REG_SD_CTL0);
        let timeout = self.reset_timeout_us;

        let v = StreamCtl::from_bits_retain(hw.read8(ctl)) - StreamCtl::RUN;
        hw.write8(ctl, v.bits());

        hw.write8(ctl, (v | StreamCtl::SRST).bits());
        if !wait_for(hw, timeout, |hw| hw.read8(ctl) & StreamCtl::SRST.bits() != 0) {
            warn!("[HDA] Stream {}: SRST did not assert", self.index);
        }
        let v = StreamCtl::from_bits_retain(hw.read8(ctl)) - StreamCtl::SRST;
        hw.write8(ctl, v.bits());
        if !wait_for(hw, timeout, |hw| hw.read8(ctl) & StreamCtl::SRST.bits() == 0) {
            warn!("[HDA] Stream {}: SRST did not clear", self.index);
        }

        let v = StreamCtl::from_bits_retain(hw.read8(ctl))
            | StreamCtl::DEIE
            | StreamCtl::FEIE
            | StreamCtl::IOCE;
        hw.write8(ctl, v.bits());
        self.cursor = 0;
    }

    /// Negotiate `requested` and pick the converter. Not while running.
    pub fn set_format(&mut self, requested: PcmFormat, quirks: Quirks) -> HdaResult<Negotiated> {
        if self.state == StreamState::Running {
            return Err(HdaError::InvalidState("stream is running"));
        }
        let negotiated = negotiate(requested, quirks)?;
        info!(
            "[HDA] Stream {}: {} -> {} (fmt {:#06x}, {})",
            self.index,
            negotiated.requested,
            negotiated.device,
            negotiated.code.0,
            negotiated.converter.name()
        );
        self.format = Some(negotiated);
        self.state = StreamState::Configured;
        Ok(negotiated)
    }

    /// Program the descriptor and the tagged converters, then set RUN
    pub fn open<H: HardwareTransport, L: CodecLink>(
        &mut self,
        hw: &H,
        link: &mut L,
        codecs: &[Codec],
    ) -> HdaResult<OpenReport> {
        let negotiated = match (self.state, self.format) {
            (StreamState::Configured, Some(n)) => n,
            (StreamState::Running, _) => return Err(HdaError::InvalidState("stream already open")),
            _ => return Err(HdaError::InvalidState("stream format not set")),
        };
        let code = negotiated.code.0;
        let channels = negotiated.device.channels;

        let bdl_phys = self.bdl.phys().as_u64();
        hw.write32(self.reg(REG_SD_BDPL), bdl_phys as u32);
        hw.write32(self.reg(REG_SD_BDPU), (bdl_phys >> 32) as u32);
        hw.write16(self.reg(REG_SD_LVI), (self.entries - 1) as u16);
        hw.write32(self.reg(REG_SD_CBL), self.buffer_size() as u32);
        hw.write8(self.reg(REG_SD_CTL2), self.tag << SD_CTL2_STRM_SHIFT);
        hw.write16(self.reg(REG_SD_FMT), code);
        let ctl = self.reg(REG_SD_CTL0);
        hw.write8(ctl, hw.read8(ctl) | StreamCtl::IOCE.bits());

        let mut commands = Vec::new();
        for codec in codecs {
            let Some(afg) = codec.afg.as_ref() else {
                continue;
            };
            for widget in afg.converters_for(self.tag) {
                debug!(
                    "[HDA] Stream {}: enabling converter {}:{}",
                    self.index, codec.address, widget.nid
                );
                commands.extend_from_slice(&[
                    make_command(codec.address, widget.nid, VERB_SET_CONV_FMT | code as u32),
                    make_command(
                        codec.address,
                        widget.nid,
                        VERB_SET_CONV_STREAM | ((self.tag as u32) << 4),
                    ),
                    make_command(
                        codec.address,
                        widget.nid,
                        VERB_SET_CONV_CHAN_COUNT | (channels as u32 - 1),
                    ),
                ]);
            }
        }
        let mut responses = alloc::vec![0u32; commands.len()];
        link.run_commands(&commands, &mut responses)?;

        // DMA がバッファと BDL を RUN より先に観測できるようにする
        hw.flush_cache();
        hw.write8(ctl, hw.read8(ctl) | StreamCtl::RUN.bits());
        self.state = StreamState::Running;

        let sts = self.reg(REG_SD_STS);
        let fifo_error = StreamStatus::from_bits_retain(hw.read8(sts)).contains(StreamStatus::FIFOE);
        if fifo_error {
            warn!("[HDA] Stream {}: FIFO error latched at start", self.index);
            hw.write8(sts, StreamStatus::FIFOE.bits());
        }
        info!("[HDA] Stream {}: running", self.index);
        Ok(OpenReport {
            converters: commands.len() / 3,
            fifo_error_cleared: fifo_error,
        })
    }

    /// Clear RUN, wait for the engine to stop, then reset
    pub fn close<H: HardwareTransport>(&mut self, hw: &H) -> HdaResult<()> {
        if self.state != StreamState::Running {
            return Err(HdaError::InvalidState("stream not running"));
        }
        let ctl = self.reg(REG_SD_CTL0);
        hw.write8(ctl, hw.read8(ctl) & !StreamCtl::RUN.bits());
        if !wait_for(hw, self.reset_timeout_us, |hw| {
            hw.read8(ctl) & StreamCtl::RUN.bits() == 0
        }) {
            warn!("[HDA] Stream {}: RUN did not clear", self.index);
        }
        self.reset(hw);
        self.state = StreamState::Closed;
        self.format = None;
        info!("[HDA] Stream {}: closed", self.index);
        Ok(())
    }

    /// Fill the chunk at the cursor from `pending`, pad with silence and
    /// advance the cursor by one chunk.
    ///
    /// Drained blocks are popped and passed to `release` in order.
    pub fn refill(
        &mut self,
        pending: &mut VecDeque<AudioBlock>,
        mut release: impl FnMut(AudioBlock),
    ) -> Refill {
        let offset = self.cursor;
        let chunk = self.chunk_size;
        // SAFETY: 書き込むのはカーソル位置のチャンクだけで、そこは DMA が
        // 読み終えた領域。&mut self により他の参照は存在しない。
        let dest = unsafe { self.wave.bytes_mut(offset, chunk) };

        let mut filled = 0;
        let mut released = 0;
        if let Some(converter) = self.format.map(|n| n.converter) {
            while filled < chunk {
                let Some(block) = pending.front_mut() else {
                    break;
                };
                let done = converter.convert(&mut dest[filled..], block.remaining());
                block.advance(done.consumed);
                filled += done.produced;

                if block.is_drained() {
                    if let Some(block) = pending.pop_front() {
                        release(block);
                        released += 1;
                    }
                    continue;
                }
                if done.produced == 0 {
                    break;
                }
            }
        }
        dest[filled..].fill(0);
        self.cursor = (offset + chunk) % self.buffer_size();

        if cfg!(feature = "verbose_logging") {
            trace!(
                "[HDA] Stream {}: chunk {:#x} filled {} padded {}",
                self.index,
                offset,
                filled,
                chunk - filled
            );
        }
        Refill {
            offset,
            produced: filled,
            padded: chunk - filled,
            released,
        }
    }

    /// Hand both DMA regions back. The stream must be stopped.
    pub fn release<A: DmaAllocator>(self, alloc: &A) {
        alloc.free(self.bdl);
        alloc.free(self.wave);
    }
}
