// ============================================================================
// src/transport.rs - CORB/RIRB Command Ring Transport
// ============================================================================
//!
//! CORB/RIRB を使った同期的なコマンド/レスポンス転送。
//!
//! - リングサイズの選択と DMA バッファの確保
//! - バッチ送信 (`send_and_receive`)
//! - 非要求レスポンス (unsolicited) の読み飛ばし
//!
//! 同時に存在するバッチは常に 1 つだけ。割り込みコンテキストからは
//! 呼び出してはならない（ビジーウェイトが割り込み自体を止めてしまう）。

use core::sync::atomic::{Ordering, fence};

use log::{debug, error, info};

use crate::codec::verb::RirbEntry;
use crate::error::{HdaError, HdaResult};
use crate::hal::{DmaAllocator, DmaRegion, HardwareTransport, wait_for};
use crate::regs::*;

/// CORB entry size in bytes
pub const CORB_ENTRY_SIZE: usize = 4;
/// RIRB entry size in bytes
pub const RIRB_ENTRY_SIZE: usize = 8;

/// Default bound on every ring wait
pub const COMMAND_TIMEOUT_US: u64 = 1_000_000;

// ============================================================================
// CodecLink
// ============================================================================

/// Anything that can run a batch of codec commands and collect the
/// solicited responses in order.
pub trait CodecLink {
    fn send_and_receive(&mut self, commands: &[u32], responses: &mut [u32]) -> HdaResult<()>;

    /// Largest batch `send_and_receive` accepts
    fn capacity(&self) -> usize;

    /// Run any number of commands, split into ring-sized batches
    fn run_commands(&mut self, commands: &[u32], responses: &mut [u32]) -> HdaResult<()> {
        let step = self.capacity().max(1);
        for (cmds, resps) in commands.chunks(step).zip(responses.chunks_mut(step)) {
            self.send_and_receive(cmds, resps)?;
        }
        Ok(())
    }

    /// Single command, single response
    fn send_command(&mut self, command: u32) -> HdaResult<u32> {
        let mut response = [0u32; 1];
        self.send_and_receive(&[command], &mut response)?;
        Ok(response[0])
    }
}

// ============================================================================
// Ring size
// ============================================================================

/// Pick the largest size advertised in a CORBSIZE/RIRBSIZE value.
/// Returns (entries, size code).
pub fn select_ring_size(size_reg: u8) -> Option<(u16, u8)> {
    let cap = size_reg >> RINGSIZE_SZCAP_SHIFT;
    if cap & RINGSIZE_CAP_256 != 0 {
        Some((256, RINGSIZE_256))
    } else if cap & RINGSIZE_CAP_16 != 0 {
        Some((16, RINGSIZE_16))
    } else if cap & RINGSIZE_CAP_2 != 0 {
        Some((2, RINGSIZE_2))
    } else {
        None
    }
}

// ============================================================================
// CommandRing
// ============================================================================

/// CORB/RIRB pair plus the driver-side RIRB read pointer.
#[derive(Debug)]
pub struct CommandRing {
    corb: DmaRegion,
    corb_entries: u16,
    rirb: DmaRegion,
    rirb_entries: u16,
    rirb_rp: u16,
    timeout_us: u64,
}

impl CommandRing {
    /// Allocate and program both rings, then start their DMA engines.
    ///
    /// Expects CORB/RIRB DMA to be stopped (controller freshly reset).
    pub fn setup<H: HardwareTransport, A: DmaAllocator>(
        hw: &H,
        alloc: &A,
        rintcnt: u16,
        timeout_us: u64,
    ) -> HdaResult<Self> {
        hw.write8(REG_CORBCTL, 0);
        hw.write8(REG_RIRBCTL, 0);

        let corbsize = hw.read8(REG_CORBSIZE);
        let (corb_entries, corb_code) = select_ring_size(corbsize)
            .ok_or(HdaError::InvalidState("CORB size capability empty"))?;
        let rirbsize = hw.read8(REG_RIRBSIZE);
        let (rirb_entries, rirb_code) = select_ring_size(rirbsize)
            .ok_or(HdaError::InvalidState("RIRB size capability empty"))?;

        let corb = alloc.alloc(corb_entries as usize * CORB_ENTRY_SIZE)?;
        let rirb = match alloc.alloc(rirb_entries as usize * RIRB_ENTRY_SIZE) {
            Ok(region) => region,
            Err(e) => {
                alloc.free(corb);
                return Err(e);
            }
        };
        corb.fill(0, corb.len(), 0);
        rirb.fill(0, rirb.len(), 0);

        info!(
            "[HDA] CORB: {} entries at {:#x}, RIRB: {} entries at {:#x}",
            corb_entries,
            corb.phys().as_u64(),
            rirb_entries,
            rirb.phys().as_u64()
        );

        let mut ring = Self {
            corb,
            corb_entries,
            rirb,
            rirb_entries,
            rirb_rp: 0,
            timeout_us,
        };
        if let Err(e) = ring.program(hw, corbsize, corb_code, rirbsize, rirb_code, rintcnt) {
            ring.release(alloc);
            return Err(e);
        }
        Ok(ring)
    }

    fn program<H: HardwareTransport>(
        &mut self,
        hw: &H,
        corbsize: u8,
        corb_code: u8,
        rirbsize: u8,
        rirb_code: u8,
        rintcnt: u16,
    ) -> HdaResult<()> {
        let corb_phys = self.corb.phys().as_u64();
        let rirb_phys = self.rirb.phys().as_u64();

        hw.write32(REG_CORBLBASE, corb_phys as u32);
        hw.write32(REG_CORBUBASE, (corb_phys >> 32) as u32);
        hw.write8(REG_CORBSIZE, (corbsize & !RINGSIZE_SIZE_MASK) | corb_code);
        hw.write32(REG_RIRBLBASE, rirb_phys as u32);
        hw.write32(REG_RIRBUBASE, (rirb_phys >> 32) as u32);
        hw.write8(REG_RIRBSIZE, (rirbsize & !RINGSIZE_SIZE_MASK) | rirb_code);

        // CORBRP リセットハンドシェイク: セットして読み返し、クリアして読み返す
        hw.write16(REG_CORBRP, hw.read16(REG_CORBRP) | CORBRP_RST);
        if !wait_for(hw, self.timeout_us, |hw| hw.read16(REG_CORBRP) & CORBRP_RST != 0) {
            error!("[HDA] CORB read pointer did not enter reset");
            return Err(HdaError::ResetTimeout);
        }
        hw.write16(REG_CORBRP, hw.read16(REG_CORBRP) & !CORBRP_RST);
        if !wait_for(hw, self.timeout_us, |hw| hw.read16(REG_CORBRP) & CORBRP_RST == 0) {
            error!("[HDA] CORB read pointer did not leave reset");
            return Err(HdaError::ResetTimeout);
        }
        hw.write16(REG_CORBWP, hw.read16(REG_CORBWP) & !RING_PTR_MASK);

        hw.write16(REG_RIRBWP, RIRBWP_RST);
        self.rirb_rp = 0;
        hw.write16(REG_RINTCNT, rintcnt);

        hw.write8(REG_CORBCTL, hw.read8(REG_CORBCTL) | CORBCTL_CORBRUN | CORBCTL_CMEIE);
        hw.write8(REG_RIRBCTL, hw.read8(REG_RIRBCTL) | RIRBCTL_DMAEN);
        Ok(())
    }

    /// Largest batch one `send_and_receive` call may carry; bounded by
    /// the smaller of the two rings
    pub fn capacity(&self) -> usize {
        self.corb_entries.min(self.rirb_entries) as usize - 1
    }

    pub fn corb_entries(&self) -> u16 {
        self.corb_entries
    }

    pub fn rirb_entries(&self) -> u16 {
        self.rirb_entries
    }

    /// Run one batch: write every command, wait for the controller to
    /// consume them, then collect exactly one solicited response each.
    pub fn send_and_receive<H: HardwareTransport>(
        &mut self,
        hw: &H,
        commands: &[u32],
        responses: &mut [u32],
    ) -> HdaResult<()> {
        if commands.is_empty() {
            return Ok(());
        }
        if commands.len() > self.capacity() || responses.len() < commands.len() {
            return Err(HdaError::BatchTooLarge {
                requested: commands.len(),
                capacity: self.capacity().min(responses.len()),
            });
        }
        self.send(hw, commands)?;
        self.receive(hw, &mut responses[..commands.len()])
    }

    fn send<H: HardwareTransport>(&mut self, hw: &H, commands: &[u32]) -> HdaResult<()> {
        let rp = hw.read16(REG_CORBRP) & RING_PTR_MASK;
        let mut wp = hw.read16(REG_CORBWP) & RING_PTR_MASK;
        if rp != wp {
            error!("[HDA] CORB not empty before send (rp={}, wp={})", rp, wp);
            return Err(HdaError::RingNotIdle);
        }

        for &command in commands {
            wp = (wp + 1) % self.corb_entries;
            self.corb.write_u32(wp as usize, command);
        }
        // エントリ書き込みを WP 更新より先に可視化する
        fence(Ordering::SeqCst);
        hw.write16(REG_CORBWP, wp);

        if !wait_for(hw, self.timeout_us, |hw| {
            hw.read16(REG_CORBRP) & RING_PTR_MASK == wp
        }) {
            error!("[HDA] CORB send timed out");
            return Err(HdaError::CommandTimeout);
        }
        Ok(())
    }

    fn receive<H: HardwareTransport>(&mut self, hw: &H, responses: &mut [u32]) -> HdaResult<()> {
        let mut filled = 0;
        while filled < responses.len() {
            let rp = self.rirb_rp;
            if !wait_for(hw, self.timeout_us, |hw| {
                hw.read16(REG_RIRBWP) & RING_PTR_MASK != rp
            }) {
                error!("[HDA] RIRB receive timed out ({} of {})", filled, responses.len());
                return Err(HdaError::CommandTimeout);
            }

            let entry = self.next_entry();
            if entry.is_unsolicited() {
                debug!(
                    "[HDA] skipping unsolicited response {:#010x} from codec {}",
                    entry.response,
                    entry.codec_addr()
                );
                continue;
            }
            responses[filled] = entry.response;
            filled += 1;
        }

        // 残りは非要求レスポンスのみのはず
        let wp = hw.read16(REG_RIRBWP) & RING_PTR_MASK;
        while self.rirb_rp != wp {
            let entry = self.next_entry();
            if !entry.is_unsolicited() {
                error!("[HDA] excess solicited response {:#010x}", entry.response);
                return Err(HdaError::ExcessResponse);
            }
        }
        Ok(())
    }

    fn next_entry(&mut self) -> RirbEntry {
        self.rirb_rp = (self.rirb_rp + 1) % self.rirb_entries;
        fence(Ordering::Acquire);
        let index = self.rirb_rp as usize * 2;
        RirbEntry {
            response: self.rirb.read_u32(index),
            response_ex: self.rirb.read_u32(index + 1),
        }
    }

    /// Stop both DMA engines and wait for them to report stopped
    pub fn stop<H: HardwareTransport>(&self, hw: &H) {
        hw.write8(REG_CORBCTL, hw.read8(REG_CORBCTL) & !CORBCTL_CORBRUN);
        hw.write8(REG_RIRBCTL, hw.read8(REG_RIRBCTL) & !RIRBCTL_DMAEN);
        let stopped = wait_for(hw, self.timeout_us, |hw| {
            hw.read8(REG_CORBCTL) & CORBCTL_CORBRUN == 0 && hw.read8(REG_RIRBCTL) & RIRBCTL_DMAEN == 0
        });
        if !stopped {
            error!("[HDA] CORB/RIRB DMA did not stop");
        }
    }

    /// Hand both ring buffers back to the allocator
    pub fn release<A: DmaAllocator>(self, alloc: &A) {
        alloc.free(self.corb);
        alloc.free(self.rirb);
    }
}

// ============================================================================
// RingLink
// ============================================================================

/// A command ring bound to the register block that drives it
pub struct RingLink<'a, H> {
    pub ring: &'a mut CommandRing,
    pub hw: &'a H,
}

impl<H: HardwareTransport> CodecLink for RingLink<'_, H> {
    fn send_and_receive(&mut self, commands: &[u32], responses: &mut [u32]) -> HdaResult<()> {
        self.ring.send_and_receive(self.hw, commands, responses)
    }

    fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

// ============================================================================
// Tests
// ============================================================================
