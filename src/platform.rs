// ============================================================================
// src/platform.rs - x86_64 MMIO Transport
// ============================================================================
//!
//! 実機向けの [`HardwareTransport`] 実装。
//!
//! レジスタアクセスは PCI BAR0 をマップした仮想アドレスへの volatile 読み書き。
//! 時間待ち、EOI、IRQ マスクはホストカーネルが関数ポインタで渡す。

use core::ptr::{read_volatile, write_volatile};

use x86_64::VirtAddr;
use x86_64::instructions::interrupts;

use crate::hal::HardwareTransport;

/// Host kernel services the transport cannot provide itself
#[derive(Debug, Clone, Copy)]
pub struct PlatformHooks {
    /// Timer-backed microsecond delay
    pub delay_us: fn(u64),
    /// EOI at the local APIC / PIC
    pub end_of_interrupt: fn(),
    pub mask_irq: fn(),
    pub unmask_irq: fn(),
}

/// Register block mapped at `base`
#[derive(Debug)]
pub struct MmioTransport {
    base: VirtAddr,
    hooks: PlatformHooks,
}

impl MmioTransport {
    /// # Safety
    /// `base` must map the controller's whole register window (0x2000
    /// bytes covers every stream descriptor) as uncached memory for as
    /// long as the transport lives.
    pub unsafe fn new(base: VirtAddr, hooks: PlatformHooks) -> Self {
        Self { base, hooks }
    }

    pub fn base(&self) -> VirtAddr {
        self.base
    }

    #[inline]
    fn ptr<T>(&self, offset: u32) -> *mut T {
        (self.base + offset as u64).as_mut_ptr()
    }
}

impl HardwareTransport for MmioTransport {
    #[inline]
    fn read8(&self, offset: u32) -> u8 {
        // SAFETY: base は new() の契約でマップ済み。u8 の volatile 読み出しは原子的。
        unsafe { read_volatile(self.ptr(offset)) }
    }

    #[inline]
    fn read16(&self, offset: u32) -> u16 {
        // SAFETY: base はマップ済み。16 ビットレジスタは 2 バイト境界に並ぶ。
        unsafe { read_volatile(self.ptr(offset)) }
    }

    #[inline]
    fn read32(&self, offset: u32) -> u32 {
        // SAFETY: base はマップ済み。32 ビットレジスタは 4 バイト境界に並ぶ。
        unsafe { read_volatile(self.ptr(offset)) }
    }

    #[inline]
    fn write8(&self, offset: u32, value: u8) {
        // SAFETY: read8 と同じ
        unsafe { write_volatile(self.ptr(offset), value) }
    }

    #[inline]
    fn write16(&self, offset: u32, value: u16) {
        // SAFETY: read16 と同じ
        unsafe { write_volatile(self.ptr(offset), value) }
    }

    #[inline]
    fn write32(&self, offset: u32, value: u32) {
        // SAFETY: read32 と同じ
        unsafe { write_volatile(self.ptr(offset), value) }
    }

    fn delay_us(&self, us: u64) {
        (self.hooks.delay_us)(us)
    }

    fn flush_cache(&self) {
        // SAFETY: WBINVD は ring 0 でのみ実行可能。ドライバコアは ring 0 で動く。
        unsafe { core::arch::asm!("wbinvd", options(nostack, preserves_flags)) }
    }

    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
        interrupts::without_interrupts(f)
    }

    fn mask_irq(&self) {
        (self.hooks.mask_irq)()
    }

    fn unmask_irq(&self) {
        (self.hooks.unmask_irq)()
    }

    fn end_of_interrupt(&self) {
        (self.hooks.end_of_interrupt)()
    }
}
