// ============================================================================
// src/hal.rs - Hardware Abstraction Layer
// ============================================================================
//!
//! # ハードウェア抽象化層
//!
//! ドライバコアが外部に要求する協調者インターフェース。
//!
//! - [`HardwareTransport`]: MMIO レジスタアクセス、割り込みマスク、EOI、キャッシュフラッシュ
//! - [`DmaAllocator`]: 物理連続・ページング不可バッファの確保/解放
//! - [`CompletionScheduler`]: 割り込み外コンテキストでの完了通知の予約
//!
//! コアの他の部分はこれらのトレイトだけに依存するため、
//! テストではソフトウェアシミュレーションのコントローラを差し込める。

use core::ptr::{self, NonNull};

use x86_64::PhysAddr;

use crate::error::HdaResult;

/// Polling granularity for every bounded busy-wait
pub const POLL_INTERVAL_US: u64 = 10;

// ============================================================================
// Register transport
// ============================================================================

/// Access to a mapped HDA register block plus the interrupt line serving it.
///
/// All register accesses must be volatile. Offsets are relative to the
/// start of the controller's MMIO window.
pub trait HardwareTransport {
    fn read8(&self, offset: u32) -> u8;
    fn read16(&self, offset: u32) -> u16;
    fn read32(&self, offset: u32) -> u32;
    fn write8(&self, offset: u32, value: u8);
    fn write16(&self, offset: u32, value: u16);
    fn write32(&self, offset: u32, value: u32);

    /// Busy-wait for at least `us` microseconds
    fn delay_us(&self, us: u64);

    /// Write back CPU caches so DMA observes preceding stores
    fn flush_cache(&self);

    /// Run `f` with this CPU's interrupts disabled
    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R;

    fn mask_irq(&self);
    fn unmask_irq(&self);

    /// Acknowledge the current interrupt at the interrupt controller
    fn end_of_interrupt(&self);
}

impl<T: HardwareTransport + ?Sized> HardwareTransport for &T {
    fn read8(&self, offset: u32) -> u8 {
        (**self).read8(offset)
    }
    fn read16(&self, offset: u32) -> u16 {
        (**self).read16(offset)
    }
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }
    fn write8(&self, offset: u32, value: u8) {
        (**self).write8(offset, value)
    }
    fn write16(&self, offset: u32, value: u16) {
        (**self).write16(offset, value)
    }
    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
    fn delay_us(&self, us: u64) {
        (**self).delay_us(us)
    }
    fn flush_cache(&self) {
        (**self).flush_cache()
    }
    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
        (**self).without_interrupts(f)
    }
    fn mask_irq(&self) {
        (**self).mask_irq()
    }
    fn unmask_irq(&self) {
        (**self).unmask_irq()
    }
    fn end_of_interrupt(&self) {
        (**self).end_of_interrupt()
    }
}

/// `done` が真になるまで最大 `timeout_us` ポーリングする
///
/// 成功したら `true`。リトライもバックオフも行わない。
pub fn wait_for<H: HardwareTransport>(
    hw: &H,
    timeout_us: u64,
    mut done: impl FnMut(&H) -> bool,
) -> bool {
    let mut remaining = timeout_us / POLL_INTERVAL_US;
    loop {
        if done(hw) {
            return true;
        }
        if remaining == 0 {
            return false;
        }
        hw.delay_us(POLL_INTERVAL_US);
        remaining -= 1;
    }
}

// ============================================================================
// DMA memory
// ============================================================================

/// A physically contiguous, non-pageable buffer shared with the controller.
///
/// The region does not free itself; hand it back to the [`DmaAllocator`]
/// that produced it.
#[derive(Debug)]
pub struct DmaRegion {
    virt: NonNull<u8>,
    phys: PhysAddr,
    len: usize,
}

// SAFETY: DmaRegion は専用に確保された DMA メモリを指す。
// アクセスはすべて volatile か、呼び出し側が排他を保証する unsafe 経路のみ。
unsafe impl Send for DmaRegion {}
// SAFETY: 共有参照からの書き込みは volatile の単一ワード書き込みか
// `bytes_mut` の安全性契約に従う範囲に限られる。
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// Wrap an allocation.
    ///
    /// # Safety
    /// `virt` must be valid for reads and writes of `len` bytes for as long
    /// as the region lives, and `phys` must be the bus address of the same
    /// memory.
    pub unsafe fn from_raw_parts(virt: NonNull<u8>, phys: PhysAddr, len: usize) -> Self {
        Self { virt, phys, len }
    }

    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    #[inline]
    pub fn virt(&self) -> NonNull<u8> {
        self.virt
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Volatile read of the `index`-th little-endian u32
    pub fn read_u32(&self, index: usize) -> u32 {
        assert!((index + 1) * 4 <= self.len, "DMA read out of bounds");
        // SAFETY: 範囲は上で検査済み。DMA バッファは 128 バイト以上でアラインされている。
        unsafe { ptr::read_volatile(self.virt.as_ptr().add(index * 4) as *const u32) }
    }

    /// Volatile write of the `index`-th little-endian u32
    pub fn write_u32(&self, index: usize, value: u32) {
        assert!((index + 1) * 4 <= self.len, "DMA write out of bounds");
        // SAFETY: 範囲は上で検査済み。DMA バッファは 128 バイト以上でアラインされている。
        unsafe { ptr::write_volatile(self.virt.as_ptr().add(index * 4) as *mut u32, value) }
    }

    /// Fill `len` bytes starting at `offset` with `byte`
    pub fn fill(&self, offset: usize, len: usize, byte: u8) {
        assert!(offset + len <= self.len, "DMA fill out of bounds");
        // SAFETY: 範囲は上で検査済み。
        unsafe { ptr::write_bytes(self.virt.as_ptr().add(offset), byte, len) }
    }

    /// Mutable view of `len` bytes at `offset`.
    ///
    /// # Safety
    /// No other reference into the same byte range may be alive while the
    /// returned slice is in use.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        assert!(offset + len <= self.len, "DMA slice out of bounds");
        // SAFETY: 範囲は検査済み。排他性は呼び出し側の契約。
        unsafe { core::slice::from_raw_parts_mut(self.virt.as_ptr().add(offset), len) }
    }

    /// Shared view of `len` bytes at `offset`.
    ///
    /// # Safety
    /// No mutable reference into the same byte range may be alive.
    pub unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset + len <= self.len, "DMA slice out of bounds");
        // SAFETY: 範囲は検査済み。排他性は呼び出し側の契約。
        unsafe { core::slice::from_raw_parts(self.virt.as_ptr().add(offset), len) }
    }
}

/// Source of DMA-capable memory.
///
/// Regions must be at least 128-byte aligned (CORB, RIRB and BDL
/// requirement). Every region returned by `alloc` is passed back to `free`
/// exactly once.
pub trait DmaAllocator {
    fn alloc(&self, size: usize) -> HdaResult<DmaRegion>;
    fn free(&self, region: DmaRegion);
}

impl<T: DmaAllocator + ?Sized> DmaAllocator for &T {
    fn alloc(&self, size: usize) -> HdaResult<DmaRegion> {
        (**self).alloc(size)
    }
    fn free(&self, region: DmaRegion) {
        (**self).free(region)
    }
}

// ============================================================================
// Deferred completion
// ============================================================================

/// Arranges for the host to call
/// [`Controller::poll_completions`](crate::Controller::poll_completions)
/// later, outside interrupt context.
///
/// Called from the interrupt path, so implementations must not block.
pub trait CompletionScheduler {
    fn schedule(&self);
}

impl<T: CompletionScheduler + ?Sized> CompletionScheduler for &T {
    fn schedule(&self) {
        (**self).schedule()
    }
}
