// ============================================================================
// src/sync/lockfree.rs - Completion Hand-off Ring
// ============================================================================
//!
//! # 完了通知リング
//!
//! 割り込みハンドラが再生を終えたブロックを積み、遅延コンテキストが
//! 提出順に取り出す固定長リング。
//!
//! - 書き手は `BlockQueue::pending` のロックを持つ側だけ（割り込み経路、
//!   または割り込み禁止中の `close`）
//! - 読み手は `BlockQueue::poll` のロックを持つ側だけ
//! - スロット数 `N` のうち 1 つは満杯判定のために空けておく
//!
//! 書き込み位置と読み出し位置は別々のキャッシュラインに置き、割り込み側と
//! 遅延コンテキスト側が同じラインを取り合わないようにする。

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

/// One value on its own 64-byte line
#[repr(C, align(64))]
pub struct CacheLinePadded<T> {
    value: T,
}

impl<T> CacheLinePadded<T> {
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> core::ops::Deref for CacheLinePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

/// Fixed ring moving owned values from one producer to one consumer
pub struct SpscRingBuffer<T, const N: usize> {
    /// Next slot the producer fills
    write: CacheLinePadded<AtomicUsize>,
    /// Next slot the consumer takes
    read: CacheLinePadded<AtomicUsize>,
    slots: UnsafeCell<[MaybeUninit<T>; N]>,
}

// SAFETY: 各スロットは write/read の公開によって片側ずつ所有が移る。
// 書き手と読み手がそれぞれ 1 つであることは呼び出し側のロックが保証する。
unsafe impl<T: Send, const N: usize> Send for SpscRingBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for SpscRingBuffer<T, N> {}

impl<T, const N: usize> SpscRingBuffer<T, N> {
    pub const fn new() -> Self {
        assert!(N >= 2, "completion ring needs at least 2 slots");
        Self {
            write: CacheLinePadded::new(AtomicUsize::new(0)),
            read: CacheLinePadded::new(AtomicUsize::new(0)),
            slots: UnsafeCell::new([const { MaybeUninit::uninit() }; N]),
        }
    }

    /// Values the ring can hold at once
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    pub fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        (write + N - read) % N
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N - 1
    }

    /// Producer side. A full ring hands `value` back.
    pub fn push(&self, value: T) -> Result<(), T> {
        let write = self.write.load(Ordering::Relaxed);
        let next = (write + 1) % N;
        if next == self.read.load(Ordering::Acquire) {
            return Err(value);
        }
        // SAFETY: write 位置のスロットは読み手にまだ公開されていない
        unsafe { (*self.slots.get())[write].write(value) };
        self.write.store(next, Ordering::Release);
        Ok(())
    }

    /// Consumer side, oldest value first
    pub fn pop(&self) -> Option<T> {
        let read = self.read.load(Ordering::Relaxed);
        if read == self.write.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: read != write なので書き手が初期化して公開済み。
        // read を進めるまで書き手はこのスロットを再利用しない。
        let value = unsafe { (*self.slots.get())[read].assume_init_read() };
        self.read.store((read + 1) % N, Ordering::Release);
        Some(value)
    }
}

impl<T, const N: usize> Default for SpscRingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for SpscRingBuffer<T, N> {
    fn drop(&mut self) {
        // 未配送のブロックもここで解放する
        while self.pop().is_some() {}
    }
}
