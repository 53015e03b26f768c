// ============================================================================
// src/sync/mod.rs - 同期プリミティブ
// 割り込みハンドラと遅延コンテキストの間の受け渡し
// ============================================================================

pub mod lockfree;

pub use lockfree::{CacheLinePadded, SpscRingBuffer};
