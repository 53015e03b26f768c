// ============================================================================
// src/lib.rs - Intel HD Audio Driver Core
// ============================================================================
//!
//! # hdaudio
//!
//! Intel High Definition Audio コントローラのドライバコア。
//!
//! - CORB/RIRB コマンドトランスポート ([`transport`])
//! - コーデックトポロジの列挙と出力経路探索 ([`codec`])
//! - 巡回バッファと BDL による出力ストリーム ([`stream`])
//! - サンプル変換 ([`convert`])
//! - 割り込みディスパッチ ([`interrupt`])
//! - ブロックキューと完了通知 ([`queue`])
//!
//! MMIO のマッピング、IRQ の割り当て、物理メモリの確保はホストの責務で、
//! [`hal`] のトレイト越しに受け取る。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod codec;
pub mod config;
pub mod controller;
pub mod convert;
pub mod debug;
pub mod error;
pub mod hal;
pub mod interrupt;
#[cfg(target_arch = "x86_64")]
pub mod platform;
pub mod queue;
pub mod regs;
pub mod stream;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod sim;

pub use config::{ControllerConfig, Quirks};
pub use controller::Controller;
pub use convert::Converter;
pub use error::{ErrorKind, Fault, HdaError, HdaResult};
pub use hal::{CompletionScheduler, DmaAllocator, DmaRegion, HardwareTransport};
pub use interrupt::{InterruptStatsSnapshot, IrqOutcome};
pub use queue::{AudioBlock, Completion};
pub use stream::{Negotiated, OutputCaps, PcmFormat, StreamState, WaveFormats};
