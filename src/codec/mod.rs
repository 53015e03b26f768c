// ============================================================================
// src/codec/mod.rs - HDA Codec Topology
// ============================================================================
//!
//! # コーデックトポロジ
//!
//! - `verb`: コマンドワードとパラメータ定数
//! - `widget`: コーデック / ファンクショングループ / ウィジェットのモデル
//! - `path`: 出力ピンから Audio Output への最短経路探索
//! - `discovery`: 列挙と経路のコミット

pub mod discovery;
pub mod path;
pub mod verb;
pub mod widget;

pub use discovery::{commit_output_path, discover_codec, enumerate_codecs};
pub use path::{Hop, OutputPath, find_output_path, find_output_paths};
pub use verb::NodeId;
pub use widget::{Codec, FunctionGroup, PinCaps, Widget, WidgetCaps, WidgetType};
