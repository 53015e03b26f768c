// ============================================================================
// src/codec/path.rs - Output Path Search
// ============================================================================
//!
//! ピンコンプレックスから Audio Output までの最短経路探索。
//!
//! 探索は純粋関数で、ウィジェットにもハードウェアにも触れない。
//! 選択結果の書き込み（コネクション選択、ミュート解除）は
//! `discovery` 側のコミットパスで行う。
//!
//! - 接続リスト順に深さ優先で探索し、最小ホップ数の候補を採用（同数なら先勝ち）
//! - 探索中スタック上にあるノードへの辺は無視するため、循環があっても停止する
//! - スタックに依存しない結果のみメモ化する

use alloc::vec;
use alloc::vec::Vec;

use log::warn;

use super::verb::NodeId;
use super::widget::{FunctionGroup, WidgetType};

/// One step along an output path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    /// Widget the step leaves from
    pub nid: NodeId,
    /// Index into that widget's connection list
    pub connection_index: u8,
    /// Widget the step arrives at
    pub next: NodeId,
}

/// Resolved route from a pin to an Audio Output converter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPath {
    pub hops: Vec<Hop>,
}

impl OutputPath {
    /// Number of hops; 1 when the pin connects directly to a converter
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Starting widget (the pin)
    pub fn pin(&self) -> Option<NodeId> {
        self.hops.first().map(|h| h.nid)
    }

    /// Terminal Audio Output widget
    pub fn converter(&self) -> Option<NodeId> {
        self.hops.last().map(|h| h.next)
    }
}

struct Outcome {
    route: Option<Vec<Hop>>,
    /// Result was cut short by a widget on the current search stack
    stack_dependent: bool,
}

struct Search<'a> {
    afg: &'a FunctionGroup,
    on_stack: Vec<bool>,
    memo: Vec<Option<Option<Vec<Hop>>>>,
}

impl<'a> Search<'a> {
    fn new(afg: &'a FunctionGroup) -> Self {
        Self {
            afg,
            on_stack: vec![false; afg.widgets.len()],
            memo: vec![None; afg.widgets.len()],
        }
    }

    fn search(&mut self, index: usize) -> Outcome {
        if let Some(route) = &self.memo[index] {
            return Outcome {
                route: route.clone(),
                stack_dependent: false,
            };
        }

        let afg = self.afg;
        let widget = &afg.widgets[index];
        self.on_stack[index] = true;

        let mut best: Option<Vec<Hop>> = None;
        let mut stack_dependent = false;

        for (i, &conn) in widget.connections.iter().enumerate() {
            let Some(next) = afg.index_of(conn) else {
                warn!(
                    "[HDA] widget {} has invalid connection {}",
                    widget.nid, conn
                );
                continue;
            };
            let input = &afg.widgets[next];
            let hop = Hop {
                nid: widget.nid,
                connection_index: i as u8,
                next: input.nid,
            };

            if input.widget_type == WidgetType::AudioOutput {
                best = Some(vec![hop]);
                break;
            }
            if self.on_stack[next] {
                stack_dependent = true;
                continue;
            }

            let sub = self.search(next);
            stack_dependent |= sub.stack_dependent;
            if let Some(rest) = sub.route {
                if best.as_ref().is_none_or(|b| rest.len() + 1 < b.len()) {
                    let mut hops = Vec::with_capacity(rest.len() + 1);
                    hops.push(hop);
                    hops.extend(rest);
                    best = Some(hops);
                }
            }
        }

        self.on_stack[index] = false;
        if !stack_dependent {
            self.memo[index] = Some(best.clone());
        }
        Outcome {
            route: best,
            stack_dependent,
        }
    }
}

/// Shortest path from widget `from` to any Audio Output in `afg`.
///
/// `None` when no Audio Output is reachable or `from` is not in the group.
pub fn find_output_path(afg: &FunctionGroup, from: NodeId) -> Option<OutputPath> {
    let start = afg.index_of(from as u16)?;
    Search::new(afg)
        .search(start)
        .route
        .map(|hops| OutputPath { hops })
}

/// Paths for every output-capable pin, in node id order
pub fn find_output_paths(afg: &FunctionGroup) -> Vec<OutputPath> {
    let mut search = Search::new(afg);
    afg.widgets
        .iter()
        .enumerate()
        .filter(|(_, w)| w.is_output_pin())
        .filter_map(|(i, _)| search.search(i).route)
        .map(|hops| OutputPath { hops })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
