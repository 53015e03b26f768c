// ============================================================================
// src/codec/discovery.rs - Codec Topology Discovery
// ============================================================================
//!
//! コーデックの列挙と出力経路の確定。
//!
//! 1. STATESTS に応答したアドレスごとにルートノードを読み、最初の
//!    Audio Function Group を選ぶ
//! 2. AFG を D0 に上げ、各ウィジェットの能力と接続リストを読む
//! 3. 出力ピンごとに最短経路を探索し、コネクション選択・ピン出力有効化・
//!    ミュート解除・ストリームタグ割り当てを書き込む
//!
//! コマンドはすべて [`CodecLink`] 経由で送る。どこかで失敗したら
//! 探索全体を中断する。

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, info, warn};

use super::path::{OutputPath, find_output_paths};
use super::verb::*;
use super::widget::{
    Codec, FunctionGroup, MAX_CONNECTIONS, PinCaps, Widget, WidgetCaps, WidgetType,
};
use crate::config::Quirks;
use crate::error::HdaResult;
use crate::transport::CodecLink;

/// Codec addresses probed on the link
pub const MAX_CODECS: u8 = 16;

/// Enumerate every codec whose bit is set in `present` (STATESTS).
///
/// Routes all output pins of each codec's audio function group and tags
/// the converters they end at with `stream_tag`.
pub fn enumerate_codecs<L: CodecLink>(
    link: &mut L,
    present: u16,
    stream_tag: u8,
    quirks: Quirks,
) -> HdaResult<Vec<Codec>> {
    let mut codecs = Vec::new();
    for address in 0..MAX_CODECS {
        if present & (1 << address) == 0 {
            continue;
        }
        codecs.push(discover_codec(link, address, stream_tag, quirks)?);
    }
    Ok(codecs)
}

/// Walk one codec and commit its output paths
pub fn discover_codec<L: CodecLink>(
    link: &mut L,
    address: u8,
    stream_tag: u8,
    quirks: Quirks,
) -> HdaResult<Codec> {
    let mut resp = [0u32; 2];
    link.run_commands(
        &[
            get_param(address, ROOT_NODE, PARAM_VENDOR_ID),
            get_param(address, ROOT_NODE, PARAM_SUB_NODE_COUNT),
        ],
        &mut resp,
    )?;
    let mut codec = Codec {
        address,
        vendor_id: resp[0],
        afg: None,
    };
    let (fg_start, fg_count) = sub_nodes(resp[1]);
    info!(
        "[HDA] Codec {}: vendor={:04x} device={:04x}, {} function group(s)",
        address,
        codec.vendor(),
        codec.device(),
        fg_count
    );

    for nid in node_range(fg_start, fg_count) {
        link.run_commands(
            &[
                get_param(address, nid, PARAM_FUNC_GROUP_TYPE),
                get_param(address, nid, PARAM_SUB_NODE_COUNT),
            ],
            &mut resp,
        )?;
        if resp[0] & 0xFF != FUNC_GROUP_AUDIO {
            debug!("[HDA] Codec {}: node {} is not an audio group", address, nid);
            continue;
        }
        let (start, count) = sub_nodes(resp[1]);
        codec.afg = Some(enumerate_afg(link, address, nid, start, count, quirks)?);
        break;
    }

    let Some(afg) = codec.afg.as_mut() else {
        warn!("[HDA] Codec {}: no audio function group", address);
        return Ok(codec);
    };

    let paths = find_output_paths(afg);
    if paths.is_empty() {
        warn!("[HDA] Codec {}: no output pin reaches a converter", address);
    }
    for path in &paths {
        commit_output_path(link, address, afg, path, stream_tag, quirks)?;
    }
    Ok(codec)
}

fn node_range(start: NodeId, count: u8) -> impl Iterator<Item = NodeId> {
    let end = (start as u16 + count as u16).min(0x100);
    (start as u16..end).map(|n| n as NodeId)
}

/// Power up an audio function group and read all of its widgets
fn enumerate_afg<L: CodecLink>(
    link: &mut L,
    address: u8,
    afg_nid: NodeId,
    start: NodeId,
    count: u8,
    quirks: Quirks,
) -> HdaResult<FunctionGroup> {
    info!(
        "[HDA] AFG at node {}: widgets {}..{}",
        afg_nid,
        start,
        start as u16 + count as u16
    );
    link.send_command(make_command(
        address,
        afg_nid,
        VERB_SET_POWER | POWER_STATE_D0,
    ))?;

    let mut afg = FunctionGroup::new(afg_nid, start);
    for nid in node_range(start, count) {
        let caps = link.send_command(get_param(address, nid, PARAM_WIDGET_CAPS))?;
        let mut widget = Widget::new(nid, caps);

        if widget.widget_type == WidgetType::PinComplex {
            let pin_caps = link.send_command(get_param(address, nid, PARAM_PIN_CAPS))?;
            widget.pin_caps = PinCaps::from_bits_truncate(pin_caps);
            if widget.pin_caps.contains(PinCaps::EAPD) && quirks.contains(Quirks::EAPD_ENABLE) {
                link.send_command(make_command(address, nid, VERB_SET_EAPD | EAPD_ENABLE))?;
            }
        }
        if widget.caps.contains(WidgetCaps::CONN_LIST) {
            widget.connections = read_connections(link, address, nid)?;
        }

        debug!(
            "[HDA]   node {:3}: {:<14} caps={:08x} conns={:?}",
            nid,
            widget.widget_type.name(),
            caps,
            widget.connections
        );
        afg.widgets.push(widget);
    }
    Ok(afg)
}

/// Read a widget's connection list (short or long form)
fn read_connections<L: CodecLink>(link: &mut L, address: u8, nid: NodeId) -> HdaResult<Vec<u16>> {
    let len = link.send_command(get_param(address, nid, PARAM_CONN_LIST_LEN))?;
    let long_form = len & CONN_LIST_LONG_FORM != 0;
    let mut count = (len & CONN_LIST_LEN_MASK) as usize;
    if count > MAX_CONNECTIONS {
        warn!(
            "[HDA] node {} lists {} connections, keeping {}",
            nid, count, MAX_CONNECTIONS
        );
        count = MAX_CONNECTIONS;
    }

    // 1 レスポンスあたり long form は 16 ビット x2、short form は 8 ビット x4
    let (per_response, bits) = if long_form { (2, 16) } else { (4, 8) };
    let mask = (1u32 << bits) - 1;

    let commands: Vec<u32> = (0..count)
        .step_by(per_response)
        .map(|i| make_command(address, nid, VERB_GET_CONN_LIST | i as u32))
        .collect();
    let mut responses = vec![0u32; commands.len()];
    link.run_commands(&commands, &mut responses)?;

    let connections = responses
        .iter()
        .flat_map(|&resp| (0..per_response).map(move |j| ((resp >> (j * bits)) & mask) as u16))
        .take(count)
        .collect();
    Ok(connections)
}

// ============================================================================
// Path commit
// ============================================================================

/// Program the widgets along `path` so the pin plays whatever the
/// terminal converter receives on `stream_tag`.
pub fn commit_output_path<L: CodecLink>(
    link: &mut L,
    address: u8,
    afg: &mut FunctionGroup,
    path: &OutputPath,
    stream_tag: u8,
    quirks: Quirks,
) -> HdaResult<()> {
    let (Some(pin), Some(converter)) = (path.pin(), path.converter()) else {
        return Ok(());
    };
    info!(
        "[HDA] Codec {}: routing pin {} -> converter {} ({} hops)",
        address,
        pin,
        converter,
        path.len()
    );

    for hop in &path.hops {
        let Some(widget) = afg.widget_mut(hop.nid) else {
            continue;
        };
        widget.out_path = Some(hop.next);
        // ミキサーは全入力を合成するので選択不要
        if widget.widget_type != WidgetType::Mixer {
            link.send_command(make_command(
                address,
                hop.nid,
                VERB_SET_CONN_SEL | hop.connection_index as u32,
            ))?;
        }
    }

    let pin_ctl = link.send_command(make_command(address, pin, VERB_GET_PIN_CTL))?;
    link.send_command(make_command(
        address,
        pin,
        VERB_SET_PIN_CTL | ((pin_ctl | PIN_CTL_OUT_EN) & 0xFF),
    ))?;

    for hop in &path.hops {
        if afg.widget(hop.nid).is_some_and(Widget::has_out_amp) {
            unmute_output(link, address, hop.nid)?;
        }
    }

    let Some(ao) = afg.widget_mut(converter) else {
        return Ok(());
    };
    ao.stream_tag = Some(stream_tag);
    let has_amp = ao.has_out_amp();
    let digital = ao.is_digital();

    link.send_command(make_command(
        address,
        converter,
        VERB_SET_CONV_STREAM | ((stream_tag as u32) << 4),
    ))?;
    if has_amp {
        unmute_output(link, address, converter)?;
    }
    if digital && quirks.contains(Quirks::DIGITAL_OUT_ENABLE) {
        let dig = link.send_command(make_command(address, converter, VERB_GET_DIG_CVT))?;
        link.send_command(make_command(
            address,
            converter,
            VERB_SET_DIG_CVT_1 | ((dig | DIG_CVT_DIGEN) & 0xFF),
        ))?;
    }
    Ok(())
}

/// Unmute both output amp channels at full gain
fn unmute_output<L: CodecLink>(link: &mut L, address: u8, nid: NodeId) -> HdaResult<()> {
    let caps = link.send_command(get_param(address, nid, PARAM_OUT_AMP_CAPS))?;
    let gain = amp_num_steps(caps);
    link.send_command(make_command(
        address,
        nid,
        VERB_SET_AMP_GAIN | AMP_SET_OUTPUT | AMP_SET_LEFT | AMP_SET_RIGHT | gain,
    ))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HdaError;
    use crate::sim::{Lcg, SimAllocator, SimCodec, SimHda, SimWidget};
    use crate::transport::{COMMAND_TIMEOUT_US, CommandRing, RingLink};

    fn discover(hw: &SimHda, present: u16, quirks: Quirks) -> HdaResult<Vec<Codec>> {
        let alloc = SimAllocator::new();
        let mut ring = CommandRing::setup(hw, &alloc, 1, COMMAND_TIMEOUT_US)?;
        let mut link = RingLink { ring: &mut ring, hw };
        enumerate_codecs(&mut link, present, 1, quirks)
    }

    /// 2: AO, 3: mixer -> 2, 4: selector -> 3, 5: pin -> [4, 3]
    fn basic_codec(address: u8) -> SimCodec {
        SimCodec::new(address, 0x10EC_0269)
            .widget(SimWidget::output(2))
            .widget(SimWidget::mixer(3, &[2]))
            .widget(SimWidget::selector(4, &[3]))
            .widget(SimWidget::pin(5, &[4, 3]))
    }

    #[test]
    fn test_enumerates_present_codecs() {
        let hw = SimHda::builder()
            .codec(basic_codec(0))
            .codec(basic_codec(2))
            .build();
        let codecs = discover(&hw, 0b101, Quirks::default()).unwrap();
        assert_eq!(codecs.len(), 2);
        assert_eq!(codecs[0].address, 0);
        assert_eq!(codecs[1].address, 2);
        assert_eq!(codecs[0].vendor(), 0x10EC);
        assert_eq!(codecs[0].device(), 0x0269);
        let afg = codecs[0].afg.as_ref().unwrap();
        assert_eq!(afg.widgets.len(), 4);
        assert_eq!(afg.widget(5).unwrap().connections, vec![4, 3]);
    }

    #[test]
    fn test_commit_routes_shortest_path() {
        let hw = SimHda::builder().codec(basic_codec(0)).build();
        let codecs = discover(&hw, 0b1, Quirks::default()).unwrap();
        let afg = codecs[0].afg.as_ref().unwrap();

        assert_eq!(afg.widget(5).unwrap().out_path, Some(3));
        assert_eq!(afg.widget(3).unwrap().out_path, Some(2));
        assert_eq!(afg.widget(4).unwrap().out_path, None);
        assert_eq!(afg.widget(2).unwrap().stream_tag, Some(1));

        // ピンはコネクション 1 を選択、ミキサーには選択を送らない
        assert!(hw.codec_received(0, 5, VERB_SET_CONN_SEL | 1));
        assert!(!hw.codec_received_verb(0, 3, VERB_SET_CONN_SEL));
        assert_ne!(hw.sim_widget(0, 5).pin_ctl & PIN_CTL_OUT_EN, 0);
        assert!(hw.codec_received(0, 2, VERB_SET_CONV_STREAM | 0x10));
        // AFG は D0 へ
        assert!(hw.codec_received(0, 1, VERB_SET_POWER | POWER_STATE_D0));
    }

    #[test]
    fn test_unmutes_amps_at_max_gain() {
        let hw = SimHda::builder().codec(basic_codec(0)).build();
        discover(&hw, 0b1, Quirks::default()).unwrap();
        let gain = hw.sim_widget(0, 2).amp_gain;
        assert_eq!(gain, Some(AMP_SET_OUTPUT | AMP_SET_LEFT | AMP_SET_RIGHT | 0x57));
    }

    #[test]
    fn test_pin_ctl_read_modify_write() {
        let codec = SimCodec::new(0, 0x1AF4_0022)
            .widget(SimWidget::output(2))
            .widget(SimWidget::pin(3, &[2]).with_pin_ctl(PIN_CTL_HP_EN));
        let hw = SimHda::builder().codec(codec).build();
        discover(&hw, 0b1, Quirks::default()).unwrap();
        assert_eq!(hw.sim_widget(0, 3).pin_ctl, PIN_CTL_HP_EN | PIN_CTL_OUT_EN);
    }

    #[test]
    fn test_eapd_quirk() {
        let codec = SimCodec::new(0, 0x1AF4_0022)
            .widget(SimWidget::output(2))
            .widget(SimWidget::pin(3, &[2]).with_eapd());
        let hw = SimHda::builder().codec(codec.clone()).build();
        discover(&hw, 0b1, Quirks::default()).unwrap();
        assert!(hw.codec_received(0, 3, VERB_SET_EAPD | EAPD_ENABLE));

        let hw = SimHda::builder().codec(codec).build();
        discover(&hw, 0b1, Quirks::empty()).unwrap();
        assert!(!hw.codec_received_verb(0, 3, VERB_SET_EAPD));
    }

    #[test]
    fn test_digital_converter_enabled() {
        let codec = SimCodec::new(0, 0x8086_2812)
            .widget(SimWidget::output(2).digital())
            .widget(SimWidget::pin(3, &[2]));
        let hw = SimHda::builder().codec(codec).build();
        discover(&hw, 0b1, Quirks::default()).unwrap();
        assert_eq!(hw.sim_widget(0, 2).dig_cvt & DIG_CVT_DIGEN, DIG_CVT_DIGEN);
    }

    #[test]
    fn test_long_and_short_connection_lists() {
        let conns: Vec<u16> = (2..9).collect();
        let codec = SimCodec::new(0, 0x10EC_0662)
            .widget(SimWidget::output(2))
            .widget(SimWidget::mixer(3, &[2]))
            .widget(SimWidget::mixer(4, &[2]))
            .widget(SimWidget::mixer(5, &[2]))
            .widget(SimWidget::mixer(6, &[2]))
            .widget(SimWidget::mixer(7, &[2]))
            .widget(SimWidget::mixer(8, &[2]))
            .widget(SimWidget::mixer(9, &conns))
            .widget(SimWidget::mixer(10, &conns).long_form());
        let hw = SimHda::builder().ring_entries(2).codec(codec).build();
        let codecs = discover(&hw, 0b1, Quirks::default()).unwrap();
        let afg = codecs[0].afg.as_ref().unwrap();
        assert_eq!(afg.widget(9).unwrap().connections, conns);
        assert_eq!(afg.widget(10).unwrap().connections, conns);
    }

    #[test]
    fn test_connection_list_capped() {
        let conns: Vec<u16> = (0..20).map(|i| 0x20 + i).collect();
        let codec = SimCodec::new(0, 0x10EC_0662).widget(SimWidget::mixer(2, &conns));
        let hw = SimHda::builder().codec(codec).build();
        let codecs = discover(&hw, 0b1, Quirks::default()).unwrap();
        let afg = codecs[0].afg.as_ref().unwrap();
        assert_eq!(afg.widget(2).unwrap().connections, conns[..MAX_CONNECTIONS].to_vec());
    }

    #[test]
    fn test_first_audio_group_selected() {
        // 1: modem group, 2: audio group, 3: AO, 4: pin -> 3
        let codec = SimCodec::new(0, 0x14F1_5051)
            .with_modem_group_first()
            .widget(SimWidget::output(3))
            .widget(SimWidget::pin(4, &[3]));
        let hw = SimHda::builder().codec(codec).build();
        let codecs = discover(&hw, 0b1, Quirks::default()).unwrap();
        let afg = codecs[0].afg.as_ref().unwrap();
        assert_eq!(afg.nid, 2);
        assert_eq!(afg.widget_start, 3);
        assert_eq!(afg.widget(3).unwrap().stream_tag, Some(1));
    }

    #[test]
    fn test_missing_codec_aborts_discovery() {
        let hw = SimHda::builder().codec(basic_codec(0)).build();
        let alloc = SimAllocator::new();
        let mut ring = CommandRing::setup(&hw, &alloc, 1, 1_000).unwrap();
        let mut link = RingLink { ring: &mut ring, hw: &hw };
        // アドレス 1 は応答しない
        assert_eq!(
            enumerate_codecs(&mut link, 0b11, 1, Quirks::default()),
            Err(HdaError::CommandTimeout)
        );
    }

    #[test]
    fn test_unrouted_pin_leaves_converter_untagged() {
        let codec = SimCodec::new(0, 0x10EC_0269)
            .widget(SimWidget::output(2))
            .widget(SimWidget::pin(3, &[]));
        let hw = SimHda::builder().codec(codec).build();
        let codecs = discover(&hw, 0b1, Quirks::default()).unwrap();
        let afg = codecs[0].afg.as_ref().unwrap();
        assert_eq!(afg.converters_for(1).count(), 0);
    }

    #[test]
    fn test_generated_graphs_never_select_on_mixers() {
        let mut rng = Lcg(0xA0D1);
        let mut selects = 0;
        for _ in 0..150 {
            let n = 2 + rng.below(14) as usize;
            let mut codec = SimCodec::new(0, 0x10EC_0269);
            let mut mixers = Vec::new();
            for i in 0..n {
                let nid = 2 + i as NodeId;
                let conns: Vec<u16> = (0..rng.below(4))
                    .map(|_| 2 + rng.below(n as u64) as u16)
                    .collect();
                let widget = match rng.below(4) {
                    0 => SimWidget::output(nid),
                    1 => {
                        mixers.push(nid);
                        SimWidget::mixer(nid, &conns)
                    }
                    2 => SimWidget::selector(nid, &conns),
                    _ => SimWidget::pin(nid, &conns),
                };
                codec = codec.widget(widget);
            }
            let hw = SimHda::builder().codec(codec).build();
            discover(&hw, 0b1, Quirks::default()).unwrap();

            for word in hw.command_log() {
                let cmd = Command::decode(word);
                if cmd.verb_id() == VERB_SET_CONN_SEL {
                    selects += 1;
                    assert!(
                        !mixers.contains(&cmd.node_id),
                        "connection select sent to mixer {}",
                        cmd.node_id
                    );
                }
            }
        }
        assert!(selects > 0);
    }
}
