// ============================================================================
// src/sim.rs - Simulated Controller for Tests
// ============================================================================
//!
//! テスト専用のソフトウェア HDA コントローラ。
//!
//! - レジスタファイル: W1C や CRST/SRST などの副作用を再現
//! - CORBWP 書き込みで CORB を消費し、コーデックモデルの応答を RIRB に積む
//! - DMA メモリはヒープから確保し、物理アドレス = 仮想アドレスとして扱う

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

use x86_64::PhysAddr;

use crate::codec::verb::*;
use crate::error::{HdaError, HdaResult};
use crate::hal::{CompletionScheduler, DmaAllocator, DmaRegion, HardwareTransport};
use crate::regs::*;

const REG_SPACE: usize = 0x800;

// ============================================================================
// Codec model
// ============================================================================

/// One widget of a simulated codec, plus whatever the driver wrote to it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimWidget {
    pub nid: NodeId,
    pub caps: u32,
    pub pin_caps: u32,
    pub connections: Vec<u16>,
    pub long_form: bool,
    pub amp_caps: u32,
    pub pin_ctl: u32,
    pub dig_cvt: u32,
    pub amp_gain: Option<u32>,
    pub conn_sel: Option<u8>,
    pub conv_fmt: Option<u16>,
    pub conv_stream: Option<u8>,
    pub chan_count: Option<u8>,
    pub eapd: Option<u32>,
}

impl SimWidget {
    /// Stereo Audio Output with an output amp
    pub fn output(nid: NodeId) -> Self {
        Self {
            nid,
            caps: 0x15,
            amp_caps: 0x5757,
            ..Self::default()
        }
    }

    pub fn mixer(nid: NodeId, connections: &[u16]) -> Self {
        Self {
            nid,
            caps: (2 << 20) | 0x101,
            connections: connections.to_vec(),
            ..Self::default()
        }
    }

    pub fn selector(nid: NodeId, connections: &[u16]) -> Self {
        Self {
            nid,
            caps: (3 << 20) | 0x100,
            connections: connections.to_vec(),
            ..Self::default()
        }
    }

    /// Output-capable pin with an output amp
    pub fn pin(nid: NodeId, connections: &[u16]) -> Self {
        Self {
            nid,
            caps: (4 << 20) | 0x105,
            pin_caps: 1 << 4,
            connections: connections.to_vec(),
            ..Self::default()
        }
    }

    pub fn digital(mut self) -> Self {
        self.caps |= 1 << 9;
        self
    }

    pub fn with_eapd(mut self) -> Self {
        self.pin_caps |= 1 << 16;
        self
    }

    pub fn long_form(mut self) -> Self {
        self.long_form = true;
        self
    }

    pub fn with_pin_ctl(mut self, value: u32) -> Self {
        self.pin_ctl = value;
        self
    }

    fn conn_list_len(&self) -> u32 {
        let form = if self.long_form { CONN_LIST_LONG_FORM } else { 0 };
        form | (self.connections.len() as u32 & CONN_LIST_LEN_MASK)
    }

    fn conn_list_entry(&self, index: usize) -> u32 {
        let (per, bits) = if self.long_form { (2, 16) } else { (4, 8) };
        (0..per)
            .filter_map(|j| self.connections.get(index + j).map(|&c| (j, c)))
            .fold(0, |acc, (j, c)| acc | ((c as u32) << (j * bits)))
    }
}

/// A codec answering on one link address
#[derive(Debug, Clone)]
pub struct SimCodec {
    pub address: u8,
    pub vendor_id: u32,
    modem_first: bool,
    widgets: Vec<SimWidget>,
    afg_power: Option<u32>,
}

impl SimCodec {
    pub fn new(address: u8, vendor_id: u32) -> Self {
        Self {
            address,
            vendor_id,
            modem_first: false,
            widgets: Vec::new(),
            afg_power: None,
        }
    }

    pub fn widget(mut self, widget: SimWidget) -> Self {
        self.widgets.push(widget);
        self.widgets.sort_by_key(|w| w.nid);
        self
    }

    /// Put a modem function group at node 1 and the audio group at node 2
    pub fn with_modem_group_first(mut self) -> Self {
        self.modem_first = true;
        self
    }

    fn afg_nid(&self) -> NodeId {
        if self.modem_first { 2 } else { 1 }
    }

    fn widget_start(&self) -> NodeId {
        self.widgets.first().map_or(self.afg_nid() + 1, |w| w.nid)
    }

    fn widget_mut(&mut self, nid: NodeId) -> Option<&mut SimWidget> {
        self.widgets.iter_mut().find(|w| w.nid == nid)
    }

    fn respond(&mut self, cmd: Command) -> u32 {
        let nid = cmd.node_id;
        let payload = cmd.payload();
        let afg = self.afg_nid();
        let fg_count: u32 = if self.modem_first { 2 } else { 1 };

        if cmd.verb_id() == VERB_GET_PARAM {
            let param = payload as u8;
            return match (nid, param) {
                (ROOT_NODE, PARAM_VENDOR_ID) => self.vendor_id,
                (ROOT_NODE, PARAM_REVISION_ID) => 0x0010_0100,
                (ROOT_NODE, PARAM_SUB_NODE_COUNT) => (1 << 16) | fg_count,
                (n, PARAM_FUNC_GROUP_TYPE) if n == afg => FUNC_GROUP_AUDIO,
                (1, PARAM_FUNC_GROUP_TYPE) if self.modem_first => 0x02,
                (n, PARAM_SUB_NODE_COUNT) if n == afg => {
                    ((self.widget_start() as u32) << 16) | self.widgets.len() as u32
                }
                (1, PARAM_SUB_NODE_COUNT) if self.modem_first => 0,
                _ => match self.widget_mut(nid) {
                    Some(w) => match param {
                        PARAM_WIDGET_CAPS => w.caps,
                        PARAM_PIN_CAPS => w.pin_caps,
                        PARAM_CONN_LIST_LEN => w.conn_list_len(),
                        PARAM_OUT_AMP_CAPS => w.amp_caps,
                        _ => 0,
                    },
                    None => 0,
                },
            };
        }

        if nid == afg && cmd.verb_id() == VERB_SET_POWER {
            self.afg_power = Some(payload);
            return 0;
        }
        let Some(w) = self.widget_mut(nid) else {
            return 0;
        };
        match cmd.verb_id() {
            VERB_GET_CONN_LIST => w.conn_list_entry(payload as usize),
            VERB_SET_CONN_SEL => {
                w.conn_sel = Some(payload as u8);
                0
            }
            VERB_GET_PIN_CTL => w.pin_ctl,
            VERB_SET_PIN_CTL => {
                w.pin_ctl = payload;
                0
            }
            VERB_GET_DIG_CVT => w.dig_cvt,
            VERB_SET_DIG_CVT_1 => {
                w.dig_cvt = (w.dig_cvt & !0xFF) | payload;
                0
            }
            VERB_SET_AMP_GAIN => {
                w.amp_gain = Some(payload);
                0
            }
            VERB_SET_CONV_FMT => {
                w.conv_fmt = Some(payload as u16);
                0
            }
            VERB_SET_CONV_STREAM => {
                w.conv_stream = Some(payload as u8);
                0
            }
            VERB_SET_CONV_CHAN_COUNT => {
                w.chan_count = Some(payload as u8);
                0
            }
            VERB_SET_EAPD => {
                w.eapd = Some(payload);
                0
            }
            _ => 0,
        }
    }
}

// ============================================================================
// Controller model
// ============================================================================

struct SimState {
    regs: Vec<u8>,
    codecs: Vec<SimCodec>,
    echo: bool,
    sluggish_srst: bool,
    stuck_in_reset: bool,
    extra_presence: u16,
    stalled: bool,
    mute: bool,
    unsol_before: usize,
    unsol_after: usize,
    solicited_after: usize,
    command_log: Vec<u32>,
}

impl SimState {
    fn get(&self, offset: u32, width: usize) -> u32 {
        let o = offset as usize;
        (0..width).fold(0, |acc, i| acc | (self.regs[o + i] as u32) << (i * 8))
    }

    fn set(&mut self, offset: u32, width: usize, value: u32) {
        let o = offset as usize;
        for i in 0..width {
            self.regs[o + i] = (value >> (i * 8)) as u8;
        }
    }

    fn presence(&self) -> u16 {
        self.codecs
            .iter()
            .fold(self.extra_presence, |acc, c| acc | (1 << c.address))
    }

    fn total_streams(&self) -> u32 {
        Gcap::from(self.get(REG_GCAP, 2) as u16).total_streams() as u32
    }

    fn stream_sts_index(&self, offset: u32) -> Option<u32> {
        if offset < REG_SDESC_BASE {
            return None;
        }
        let rel = offset - REG_SDESC_BASE;
        let index = rel / STREAM_DESC_SIZE;
        (index < self.total_streams() && rel % STREAM_DESC_SIZE == REG_SD_STS).then_some(index)
    }

    fn stream_ctl_index(&self, offset: u32) -> Option<u32> {
        if offset < REG_SDESC_BASE {
            return None;
        }
        let rel = offset - REG_SDESC_BASE;
        let index = rel / STREAM_DESC_SIZE;
        (index < self.total_streams() && rel % STREAM_DESC_SIZE == REG_SD_CTL0).then_some(index)
    }

    fn intsts(&self) -> u32 {
        let mut v = 0;
        for i in 0..self.total_streams().min(MAX_STREAM_INTERRUPTS) {
            let sts = self.get(stream_desc_offset(i as u8) + REG_SD_STS, 1) as u8;
            if sts & StreamStatus::INTERRUPT_BITS.bits() != 0 {
                v |= 1 << i;
            }
        }
        if self.get(REG_CORBSTS, 1) as u8 & CORBSTS_CMEI != 0 {
            v |= INTSTS_CIS;
        }
        if v != 0 {
            v |= INTSTS_GIS;
        }
        v
    }

    fn read(&self, offset: u32, width: usize) -> u32 {
        if offset == REG_INTSTS {
            return self.intsts();
        }
        self.get(offset, width)
    }

    fn write(&mut self, offset: u32, width: usize, value: u32) {
        match offset {
            REG_GCTL => {
                let old = self.get(REG_GCTL, 4);
                let mut new = value;
                if self.stuck_in_reset {
                    new = (new & !GCTL_CRST) | (old & GCTL_CRST);
                }
                self.set(REG_GCTL, 4, new);
                if old & GCTL_CRST == 0 && new & GCTL_CRST != 0 {
                    let present = self.presence() as u32;
                    self.set(REG_STATESTS, 2, present);
                }
            }
            REG_STATESTS | REG_CORBSTS | REG_RIRBSTS => {
                let old = self.get(offset, width);
                self.set(offset, width, old & !value);
            }
            REG_INTSTS => {}
            REG_CORBRP => self.set(offset, 2, value & CORBRP_RST as u32),
            REG_RIRBWP => {
                if value & RIRBWP_RST as u32 != 0 {
                    self.set(offset, 2, 0);
                }
            }
            REG_CORBSIZE | REG_RIRBSIZE => {
                let cap = self.get(offset, 1) & 0xF0;
                self.set(offset, 1, cap | (value & RINGSIZE_SIZE_MASK as u32));
            }
            REG_CORBWP => {
                self.set(offset, 2, value & RING_PTR_MASK as u32);
                if !self.stalled {
                    self.process_corb();
                }
            }
            _ if self.stream_sts_index(offset).is_some() => {
                let old = self.get(offset, 1);
                self.set(offset, 1, old & !(value & StreamStatus::INTERRUPT_BITS.bits() as u32));
            }
            _ if self.sluggish_srst && self.stream_ctl_index(offset).is_some() => {
                let srst = StreamCtl::SRST.bits() as u32;
                let old = self.get(offset, 1);
                self.set(offset, 1, (value & !srst) | (old & srst));
            }
            _ => self.set(offset, width, value),
        }
    }

    fn ring_entries(&self, size_reg: u32) -> u32 {
        match self.get(size_reg, 1) as u8 & RINGSIZE_SIZE_MASK {
            RINGSIZE_2 => 2,
            RINGSIZE_16 => 16,
            _ => 256,
        }
    }

    fn base(&self, lower: u32) -> u64 {
        self.get(lower, 4) as u64 | (self.get(lower + 4, 4) as u64) << 32
    }

    fn process_corb(&mut self) {
        if self.get(REG_CORBCTL, 1) as u8 & CORBCTL_CORBRUN == 0 {
            return;
        }
        let entries = self.ring_entries(REG_CORBSIZE);
        let base = self.base(REG_CORBLBASE);
        let wp = self.get(REG_CORBWP, 2);
        let mut rp = self.get(REG_CORBRP, 2) & RING_PTR_MASK as u32;

        let mut commands = Vec::new();
        while rp != wp {
            rp = (rp + 1) % entries;
            // SAFETY: CORB は SimAllocator の確保領域で、物理アドレス = 仮想アドレス
            let word = unsafe { ptr::read_volatile((base + rp as u64 * 4) as *const u32) };
            commands.push(word);
        }
        self.set(REG_CORBRP, 2, rp);

        for k in 0..core::mem::take(&mut self.unsol_before) {
            self.push_response(0xDEAD_0000 | k as u32, RIRB_EX_UNSOL);
        }
        for word in commands {
            self.command_log.push(word);
            if self.mute {
                continue;
            }
            let cmd = Command::decode(word);
            let response = if self.echo {
                Some(word)
            } else {
                self.codecs
                    .iter_mut()
                    .find(|c| c.address == cmd.codec_addr)
                    .map(|c| c.respond(cmd))
            };
            if let Some(response) = response {
                self.push_response(response, cmd.codec_addr as u32);
            }
        }
        for k in 0..core::mem::take(&mut self.unsol_after) {
            self.push_response(0xBEEF_0000 | k as u32, RIRB_EX_UNSOL);
        }
        for k in 0..core::mem::take(&mut self.solicited_after) {
            self.push_response(0xFEED_0000 | k as u32, 0);
        }
    }

    fn push_response(&mut self, response: u32, response_ex: u32) {
        if self.get(REG_RIRBCTL, 1) as u8 & RIRBCTL_DMAEN == 0 {
            return;
        }
        let entries = self.ring_entries(REG_RIRBSIZE);
        let base = self.base(REG_RIRBLBASE);
        let wp = (self.get(REG_RIRBWP, 2) + 1) % entries;
        let slot = (base + wp as u64 * 8) as *mut u32;
        // SAFETY: RIRB は SimAllocator の確保領域で、物理アドレス = 仮想アドレス
        unsafe {
            ptr::write_volatile(slot, response);
            ptr::write_volatile(slot.add(1), response_ex);
        }
        self.set(REG_RIRBWP, 2, wp);
        let sts = self.get(REG_RIRBSTS, 1);
        self.set(REG_RIRBSTS, 1, sts | RIRBSTS_RINTFL as u32);
    }
}

/// Software HDA controller
pub struct SimHda {
    state: RefCell<SimState>,
    delays: Cell<u64>,
    flushes: Cell<usize>,
    eois: Cell<usize>,
    masked: Cell<bool>,
    irq_off: Cell<usize>,
}

/// Builder for [`SimHda`]
pub struct SimHdaBuilder {
    ring_entries: u16,
    rirb_entries: Option<u16>,
    echo: bool,
    codecs: Vec<SimCodec>,
    streams: (u8, u8),
    sluggish_srst: bool,
    stuck_in_reset: bool,
}

impl SimHdaBuilder {
    /// Only this CORB/RIRB size is advertised
    pub fn ring_entries(mut self, entries: u16) -> Self {
        self.ring_entries = entries;
        self
    }

    /// Advertise a different size for the RIRB alone
    pub fn rirb_entries(mut self, entries: u16) -> Self {
        self.rirb_entries = Some(entries);
        self
    }

    /// Every command is answered with itself
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn codec(mut self, codec: SimCodec) -> Self {
        self.codecs.push(codec);
        self
    }

    /// (input, output) stream descriptors
    pub fn streams(mut self, input: u8, output: u8) -> Self {
        self.streams = (input, output);
        self
    }

    /// SRST writes never take effect
    pub fn sluggish_stream_reset(mut self) -> Self {
        self.sluggish_srst = true;
        self
    }

    /// CRST never clears
    pub fn stuck_in_reset(mut self) -> Self {
        self.stuck_in_reset = true;
        self
    }

    pub fn build(self) -> SimHda {
        let size_cap = |entries: u16| match entries {
            2 => RINGSIZE_CAP_2,
            16 => RINGSIZE_CAP_16,
            _ => RINGSIZE_CAP_256,
        };
        let corb_cap = size_cap(self.ring_entries);
        let rirb_cap = size_cap(self.rirb_entries.unwrap_or(self.ring_entries));
        let mut state = SimState {
            regs: vec![0; REG_SPACE],
            codecs: self.codecs,
            echo: self.echo,
            sluggish_srst: self.sluggish_srst,
            stuck_in_reset: self.stuck_in_reset,
            extra_presence: 0,
            stalled: false,
            mute: false,
            unsol_before: 0,
            unsol_after: 0,
            solicited_after: 0,
            command_log: Vec::new(),
        };
        let (iss, oss) = self.streams;
        let gcap = ((oss as u16) << GCAP_OSS_SHIFT) | ((iss as u16) << GCAP_ISS_SHIFT) | GCAP_64OK;
        state.set(REG_GCAP, 2, gcap as u32);
        state.set(REG_VMIN, 1, 0);
        state.set(REG_VMAJ, 1, 1);
        state.set(REG_GCTL, 4, GCTL_CRST);
        state.set(REG_CORBSIZE, 1, (corb_cap << RINGSIZE_SZCAP_SHIFT) as u32);
        state.set(REG_RIRBSIZE, 1, (rirb_cap << RINGSIZE_SZCAP_SHIFT) as u32);
        SimHda {
            state: RefCell::new(state),
            delays: Cell::new(0),
            flushes: Cell::new(0),
            eois: Cell::new(0),
            masked: Cell::new(true),
            irq_off: Cell::new(0),
        }
    }
}

impl SimHda {
    pub fn builder() -> SimHdaBuilder {
        SimHdaBuilder {
            ring_entries: 256,
            rirb_entries: None,
            echo: false,
            codecs: Vec::new(),
            streams: (4, 4),
            sluggish_srst: false,
            stuck_in_reset: false,
        }
    }

    pub fn corb_wp(&self) -> u16 {
        self.state.borrow().get(REG_CORBWP, 2) as u16
    }

    /// Unsolicited responses queued ahead of the next batch
    pub fn inject_unsolicited_before(&self, count: usize) {
        self.state.borrow_mut().unsol_before = count;
    }

    pub fn inject_unsolicited_after(&self, count: usize) {
        self.state.borrow_mut().unsol_after = count;
    }

    /// Stray solicited responses after the next batch
    pub fn inject_solicited_after(&self, count: usize) {
        self.state.borrow_mut().solicited_after = count;
    }

    /// CORB entries are not consumed
    pub fn set_stalled(&self, stalled: bool) {
        self.state.borrow_mut().stalled = stalled;
    }

    /// Commands are consumed but never answered
    pub fn set_mute_responses(&self, mute: bool) {
        self.state.borrow_mut().mute = mute;
    }

    /// Codec addresses reported present with nothing behind them
    pub fn set_extra_presence(&self, mask: u16) {
        self.state.borrow_mut().extra_presence = mask;
    }

    /// Advance CORBWP past CORBRP without running anything
    pub fn desync_corb(&self) {
        let mut s = self.state.borrow_mut();
        let wp = s.get(REG_CORBWP, 2);
        s.set(REG_CORBWP, 2, (wp + 1) & RING_PTR_MASK as u32);
    }

    pub fn command_log(&self) -> Vec<u32> {
        self.state.borrow().command_log.clone()
    }

    /// The exact command word was sent
    pub fn codec_received(&self, address: u8, nid: NodeId, verb: u32) -> bool {
        let word = make_command(address, nid, verb);
        self.state.borrow().command_log.contains(&word)
    }

    /// Any command with this verb id was sent
    pub fn codec_received_verb(&self, address: u8, nid: NodeId, verb_id: u32) -> bool {
        self.state.borrow().command_log.iter().any(|&w| {
            let c = Command::decode(w);
            c.codec_addr == address && c.node_id == nid && c.verb_id() == verb_id
        })
    }

    /// Current state of a simulated widget
    pub fn sim_widget(&self, address: u8, nid: NodeId) -> SimWidget {
        let mut s = self.state.borrow_mut();
        s.codecs
            .iter_mut()
            .find(|c| c.address == address)
            .and_then(|c| c.widget_mut(nid).cloned())
            .unwrap_or_else(|| panic!("no widget {}:{}", address, nid))
    }

    pub fn afg_power(&self, address: u8) -> Option<u32> {
        let s = self.state.borrow();
        s.codecs.iter().find(|c| c.address == address)?.afg_power
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.get()
    }

    pub fn eoi_count(&self) -> usize {
        self.eois.get()
    }

    pub fn irq_masked(&self) -> bool {
        self.masked.get()
    }

    pub fn without_interrupts_count(&self) -> usize {
        self.irq_off.get()
    }

    /// Total simulated busy-wait time
    pub fn delayed_us(&self) -> u64 {
        self.delays.get()
    }

    /// Latch status bits in SDnSTS as the DMA engine would
    pub fn raise_stream_status(&self, index: u8, bits: u8) {
        let mut s = self.state.borrow_mut();
        let reg = stream_desc_offset(index) + REG_SD_STS;
        let old = s.get(reg, 1);
        s.set(reg, 1, old | bits as u32);
    }

    /// CORB memory error, reported through INTSTS.CIS
    pub fn raise_controller_error(&self) {
        let mut s = self.state.borrow_mut();
        let old = s.get(REG_CORBSTS, 1);
        s.set(REG_CORBSTS, 1, old | CORBSTS_CMEI as u32);
    }
}

impl HardwareTransport for SimHda {
    fn read8(&self, offset: u32) -> u8 {
        self.state.borrow().read(offset, 1) as u8
    }
    fn read16(&self, offset: u32) -> u16 {
        self.state.borrow().read(offset, 2) as u16
    }
    fn read32(&self, offset: u32) -> u32 {
        self.state.borrow().read(offset, 4)
    }
    fn write8(&self, offset: u32, value: u8) {
        self.state.borrow_mut().write(offset, 1, value as u32)
    }
    fn write16(&self, offset: u32, value: u16) {
        self.state.borrow_mut().write(offset, 2, value as u32)
    }
    fn write32(&self, offset: u32, value: u32) {
        self.state.borrow_mut().write(offset, 4, value)
    }
    fn delay_us(&self, us: u64) {
        self.delays.set(self.delays.get() + us);
    }
    fn flush_cache(&self) {
        self.flushes.set(self.flushes.get() + 1);
    }
    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
        self.irq_off.set(self.irq_off.get() + 1);
        f()
    }
    fn mask_irq(&self) {
        self.masked.set(true);
    }
    fn unmask_irq(&self) {
        self.masked.set(false);
    }
    fn end_of_interrupt(&self) {
        self.eois.set(self.eois.get() + 1);
    }
}

// ============================================================================
// DMA memory
// ============================================================================

const DMA_ALIGN: usize = 4096;

/// Heap-backed DMA allocator that tracks every live region
#[derive(Default)]
pub struct SimAllocator {
    live: RefCell<Vec<(usize, Layout)>>,
    allowance: Cell<Option<usize>>,
}

impl SimAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Regions allocated and not yet freed
    pub fn outstanding(&self) -> usize {
        self.live.borrow().len()
    }

    /// Let `n` more allocations succeed, then fail
    pub fn fail_after(&self, n: usize) {
        self.allowance.set(Some(n));
    }
}

impl DmaAllocator for SimAllocator {
    fn alloc(&self, size: usize) -> HdaResult<DmaRegion> {
        match self.allowance.get() {
            Some(0) => return Err(HdaError::ResourceExhausted),
            Some(n) => self.allowance.set(Some(n - 1)),
            None => {}
        }
        let layout = Layout::from_size_align(size.max(1), DMA_ALIGN)
            .map_err(|_| HdaError::ResourceExhausted)?;
        // SAFETY: layout のサイズは 1 以上
        let raw = unsafe { alloc_zeroed(layout) };
        let virt = NonNull::new(raw).ok_or(HdaError::ResourceExhausted)?;
        self.live.borrow_mut().push((raw as usize, layout));
        // SAFETY: 確保直後で size バイト有効。物理アドレスは恒等写像。
        Ok(unsafe { DmaRegion::from_raw_parts(virt, PhysAddr::new(raw as u64), size) })
    }

    fn free(&self, region: DmaRegion) {
        let addr = region.virt().as_ptr() as usize;
        let mut live = self.live.borrow_mut();
        let pos = live
            .iter()
            .position(|&(a, _)| a == addr)
            .unwrap_or_else(|| panic!("freeing unknown DMA region {:#x}", addr));
        let (_, layout) = live.swap_remove(pos);
        // SAFETY: alloc() が同じ layout で確保した領域
        unsafe { dealloc(addr as *mut u8, layout) }
    }
}

impl Drop for SimAllocator {
    fn drop(&mut self) {
        for (addr, layout) in self.live.get_mut().drain(..) {
            // SAFETY: alloc() が同じ layout で確保し、まだ解放していない領域
            unsafe { dealloc(addr as *mut u8, layout) }
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Counts deferred-completion requests
#[derive(Debug, Default)]
pub struct CountingScheduler {
    calls: AtomicUsize,
}

impl CountingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl CompletionScheduler for CountingScheduler {
    fn schedule(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Generated inputs
// ============================================================================

/// Small deterministic generator so the properties run without extra crates
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}
