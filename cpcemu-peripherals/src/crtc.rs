//! A Motorola 6845-family CRT controller, as wired into the Amstrad CPC.
//!
//! Eighteen byte-wide registers plus the derived scan-state counters that tick
//! once per character (one CRTC clock, ~1 µs at the CPC's 1 MHz dot-crawl rate).
use core::fmt;

/// Which real 6845-family part is being emulated; register readability and a few
/// sync-width quirks differ between them. See §4.3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrtcType {
    /// HD6845S
    Type0,
    /// UM6845R
    Type1,
    /// MC6845
    Type2,
    /// AMS40489 (the ASIC CRTC built into the 6128+)
    Type3,
}

impl Default for CrtcType {
    fn default() -> Self { CrtcType::Type0 }
}

/// Events the scan state machine can signal to the gate array / scheduler within
/// a single tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrtcEvents {
    pub hsync_start: bool,
    pub vsync_start: bool,
    pub new_line: bool,
    pub new_row: bool,
    pub display_end: bool,
}

/// The CRTC's 18 registers plus every derived counter and latch named in §3/§4.3.
#[derive(Debug, Clone)]
pub struct Crtc {
    pub crtc_type: CrtcType,
    pub regs: [u8; 18],
    selected: u8,

    pub char_count: u8,
    pub line_count: u8,
    pub raster_count: u8,
    pub vta_count: u8,

    pub flag_invsync: bool,
    pub flag_invta: bool,
    pub flag_resscan: bool,
    pub flag_reschar: bool,
    pub flag_startvta: bool,
    pub r7match: bool,
    pub r9match: bool,

    hsync_width_count: u8,
    vsync_width_count: u8,
    in_hsync: bool,
}

impl Default for Crtc {
    fn default() -> Self {
        Crtc {
            crtc_type: CrtcType::default(),
            regs: [0; 18],
            selected: 0,
            char_count: 0,
            line_count: 0,
            raster_count: 0,
            vta_count: 0,
            flag_invsync: false,
            flag_invta: false,
            flag_resscan: false,
            flag_reschar: false,
            flag_startvta: false,
            r7match: false,
            r9match: false,
            hsync_width_count: 0,
            vsync_width_count: 0,
            in_hsync: false,
        }
    }
}

/// Whether a register is readable for a given CRTC type. Unreadable registers
/// return 0 (§4.3 table).
fn readable(crtc_type: CrtcType, reg: u8) -> bool {
    match crtc_type {
        CrtcType::Type0 | CrtcType::Type3 => (12..=17).contains(&reg),
        CrtcType::Type1 => (14..=17).contains(&reg),
        CrtcType::Type2 => (14..=17).contains(&reg),
    }
}

impl Crtc {
    pub fn new(crtc_type: CrtcType) -> Self {
        Crtc { crtc_type, ..Default::default() }
    }

    pub fn select_register(&mut self, index: u8) {
        self.selected = index & 0x1F;
    }

    pub fn write_data(&mut self, value: u8) {
        if (self.selected as usize) < self.regs.len() {
            self.regs[self.selected as usize] = value;
        }
    }

    /// Reads the currently selected register, honouring the per-type readability
    /// table. Type 1 reads 0xFF for register 31 (handled by the caller's port
    /// decode, not here, since that's a different register index entirely).
    pub fn read_data(&self) -> u8 {
        let idx = self.selected;
        if (idx as usize) < self.regs.len() && readable(self.crtc_type, idx) {
            self.regs[idx as usize]
        } else {
            0
        }
    }

    /// Status register read available on port &BExx for type 1 (UM6845R) only.
    pub fn read_status(&self) -> Option<u8> {
        match self.crtc_type {
            CrtcType::Type1 => {
                let mut v = 0u8;
                if self.flag_invsync { v |= 1 << 5; }
                // lightpen strobe bit 6 is always clear - no lightpen is modeled.
                Some(v)
            }
            _ => None,
        }
    }

    fn hsync_width(&self) -> u8 {
        let low = self.regs[3] & 0x0F;
        match (self.crtc_type, low) {
            (CrtcType::Type2, 0) | (CrtcType::Type3, 0) => 16,
            (CrtcType::Type0, 0) => 0, // "no HSYNC"
            _ => low,
        }
    }

    fn vsync_width(&self) -> u8 {
        match self.crtc_type {
            CrtcType::Type1 | CrtcType::Type2 => 16,
            CrtcType::Type0 | CrtcType::Type3 => {
                let high = (self.regs[3] >> 4) & 0x0F;
                if high == 0 { 16 } else { high }
            }
        }
    }

    /// Advances the scan state machine by one character (one CRTC clock tick).
    pub fn tick(&mut self) -> CrtcEvents {
        let mut ev = CrtcEvents::default();

        self.char_count = self.char_count.wrapping_add(1);
        let r0 = self.regs[0];
        if self.char_count > r0 {
            self.char_count = 0;
            self.flag_reschar = true;
            ev.new_line = true;
            self.on_line_rollover(&mut ev);
        } else {
            self.flag_reschar = false;
        }

        // HSYNC generation: begins at R2, lasts hsync_width() characters.
        let r2 = self.regs[2];
        if self.char_count == r2 && self.hsync_width() > 0 {
            self.in_hsync = true;
            self.hsync_width_count = 0;
            ev.hsync_start = true;
        }
        if self.in_hsync {
            self.hsync_width_count += 1;
            if self.hsync_width_count >= self.hsync_width() {
                self.in_hsync = false;
            }
        }

        ev
    }

    fn on_line_rollover(&mut self, ev: &mut CrtcEvents) {
        let r9 = self.regs[9];
        self.raster_count = self.raster_count.wrapping_add(1);
        if self.raster_count > r9 {
            self.raster_count = 0;
            self.flag_resscan = true;
            self.line_count = self.line_count.wrapping_add(1);
            ev.new_row = true;
        } else {
            self.flag_resscan = false;
        }

        let r4 = self.regs[4];
        let r5 = self.regs[5];
        if self.line_count == r4 && self.raster_count == r9 {
            if r5 > 0 {
                self.flag_startvta = true;
                self.vta_count = 0;
            } else {
                self.line_count = 0;
            }
        }
        if self.flag_startvta {
            self.vta_count += 1;
            if self.vta_count >= r5 {
                self.flag_startvta = false;
                self.line_count = 0;
                self.raster_count = 0;
            }
        }

        let r7 = self.regs[7];
        let matched = self.line_count == r7;
        if matched && !self.r7match {
            ev.vsync_start = true;
            self.flag_invsync = true;
            self.vsync_width_count = 0;
        }
        self.r7match = matched;
        if self.flag_invsync {
            self.vsync_width_count += 1;
            if self.vsync_width_count >= self.vsync_width() {
                self.flag_invsync = false;
            }
        }

        let r6 = self.regs[6];
        if self.line_count == r6 {
            ev.display_end = true;
        }
    }
}

impl fmt::Display for Crtc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CRTC({:?})", self.crtc_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_count_wraps_modulo_r0_plus_one() {
        let mut crtc = Crtc::new(CrtcType::Type0);
        crtc.select_register(0);
        crtc.write_data(3); // R0 = 3 -> 4 characters per line
        for _ in 0..4 {
            crtc.tick();
        }
        assert_eq!(crtc.char_count, 0);
    }

    #[test]
    fn raster_count_wraps_modulo_r9_plus_one() {
        let mut crtc = Crtc::new(CrtcType::Type0);
        crtc.select_register(0); crtc.write_data(0); // one char per line
        crtc.select_register(9); crtc.write_data(1); // R9 = 1 -> 2 raster lines per row
        crtc.tick(); // line rollover 1
        crtc.tick(); // line rollover 2 -> raster wraps
        assert_eq!(crtc.raster_count, 0);
    }

    #[test]
    fn unreadable_register_returns_zero() {
        let mut crtc = Crtc::new(CrtcType::Type1);
        crtc.select_register(12);
        crtc.write_data(0x55);
        assert_eq!(crtc.read_data(), 0); // R12 write-only on type 1
        crtc.select_register(14);
        crtc.write_data(0x3C);
        assert_eq!(crtc.read_data(), 0x3C);
    }
}
