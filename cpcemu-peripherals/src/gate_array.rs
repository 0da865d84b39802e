//! The CPC's custom gate array: pen/ink/mode selection, RAM-config latching,
//! and the 52-HSYNC interrupt counter. See §4.4.
use cpcemu_core::memory::MemoryMapInputs;

pub const BORDER_PEN: u8 = 16;
/// Synthetic entry used for mode-2 antialiasing: the arithmetic mean of inks 0 and 1.
pub const BLEND_PEN: usize = 33;

/// 32-entry hardware RGB table (fixed intensities, scaled by a 5-15 factor per ink).
/// Values are `(r, g, b)` at full (15) intensity; see [`GateArray::color_rgb`].
pub const HARDWARE_RGB: [(u8, u8, u8); 32] = [
    (0x80, 0x80, 0x80), (0x80, 0x80, 0x80), (0x00, 0xFF, 0x80), (0xFF, 0xFF, 0x80),
    (0x00, 0x00, 0x80), (0xFF, 0x00, 0x80), (0x00, 0x80, 0x80), (0xFF, 0x80, 0x80),
    (0xFF, 0x00, 0x80), (0xFF, 0xFF, 0x80), (0xFF, 0xFF, 0x00), (0xFF, 0xFF, 0xFF),
    (0xFF, 0x00, 0x00), (0xFF, 0x00, 0xFF), (0xFF, 0x80, 0x00), (0xFF, 0x80, 0xFF),
    (0x00, 0x00, 0x80), (0x00, 0xFF, 0x80), (0x00, 0xFF, 0x00), (0x00, 0xFF, 0xFF),
    (0x00, 0x00, 0x00), (0x00, 0x00, 0xFF), (0x00, 0x80, 0x00), (0x00, 0x80, 0xFF),
    (0x80, 0x00, 0x80), (0x80, 0xFF, 0x80), (0x80, 0xFF, 0x00), (0x80, 0xFF, 0xFF),
    (0x80, 0x00, 0x00), (0x80, 0x00, 0xFF), (0x80, 0x80, 0x00), (0x80, 0x80, 0xFF),
];

/// Precomputed green-monitor luma table (relative brightness, 0..255), indexed
/// the same way as [`HARDWARE_RGB`].
pub const GREEN_LUMA: [u8; 32] = {
    let mut table = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        let (r, g, b) = HARDWARE_RGB[i];
        // standard NTSC luma weights, integer approximation.
        table[i] = ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8;
        i += 1;
    }
    table
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenMode { Mode0, Mode1, Mode2, Mode3 }

impl ScreenMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => ScreenMode::Mode0,
            1 => ScreenMode::Mode1,
            2 => ScreenMode::Mode2,
            _ => ScreenMode::Mode3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderMode {
    pub green_monitor: bool,
    /// Blue tint percentage applied to the green-monitor luma (0..=100).
    pub blue_tint_pct: u8,
}

/// The gate array's entire register-visible state, plus the interrupt counter
/// and palette.
#[derive(Debug, Clone)]
pub struct GateArray {
    pub pen: u8,
    pub inks: [u8; 17],
    pub current_mode: ScreenMode,
    pub requested_mode: ScreenMode,
    pub rom_config: u8,
    pub ram_config: u8,
    pub ram_ext: u8,
    pub interrupt_counter: u8,
    pub hsync_count: u32,
    pub lower_rom_bank: u8,
    pub upper_rom_index: u8,
    pub register_page: bool,
    pub asic_unlocked: bool,
    pub rmr2_lower_rom_slot: u8,
    pub rmr2_cartridge_page: u8,
    pub render: RenderMode,
    pub irq_pending: bool,
}

impl Default for GateArray {
    fn default() -> Self {
        GateArray {
            pen: 0,
            inks: [0; 17],
            current_mode: ScreenMode::Mode1,
            requested_mode: ScreenMode::Mode1,
            rom_config: 0,
            ram_config: 0,
            ram_ext: 0,
            interrupt_counter: 0,
            hsync_count: 0,
            lower_rom_bank: 0,
            upper_rom_index: 0,
            register_page: false,
            asic_unlocked: false,
            rmr2_lower_rom_slot: 0,
            rmr2_cartridge_page: 0,
            render: RenderMode::default(),
            irq_pending: false,
        }
    }
}

impl GateArray {
    pub fn new() -> Self { Self::default() }

    /// Handles an `OUT` to the gate array's port (§4.4). Returns `true` if the
    /// memory map needs to be reconfigured as a result.
    pub fn write(&mut self, value: u8) -> bool {
        match value >> 6 {
            0b00 => {
                if value & 0x10 != 0 {
                    self.pen = BORDER_PEN;
                } else {
                    self.pen = value & 0x0F;
                }
                false
            }
            0b01 => {
                let ink = value & 0x1F;
                self.inks[self.pen as usize] = ink;
                false
            }
            0b10 => {
                self.requested_mode = ScreenMode::from_bits(value);
                self.current_mode = self.requested_mode;
                self.rom_config = (self.rom_config & !0b1100) | (value & 0b1100);
                if value & 0x10 != 0 {
                    self.irq_pending = false;
                    self.interrupt_counter = 0;
                }
                true
            }
            _ => {
                // Top bits 11: RMR2 once the ASIC is unlocked (6128+ only), otherwise
                // this is the classic RAM_config latch (same command space, split by
                // asic_unlocked).
                if self.asic_unlocked {
                    self.rmr2_lower_rom_slot = (value >> 3) & 0x3;
                    self.rmr2_cartridge_page = value & 0x7;
                } else {
                    self.write_ram_config(value);
                }
                true
            }
        }
    }

    /// Latches a new `RAM_config` byte (written when the high port byte has bit
    /// 15 clear and the value's top two bits are `11`).
    pub fn write_ram_config(&mut self, value: u8) {
        self.ram_config = value & 0x3F;
    }

    /// Called once per HSYNC by the CRTC tick handler.
    pub fn on_hsync(&mut self) {
        self.hsync_count += 1;
        self.interrupt_counter += 1;
        if self.interrupt_counter >= 52 {
            self.interrupt_counter = 0;
            self.irq_pending = true;
        }
    }

    /// Called when the CRTC signals VSYNC start: resets the counter without
    /// raising an interrupt if it's already past half-way, which is how
    /// overscan demos play timing tricks (§4.4).
    pub fn on_vsync(&mut self) {
        if self.interrupt_counter >= 32 {
            self.interrupt_counter = 0;
        }
    }

    pub fn take_irq(&mut self) -> bool {
        let pending = self.irq_pending;
        self.irq_pending = false;
        pending
    }

    pub fn memory_inputs(&self) -> MemoryMapInputs {
        MemoryMapInputs {
            ram_config: self.ram_config,
            ram_ext: self.ram_ext,
            lower_rom_disabled: self.rom_config & 0b100 != 0,
            upper_rom_disabled: self.rom_config & 0b1000 != 0,
            register_page: self.register_page,
            lower_rom_slot: self.rmr2_lower_rom_slot,
        }
    }

    /// The current ink color for `pen`, as 24-bit RGB, honouring the selected
    /// render mode.
    pub fn color_rgb(&self, pen: usize) -> (u8, u8, u8) {
        let ink = if pen == BLEND_PEN {
            return self.blend_rgb();
        } else if pen == BORDER_PEN as usize {
            self.inks[BORDER_PEN as usize]
        } else {
            self.inks[pen]
        };
        let idx = (ink & 0x1F) as usize;
        if self.render.green_monitor {
            let luma = GREEN_LUMA[idx];
            let tint = (luma as u32 * self.render.blue_tint_pct as u32 / 100) as u8;
            (luma.saturating_sub(tint), luma, luma.saturating_add(tint).min(255))
        } else {
            HARDWARE_RGB[idx]
        }
    }

    fn blend_rgb(&self) -> (u8, u8, u8) {
        let (r0, g0, b0) = self.color_rgb(0);
        let (r1, g1, b1) = self.color_rgb(1);
        (((r0 as u16 + r1 as u16) / 2) as u8,
         ((g0 as u16 + g1 as u16) / 2) as u8,
         ((b0 as u16 + b1 as u16) / 2) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pen_select_and_border() {
        let mut ga = GateArray::new();
        ga.write(0b0001_0101); // command 00, bit4 set -> border
        assert_eq!(ga.pen, BORDER_PEN);
        ga.write(0b0000_0101); // pen = 5
        assert_eq!(ga.pen, 5);
    }

    #[test]
    fn interrupt_counter_wraps_at_52_and_latches_irq() {
        let mut ga = GateArray::new();
        for _ in 0..51 {
            ga.on_hsync();
            assert!(!ga.take_irq());
        }
        ga.on_hsync();
        assert!(ga.take_irq());
        assert_eq!(ga.interrupt_counter, 0);
    }

    #[test]
    fn vsync_overscan_trick_resets_without_irq() {
        let mut ga = GateArray::new();
        for _ in 0..40 {
            ga.on_hsync();
        }
        assert!(ga.interrupt_counter < 52);
        ga.on_vsync();
        assert_eq!(ga.interrupt_counter, 0);
        assert!(!ga.irq_pending);
    }

    #[test]
    fn mode_and_rom_config_decode() {
        let mut ga = GateArray::new();
        let needs_reconf = ga.write(0b10_0_1_01_10); // cmd 10, upper rom disabled, mode 2
        assert!(needs_reconf);
        assert_eq!(ga.current_mode, ScreenMode::Mode2);
        assert!(ga.memory_inputs().upper_rom_disabled);
    }
}
