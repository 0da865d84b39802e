//! The Intel 8255 Programmable Peripheral Interface, wired on the CPC to the
//! keyboard matrix, the PSG and the tape/printer lines. See §4.5.
use crate::keyboard::KeyboardMatrix;
use crate::psg::{Psg, PsgBusMode};

#[derive(Debug, Clone, Copy, Default)]
struct PortCState {
    value: u8,
}

/// The PPI's three data ports plus the control register and the derived state
/// (keyboard line selector, tape motor, PSG bus-direction control).
#[derive(Debug, Clone)]
pub struct Ppi {
    port_a: u8,
    port_b_in: u8,
    port_c: PortCState,
    control: u8,
    pub tape_motor: bool,
    pub cassette_write_level: bool,
}

impl Default for Ppi {
    fn default() -> Self {
        Ppi {
            port_a: 0,
            port_b_in: 0,
            port_c: PortCState::default(),
            control: 0,
            tape_motor: false,
            cassette_write_level: false,
        }
    }
}

/// Inputs the host composes before a port-B read: tape level, printer busy and
/// the CRTC's VSYNC flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortBInputs {
    pub tape_level: bool,
    pub printer_busy: bool,
    pub jumpers: u8,
    pub crtc_vsync: bool,
}

impl PortBInputs {
    fn as_byte(self) -> u8 {
        (u8::from(self.tape_level) << 7)
            | (u8::from(self.printer_busy) << 6)
            | ((self.jumpers & 0x1F) << 1)
            | u8::from(self.crtc_vsync)
    }
}

fn psg_mode(port_c: u8) -> PsgBusMode {
    match (port_c >> 6) & 0b11 {
        0b00 => PsgBusMode::Inactive,
        0b10 => PsgBusMode::Write,
        0b01 => PsgBusMode::Read,
        _ => PsgBusMode::Latch,
    }
}

impl Ppi {
    pub fn new() -> Self { Self::default() }

    pub fn keyboard_line(&self) -> u8 { self.port_c.value & 0x0F }

    /// Reads port A: forwards to the PSG when in data-read mode, else returns
    /// the last latched value (floating bus-ish behaviour on real hardware).
    pub fn read_port_a(&mut self, psg: &mut Psg) -> u8 {
        match psg_mode(self.port_c.value) {
            PsgBusMode::Read => psg.read_selected_register(),
            _ => self.port_a,
        }
    }

    pub fn write_port_a(&mut self, value: u8, psg: &mut Psg) {
        self.port_a = value;
        match psg_mode(self.port_c.value) {
            PsgBusMode::Write => psg.write_selected_register(value),
            PsgBusMode::Latch => psg.select_register(value),
            _ => {}
        }
    }

    pub fn read_port_b(&self, inputs: PortBInputs) -> u8 {
        inputs.as_byte()
    }

    pub fn read_port_c(&self) -> u8 { self.port_c.value }

    /// Writes port C directly (used only when the control register configures
    /// it as output in its entirety - rare on the CPC, which almost always
    /// uses the bit-set/clear control path).
    pub fn write_port_c(&mut self, value: u8, keyboard: &mut KeyboardMatrix, psg: &mut Psg,
                         mut on_keyboard_line: impl FnMut(u8), mut on_tape_motor: impl FnMut(bool)) {
        let prev = self.port_c.value;
        self.port_c.value = value;
        self.apply_port_c_side_effects(prev, value, keyboard, psg, &mut on_keyboard_line, &mut on_tape_motor);
    }

    /// Writes the 8255 control register. Bit 7 set resets all ports; otherwise
    /// the low nibble bit-sets/clears one bit of port C (§4.5).
    pub fn write_control(&mut self, value: u8, keyboard: &mut KeyboardMatrix, psg: &mut Psg,
                          mut on_keyboard_line: impl FnMut(u8), mut on_tape_motor: impl FnMut(bool)) {
        self.control = value;
        if value & 0x80 != 0 {
            self.port_a = 0;
            self.port_c.value = 0;
            return;
        }
        let bit = (value >> 1) & 0x7;
        let set = value & 1 != 0;
        let prev = self.port_c.value;
        let mask = 1u8 << bit;
        let next = if set { prev | mask } else { prev & !mask };
        self.port_c.value = next;
        self.apply_port_c_side_effects(prev, next, keyboard, psg, &mut on_keyboard_line, &mut on_tape_motor);
    }

    fn apply_port_c_side_effects(&mut self, prev: u8, next: u8, _keyboard: &mut KeyboardMatrix, psg: &mut Psg,
                                  on_keyboard_line: &mut dyn FnMut(u8), on_tape_motor: &mut dyn FnMut(bool)) {
        if prev & 0x0F != next & 0x0F {
            on_keyboard_line(next & 0x0F);
        }
        if prev & 0xF0 != next & 0xF0 {
            self.tape_motor = next & 0x10 != 0;
            self.cassette_write_level = next & 0x20 != 0;
            on_tape_motor(self.tape_motor);
            match psg_mode(next) {
                PsgBusMode::Write => psg.write_selected_register(self.port_a),
                PsgBusMode::Latch => psg.select_register(self.port_a),
                _ => {}
            }
        }
    }

    pub fn reset(&mut self) {
        self.port_a = 0;
        self.port_c.value = 0;
        self.control = 0;
        self.tape_motor = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_register_bitset_fires_keyboard_hook() {
        let mut ppi = Ppi::new();
        let mut psg = Psg::new();
        let mut keyboard = KeyboardMatrix::new();
        let mut seen_line = None;
        ppi.write_control(0b0000_0011, &mut keyboard, &mut psg, |l| seen_line = Some(l), |_| {});
        assert_eq!(seen_line, Some(0b0001));
        assert_eq!(ppi.keyboard_line(), 0b0001);
    }

    #[test]
    fn control_register_reset_clears_ports() {
        let mut ppi = Ppi::new();
        let mut psg = Psg::new();
        let mut keyboard = KeyboardMatrix::new();
        ppi.write_control(0b0000_0011, &mut keyboard, &mut psg, |_| {}, |_| {});
        ppi.write_control(0x80, &mut keyboard, &mut psg, |_| {}, |_| {});
        assert_eq!(ppi.read_port_c(), 0);
    }
}
