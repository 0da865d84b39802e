//! The CPC's 16x8 keyboard matrix. A bit is `0` when the corresponding key is
//! pressed (active-low); row 9 is the joystick port. See §4.5.
use bitvec::prelude::*;

pub const ROW_COUNT: usize = 16;
pub const JOYSTICK_ROW: u8 = 9;

#[derive(Debug, Clone)]
pub struct KeyboardMatrix {
    /// `rows[r]` bit `c` set == key released (idle-high, active-low matrix).
    rows: [u8; ROW_COUNT],
}

impl Default for KeyboardMatrix {
    fn default() -> Self { KeyboardMatrix { rows: [0xFF; ROW_COUNT] } }
}

impl KeyboardMatrix {
    pub fn new() -> Self { Self::default() }

    pub fn press(&mut self, row: u8, col: u8) {
        let mut bits = self.rows[row as usize].view_bits_mut::<Lsb0>().to_bitvec();
        bits.set(col as usize, false);
        self.rows[row as usize] = bits.load();
    }

    pub fn release(&mut self, row: u8, col: u8) {
        let mut bits = self.rows[row as usize].view_bits_mut::<Lsb0>().to_bitvec();
        bits.set(col as usize, true);
        self.rows[row as usize] = bits.load();
    }

    pub fn is_pressed(&self, row: u8, col: u8) -> bool {
        self.rows[row as usize] & (1 << col) == 0
    }

    pub fn clear_all(&mut self) {
        self.rows = [0xFF; ROW_COUNT];
    }

    /// Raw row value as the PPI would read it before any peripheral hook masks
    /// are applied.
    pub fn read_row(&self, row: u8) -> u8 {
        if (row as usize) < ROW_COUNT { self.rows[row as usize] } else { 0xFF }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_clears_bit_release_sets_it() {
        let mut kb = KeyboardMatrix::new();
        assert!(!kb.is_pressed(0, 3));
        kb.press(0, 3);
        assert!(kb.is_pressed(0, 3));
        assert_eq!(kb.read_row(0), 0b1111_0111);
        kb.release(0, 3);
        assert!(!kb.is_pressed(0, 3));
        assert_eq!(kb.read_row(0), 0xFF);
    }
}
