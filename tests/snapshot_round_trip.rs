//! Saves a running [`Machine`]'s state to an in-memory `.SNA` image and
//! restores it into a fresh machine, checking CPU and device state survive.
use cpcemu::cpcemu_core::z80emu::{Cpu, StkReg16};
use cpcemu::cpcemu_core::z80emu::Io as _;
use cpcemu::cpcemu_formats::sna::{self, SnapshotState};
use cpcemu::Machine;

#[test]
fn save_then_restore_preserves_registers_pen_and_ram() {
    let mut m = Machine::new();
    m.write_io(0x7F00, 0b1000_1100, 0); // both ROMs off, so RAM reads back what we wrote
    m.memory.write8(0x4000, 0x99);
    m.cpu.set_acc(0x42);
    m.cpu.set_reg16(StkReg16::HL, 0xBEEF);
    m.gate_array.pen = 3;

    let mut ram = vec![0u8; sna::BASE_RAM_LEN];
    for (bank, chunk) in m.memory.base_ram.iter().enumerate().take(4) {
        ram[bank * 0x4000..(bank + 1) * 0x4000].copy_from_slice(chunk);
    }

    let mut buf = Vec::new();
    {
        let state = SnapshotState {
            cpu: &mut m.cpu,
            gate_array: &mut m.gate_array,
            crtc: &mut m.crtc,
            ppi: &mut m.ppi,
            psg: &mut m.psg,
        };
        sna::write_sna(&mut buf, &state, &ram).unwrap();
    }

    let mut restored = Machine::new();
    let loaded_ram = {
        let mut state = SnapshotState {
            cpu: &mut restored.cpu,
            gate_array: &mut restored.gate_array,
            crtc: &mut restored.crtc,
            ppi: &mut restored.ppi,
            psg: &mut restored.psg,
        };
        sna::read_sna(&buf[..], &mut state).unwrap()
    };
    for (bank, chunk) in restored.memory.base_ram.iter_mut().enumerate().take(4) {
        chunk.copy_from_slice(&loaded_ram[bank * 0x4000..(bank + 1) * 0x4000]);
    }

    assert_eq!(restored.cpu.get_acc(), 0x42);
    assert_eq!(restored.cpu.get_reg16(StkReg16::HL), 0xBEEF);
    assert_eq!(restored.gate_array.pen, 3);
    assert_eq!(restored.memory.base_ram[1][0x0000], 0x99); // 0x4000 -> bank 1, offset 0
}
