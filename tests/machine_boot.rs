//! Exercises the [`Machine`] facade end to end: gate array port decode,
//! memory reconfiguration, and the CPU run loop's halt-forever exit.
use cpcemu::cpcemu_core::cpu::ExitReason;
use cpcemu::cpcemu_core::z80emu::{Cpu, Io};
use cpcemu::Machine;

/// Disables both ROM overlays (gate array command `10`, ROM_config bits 2
/// and 3 set) so a hand-written program in base RAM is both readable and
/// writable through slot 0.
fn disable_roms(m: &mut Machine) {
    m.write_io(0x7F00, 0b1000_1100, 0);
}

#[test]
fn nop_then_halt_runs_to_halt_forever() {
    let mut m = Machine::new();
    disable_roms(&mut m);
    m.memory.write8(0x0000, 0x00); // NOP
    m.memory.write8(0x0001, 0x76); // HALT
    m.reset(true);

    let reason = m.execute_until_frame_complete();
    assert_eq!(reason, ExitReason::Halt);
    assert_eq!(m.cpu.get_pc(), 0x0001);
}

#[test]
fn breakpoint_stops_the_run_loop_before_execution() {
    use cpcemu::cpcemu_core::cpu::BreakpointKind;

    let mut m = Machine::new();
    disable_roms(&mut m);
    m.memory.write8(0x0000, 0x00); // NOP
    m.memory.write8(0x0001, 0x00); // NOP
    m.memory.write8(0x0002, 0x76); // HALT
    m.reset(true);

    m.debugger.borrow_mut().set_breakpoint(0x0002, BreakpointKind::Persistent, None);
    let reason = m.execute_until_frame_complete();
    assert_eq!(reason, ExitReason::Breakpoint(0x0002));
    assert_eq!(m.cpu.get_pc(), 0x0002);
}

#[test]
fn gate_array_ram_config_switches_visible_ram_bank() {
    let mut m = Machine::new();
    disable_roms(&mut m);

    // Write a marker into bank 0 (config 0, slot 0) then switch to config 2,
    // which maps bank 4 into slot 0 instead.
    m.memory.write8(0x0000, 0xAA);
    m.write_io(0x7F00, 0b1100_0010, 0); // RAM config 2: banks [4,5,6,7]
    assert_ne!(m.memory.read8(0x0000), 0xAA);

    m.write_io(0x7F00, 0b1100_0000, 0); // back to config 0: banks [0,1,2,3]
    assert_eq!(m.memory.read8(0x0000), 0xAA);
}
