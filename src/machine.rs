//! The machine facade: wires the memory map, clock, CPU core, CRTC, gate
//! array, PPI, PSG, FDC and I/O dispatch into one cooperatively-scheduled
//! run loop. See §2 (system overview) and §5 (concurrency model).
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::debug;

use cpcemu_core::clock::CpcClock;
use cpcemu_core::cpu::condition::RegisterSnapshot;
use cpcemu_core::cpu::{CpuCore, Debugger, ExitReason};
use cpcemu_core::io::{CoreHooks, IoDispatch, KeyboardReadHook, PortDevice};
use cpcemu_core::memory::{BankRef, MemoryMap};
use cpcemu_core::z80emu::{Cpu, CpuDebug, Io as Z80Io, Memory as Z80Memory, Prefix, StkReg16};
use cpcemu_peripherals::autotype::{AutoTypeQueue, KeyNameTable};
use cpcemu_peripherals::crtc::Crtc;
use cpcemu_peripherals::fdc::{Fdc, SectorStore};
use cpcemu_peripherals::gate_array::GateArray;
use cpcemu_peripherals::keyboard::KeyboardMatrix;
use cpcemu_peripherals::ppi::{Ppi, PortBInputs};
use cpcemu_peripherals::psg::Psg;
use cpcemu_peripherals::stub_devices::{AmDrum, AmxMouse, M4Board, Phazer, SmartWatch, Symbiface};

/// Shares one device between `Machine`'s own field (for direct host control -
/// `Symbiface::update_mouse`, `M4Board::set_next_response`, ...) and the boxed
/// trait object registered with [`IoDispatch`]/[`CoreHooks`], which otherwise
/// only sees it through `&mut dyn PortDevice`/`&mut dyn KeyboardReadHook`.
struct SharedDevice<T> {
    inner: Rc<RefCell<T>>,
    name: &'static str,
}

impl<T> SharedDevice<T> {
    fn new(inner: Rc<RefCell<T>>, name: &'static str) -> Self {
        SharedDevice { inner, name }
    }
}

impl<T: PortDevice> PortDevice for SharedDevice<T> {
    fn read(&mut self, port: u16) -> Option<u8> { self.inner.borrow_mut().read(port) }
    fn write(&mut self, port: u16, value: u8) { self.inner.borrow_mut().write(port, value) }
    fn enabled(&self) -> bool { self.inner.borrow().enabled() }
    fn name(&self) -> &str { self.name }
}

impl<T: KeyboardReadHook> KeyboardReadHook for SharedDevice<T> {
    fn mask_for_row(&mut self, row: u8) -> u8 { self.inner.borrow_mut().mask_for_row(row) }
    fn enabled(&self) -> bool { self.inner.borrow().enabled() }
}

/// A zero-drive fallback so a freshly-built [`Machine`] never holds a null
/// pointer where a disc image should be. Swap in a real image with
/// [`Machine::insert_disc`].
#[derive(Default)]
struct NoDisc;

impl SectorStore for NoDisc {
    fn track(&self, _drive: u8, _cylinder: u8, _head: u8) -> Option<&cpcemu_peripherals::fdc::Track> { None }
    fn track_mut(&mut self, _drive: u8, _cylinder: u8, _head: u8) -> Option<&mut cpcemu_peripherals::fdc::Track> { None }
    fn cylinder_count(&self, _drive: u8) -> u8 { 0 }
    fn drive_present(&self, _drive: u8) -> bool { false }
    fn write_protected(&self, _drive: u8) -> bool { true }
}

/// The whole Amstrad CPC core: CPU, memory map and every device the I/O
/// dispatch or the run loop needs direct access to.
pub struct Machine {
    pub cpu: CpuCore,
    pub clock: CpcClock,
    pub memory: MemoryMap,
    pub gate_array: GateArray,
    pub crtc: Crtc,
    pub ppi: Ppi,
    pub psg: Psg,
    pub fdc: Fdc,
    pub keyboard: KeyboardMatrix,
    pub io: IoDispatch,
    pub hooks: CoreHooks,
    /// In a `RefCell` because z80emu's `Memory::read_mem`/`read_mem16` only
    /// hand us `&self`, yet read watchpoints must still latch on plain data
    /// reads, not just opcode fetches or writes.
    pub debugger: RefCell<Debugger>,
    pub port_b_inputs: PortBInputs,
    pub mf2_present: bool,
    disc: Box<dyn SectorStore>,
    pending_watch_hit: Cell<Option<usize>>,

    /// Queued autotype keystrokes (§4.10); advanced once per frame from
    /// [`Machine::execute_until_frame_complete`].
    pub autotype: AutoTypeQueue,
    pub autotype_keys: KeyNameTable,

    /// Game/expansion peripheral stubs, shared with the boxed handlers
    /// registered in `io`/`hooks` so a host can still drive them directly
    /// (`machine.amx_mouse.borrow_mut().update(...)`).
    pub amx_mouse: Rc<RefCell<AmxMouse>>,
    pub phazer: Phazer,
    pub amdrum: Rc<RefCell<AmDrum>>,
    /// `RefCell`'d for the same reason as `debugger`: its ROM-read intercept
    /// mutates bit-bang state but `Memory::read_mem` only hands us `&self`.
    pub smartwatch: RefCell<SmartWatch>,
    pub symbiface: Rc<RefCell<Symbiface>>,
    pub m4board: Rc<RefCell<M4Board>>,
}

impl Default for Machine {
    fn default() -> Self {
        let mut machine = Machine {
            cpu: CpuCore::default(),
            clock: CpcClock::default(),
            memory: MemoryMap::default(),
            gate_array: GateArray::new(),
            crtc: Crtc::new(cpcemu_peripherals::crtc::CrtcType::Type0),
            ppi: Ppi::new(),
            psg: Psg::new(),
            fdc: Fdc::new(),
            keyboard: KeyboardMatrix::new(),
            io: IoDispatch::new(),
            hooks: CoreHooks::default(),
            debugger: RefCell::new(Debugger::default()),
            port_b_inputs: PortBInputs::default(),
            mf2_present: false,
            disc: Box::new(NoDisc),
            pending_watch_hit: Cell::new(None),
            autotype: AutoTypeQueue::default(),
            autotype_keys: KeyNameTable::default(),
            amx_mouse: Rc::new(RefCell::new(AmxMouse::new())),
            phazer: Phazer::new(),
            amdrum: Rc::new(RefCell::new(AmDrum::new())),
            smartwatch: RefCell::new(SmartWatch::new()),
            symbiface: Rc::new(RefCell::new(Symbiface::new())),
            m4board: Rc::new(RefCell::new(M4Board::new())),
        };
        machine.register_stub_peripherals();
        machine
    }
}

impl Machine {
    pub fn new() -> Self { Self::default() }

    /// Hooks the AMX Mouse, AmDrum, Symbiface II and M4 board stubs into
    /// `io`/`hooks` so they receive port traffic without `execute_until_frame_complete`
    /// having to special-case them alongside the core devices.
    fn register_stub_peripherals(&mut self) {
        self.hooks.add_keyboard_read_hook(Box::new(SharedDevice::new(self.amx_mouse.clone(), "AMX Mouse")));
        let amx_for_line_select = self.amx_mouse.clone();
        self.hooks.add_keyboard_line_select_hook(Box::new(move |line| {
            amx_for_line_select.borrow_mut().row_select(line);
        }));

        self.io.register_out(0xFF, Box::new(SharedDevice::new(self.amdrum.clone(), "AmDrum")));

        self.io.register_in(0xFD, Box::new(SharedDevice::new(self.symbiface.clone(), "Symbiface II")));
        self.io.register_out(0xFD, Box::new(SharedDevice::new(self.symbiface.clone(), "Symbiface II")));

        self.io.register_out(0xFE, Box::new(SharedDevice::new(self.m4board.clone(), "M4 Board")));
        self.io.register_out(0xFC, Box::new(SharedDevice::new(self.m4board.clone(), "M4 Board")));
    }

    /// Replaces drive A's backing store (typically a loaded `.DSK` image).
    pub fn insert_disc(&mut self, disc: Box<dyn SectorStore>) {
        self.disc = disc;
    }

    pub fn eject_disc(&mut self) {
        self.disc = Box::new(NoDisc);
    }

    pub fn disc(&self) -> &dyn SectorStore { &*self.disc }
    pub fn disc_mut(&mut self) -> &mut dyn SectorStore { &mut *self.disc }

    /// Parses and queues `text` against `autotype_keys`, the host-populated
    /// layout table. See `cpcemu_peripherals::autotype` for the `~KEY~` syntax.
    pub fn enqueue_autotype(&mut self, text: &str) -> Result<(), cpcemu_peripherals::autotype::ParseError> {
        self.autotype.enqueue(text, &self.autotype_keys)
    }

    fn reconfigure_memory(&mut self) {
        self.memory.reconfigure(self.gate_array.memory_inputs());
    }

    fn register_snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            af: ((self.cpu.get_acc() as u16) << 8) | self.cpu.get_flags().bits() as u16,
            bc: self.cpu.get_reg16(StkReg16::BC),
            de: self.cpu.get_reg16(StkReg16::DE),
            hl: self.cpu.get_reg16(StkReg16::HL),
            ix: self.cpu.get_index16(Prefix::Xdd),
            iy: self.cpu.get_index16(Prefix::Yfd),
            sp: self.cpu.get_sp(),
            pc: self.cpu.get_pc(),
        }
    }

    /// Steps the CRTC and PSG by one CPU T-state's worth of device time,
    /// debited after the instruction that consumed it completes (§5).
    fn tick_devices(&mut self, tstates: u32) {
        self.psg.tick(tstates);
        for _ in 0..tstates {
            let ev = self.crtc.tick();
            if ev.hsync_start {
                self.gate_array.on_hsync();
            }
            if ev.vsync_start {
                self.gate_array.on_vsync();
                self.hooks.fire_keyboard_line_select(self.ppi.keyboard_line());
                if self.phazer.should_refresh_light_pen() {
                    self.crtc.regs[17] = self.crtc.regs[17].wrapping_add(1);
                }
            }
        }
        self.clock.debit(tstates);
    }

    /// Advances the autotype queue by one frame, pressing/releasing keys on
    /// the keyboard matrix as scripted (§4.10).
    fn tick_autotype(&mut self) {
        let keyboard = &mut self.keyboard;
        self.autotype.tick(|key, pressed| {
            if pressed {
                keyboard.press(key.0, key.1);
            } else {
                keyboard.release(key.0, key.1);
            }
        });
    }

    /// Executes Z80 instructions until the CRTC completes a frame or another
    /// exit condition (breakpoint, watchpoint, I/O breakpoint, halt-forever,
    /// host pause) fires. Mirrors §4.2/§5's run loop contract.
    pub fn execute_until_frame_complete(&mut self) -> ExitReason {
        self.clock.start_new_frame();
        self.tick_autotype();
        loop {
            if self.debugger.borrow().paused {
                return ExitReason::HostRequestedPause;
            }
            let pc = self.cpu.get_pc();
            let regs = self.register_snapshot();
            if let Some(reason) = self.debugger.borrow_mut().check_breakpoint(pc, &regs) {
                return reason;
            }

            let before_tstates = self.clock.total_tstates();
            let before_iffs = self.cpu.get_iffs();
            self.pending_watch_hit.set(None);

            // `self` is both the bus (Memory+Io) and the owner of the CPU core,
            // so the CPU has to be moved out for the duration of the call — the
            // alternative, passing `self` to a method on `self.cpu`, borrows the
            // whole struct while its `cpu` field is already borrowed.
            let mut cpu = std::mem::take(&mut self.cpu);
            let debug: Option<fn(CpuDebug)> = None;
            let mut clock = self.clock.clone();
            let _ = cpu.execute_next(self, &mut clock, debug);
            self.cpu = cpu;
            self.clock = clock;
            // Undefined opcodes execute as a NOP per §4.2; z80emu already treats
            // unrecognized encodings this way, so a returned error here can only
            // come from a host-requested break, not a CPU fault.

            let consumed = (self.clock.total_tstates() - before_tstates) as u32;
            self.tick_devices(consumed.max(4));

            let after_iffs = self.cpu.get_iffs();
            if before_iffs.0 && !after_iffs.0 && self.gate_array.irq_pending {
                self.gate_array.take_irq();
            }

            if let Some(index) = self.pending_watch_hit.get() {
                return ExitReason::Watchpoint(index);
            }
            if self.debugger.borrow_mut().pending_step_satisfied(self.cpu.get_pc(), self.cpu.get_sp()) {
                return ExitReason::Breakpoint(self.cpu.get_pc());
            }
            if self.cpu.is_halt() && !self.cpu.get_iffs().0 {
                debug!("halt forever at pc={:04x}, total_tstates={}", self.cpu.get_pc(), self.clock.total_tstates());
                return ExitReason::Halt;
            }
            if self.clock.frame_complete() {
                return ExitReason::FrameComplete;
            }
        }
    }

    pub fn reset(&mut self, hard: bool) {
        debug!("machine reset, hard={hard}");
        self.cpu.reset();
        if hard {
            self.ppi.reset();
            self.fdc = Fdc::new();
            self.psg.reset();
        }
        self.reconfigure_memory();
    }

    fn gate_array_selected(high: u8) -> bool { high & 0xC0 == 0x40 }
    fn ram_config_selected(high: u8, value: u8) -> bool { high & 0x80 == 0 && value >> 6 == 0b11 }
    fn crtc_selected(high: u8) -> bool { (0xBC..=0xBF).contains(&high) }
    fn rom_select_selected(high: u8) -> bool { high & 0x20 == 0 }
    fn printer_selected(high: u8) -> bool { high & 0x10 == 0 }
    fn ppi_selected(high: u8) -> bool { high & 0x08 == 0 }
    fn fdc_motor_selected(high: u8) -> bool { high == 0xFA }
    fn fdc_data_selected(high: u8) -> bool { high == 0xFB }
    fn mf2_selected(high: u8) -> bool { high == 0xFE }

    fn port_b_inputs(&self) -> PortBInputs {
        PortBInputs { crtc_vsync: self.crtc.flag_invsync, ..self.port_b_inputs }
    }
}

impl Z80Io for Machine {
    type Timestamp = u32;
    type WrIoBreak = ();
    type RetiBreak = ();

    fn is_irq(&mut self, _ts: u32) -> bool {
        self.gate_array.irq_pending
    }

    fn read_io(&mut self, port: u16, _ts: u32) -> (u8, Option<core::num::NonZeroU16>) {
        let high = (port >> 8) as u8;
        let low2 = (port >> 8) & 0x03; // PPI port select, independent of high-byte match below

        if Machine::ppi_selected(high) {
            let value = match low2 {
                0 => self.ppi.read_port_a(&mut self.psg),
                1 => self.ppi.read_port_b(self.port_b_inputs()),
                2 => {
                    let raw = self.ppi.read_port_c();
                    let masked_row = self.hooks.apply_keyboard_read(
                        self.ppi.keyboard_line(),
                        self.keyboard.read_row(self.ppi.keyboard_line()),
                    );
                    (raw & 0xF0) | (masked_row & 0x0F)
                }
                _ => 0xFF,
            };
            return (value, None);
        }

        if Machine::crtc_selected(high) {
            let value = match high & 0x03 {
                1 => self.crtc.read_status().unwrap_or(0xFF),
                3 => self.crtc.read_data(),
                _ => 0xFF,
            };
            return (value, None);
        }

        if Machine::fdc_data_selected(high) {
            return (self.fdc.read_data(), None);
        }
        if Machine::fdc_motor_selected(high) {
            return (self.fdc.main_status(), None);
        }

        if let Some(value) = self.io.dispatch_in(port) {
            return (value, None);
        }
        (0xFF, None)
    }

    fn write_io(&mut self, port: u16, data: u8, _ts: u32) -> (Option<()>, Option<core::num::NonZeroU16>) {
        let high = (port >> 8) as u8;

        if Machine::ram_config_selected(high, data) {
            self.gate_array.write_ram_config(data);
            self.reconfigure_memory();
        } else if Machine::gate_array_selected(high) {
            if self.gate_array.write(data) {
                self.reconfigure_memory();
            }
        }

        if Machine::crtc_selected(high) {
            match high & 0x03 {
                0 => self.crtc.select_register(data),
                1 => self.crtc.write_data(data),
                _ => {}
            }
        }

        if Machine::rom_select_selected(high) {
            self.memory.rom.selected_upper = data;
            self.reconfigure_memory();
        }

        if Machine::ppi_selected(high) {
            let low2 = (port >> 8) & 0x03;
            match low2 {
                0 => self.ppi.write_port_a(data, &mut self.psg),
                2 => {
                    let hooks = &mut self.hooks;
                    self.ppi.write_port_c(
                        data, &mut self.keyboard, &mut self.psg,
                        |line| hooks.fire_keyboard_line_select(line),
                        |on| hooks.fire_tape_motor(on),
                    );
                }
                3 => {
                    let hooks = &mut self.hooks;
                    self.ppi.write_control(
                        data, &mut self.keyboard, &mut self.psg,
                        |line| hooks.fire_keyboard_line_select(line),
                        |on| hooks.fire_tape_motor(on),
                    );
                }
                _ => {}
            }
        }

        if Machine::fdc_motor_selected(high) {
            let hooks = &mut self.hooks;
            self.fdc.write_motor_control(data, |on| hooks.fire_fdc_motor(on));
        }
        if Machine::fdc_data_selected(high) {
            self.fdc.write_data(data, &mut *self.disc);
        }

        if Machine::mf2_selected(high) {
            match data {
                0xE8 => self.memory.mf2.active = true,
                0xEA => self.memory.mf2.active = false,
                _ => {}
            }
            self.reconfigure_memory();
        }

        self.io.dispatch_out(port, data);
        let _ = Machine::printer_selected(high);
        (None, None)
    }
}

impl Machine {
    /// Checked on every memory access, read or write, per the run loop's
    /// watchpoint contract; only the first hit in an instruction sticks.
    fn note_watch(&self, addr: u16, is_write: bool) {
        if self.pending_watch_hit.get().is_some() {
            return;
        }
        let regs = self.register_snapshot();
        let hit = self.debugger.borrow_mut().check_memory_access(addr, is_write, &regs);
        if hit.is_some() {
            self.pending_watch_hit.set(hit);
        }
    }

    /// Lets the Dobbertin SmartWatch bit-bang its wake pattern and RTC reply
    /// in front of whatever plain ROM byte `addr` would otherwise return.
    fn through_smartwatch(&self, addr: u16, rom_byte: u8) -> u8 {
        if addr < 0xC000 {
            return rom_byte;
        }
        match self.memory.read_slot_refs()[3] {
            BankRef::UpperRom(_) => self.smartwatch.borrow_mut().rom_read(addr, rom_byte),
            _ => rom_byte,
        }
    }
}

impl Z80Memory for Machine {
    type Timestamp = u32;

    fn read_debug(&self, addr: u16) -> u8 { self.memory.read8(addr) }

    fn read_mem(&self, addr: u16, _ts: u32) -> u8 {
        self.note_watch(addr, false);
        self.through_smartwatch(addr, self.memory.read8(addr))
    }

    fn read_mem16(&self, addr: u16, _ts: u32) -> u16 {
        self.note_watch(addr, false);
        self.note_watch(addr.wrapping_add(1), false);
        let lo = self.through_smartwatch(addr, self.memory.read8(addr)) as u16;
        let hi = self.through_smartwatch(addr.wrapping_add(1), self.memory.read8(addr.wrapping_add(1))) as u16;
        lo | (hi << 8)
    }

    fn read_opcode(&mut self, pc: u16, _ir: u16, _ts: u32) -> u8 {
        self.through_smartwatch(pc, self.memory.read8(pc))
    }

    fn write_mem(&mut self, addr: u16, val: u8, _ts: u32) {
        self.note_watch(addr, true);
        self.memory.write8(addr, val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_machine_has_no_disc_and_tolerates_fdc_io() {
        let mut m = Machine::new();
        m.fdc.write_motor_control(0x01, |_| {});
        assert!(m.fdc.motor_on(0));
    }

    #[test]
    fn gate_array_out_reconfigures_memory_map() {
        let mut m = Machine::new();
        m.write_io(0x7F00, 0b1100_0001, 0);
        assert_eq!(m.gate_array.ram_config, 1);
    }

    #[test]
    fn crtc_register_select_then_write_round_trips() {
        let mut m = Machine::new();
        m.write_io(0xBC00, 1, 0); // select R1
        m.write_io(0xBD00, 40, 0); // R1 = 40 (displayed chars)
        assert_eq!(m.crtc.regs[1], 40);
    }

    #[test]
    fn amdrum_out_reaches_the_shared_device() {
        let mut m = Machine::new();
        m.amdrum.borrow_mut().enabled = true;
        m.write_io(0xFF12, 77, 0);
        assert_eq!(m.amdrum.borrow().dac_value, 77);
    }

    #[test]
    fn autotype_enqueue_presses_and_releases_through_a_frame() {
        let mut m = Machine::new();
        m.autotype_keys = cpcemu_peripherals::autotype::KeyNameTable::new().with_char('a', (1, 0));
        m.enqueue_autotype("a").unwrap();
        m.tick_autotype(); // press
        assert!(m.keyboard.is_pressed(1, 0));
        m.tick_autotype(); // release
        assert!(!m.keyboard.is_pressed(1, 0));
    }

    #[test]
    fn read_watchpoint_latches_through_shared_memory_read() {
        use cpcemu_core::cpu::{Watchpoint, WatchKind};

        let m = Machine::new();
        m.debugger.borrow_mut().add_watchpoint(Watchpoint {
            address: 0x4000, length: 1, kind: WatchKind::Read, condition: None, latched: false,
        });
        let _ = Z80Memory::read_mem(&m, 0x4000, 0);
        assert_eq!(m.pending_watch_hit.get(), Some(0));
    }
}
