//! Port-address I/O dispatch: per-high-byte handler slots plus the core hooks
//! (keyboard-read, keyboard-line-select, tape-motor, FDC-motor) that peripherals
//! external to the core devices register against.
use std::fmt;

/// A peripheral that participates in port I/O, registered against one or more
/// high bytes of the port address. Mirrors the C-style `{function pointer,
/// enabled-flag pointer, debug name}` handler table as a small trait object.
pub trait PortDevice {
    /// Attempt to supply a value for an `IN` on this port. `None` means "not
    /// mine", letting other registered handlers (or the core devices) answer.
    fn read(&mut self, port: u16) -> Option<u8> { let _ = port; None }
    /// Handle an `OUT` to this port. Returns `true` if this device acted on it.
    /// Per §4.8, multiple enabled handlers may all act on the same `OUT` - this
    /// is by design, not checked for exclusivity.
    fn write(&mut self, port: u16, value: u8) { let _ = (port, value); }
    fn enabled(&self) -> bool { true }
    fn name(&self) -> &str;
}

struct Slot {
    device: Box<dyn PortDevice>,
}

/// Per-port-high-byte slot arrays for `IN` and `OUT`, each holding any number of
/// registered handlers. Registration appends; [`IoDispatch::clear`] zeroes all slots.
#[derive(Default)]
pub struct IoDispatch {
    in_slots: Vec<Vec<Slot>>,
    out_slots: Vec<Vec<Slot>>,
}

impl fmt::Debug for IoDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoDispatch")
            .field("in_devices", &self.in_slots.iter().map(|v| v.len()).sum::<usize>())
            .field("out_devices", &self.out_slots.iter().map(|v| v.len()).sum::<usize>())
            .finish()
    }
}

impl IoDispatch {
    pub fn new() -> Self {
        let mut in_slots = Vec::with_capacity(256);
        in_slots.resize_with(256, Vec::new);
        let mut out_slots = Vec::with_capacity(256);
        out_slots.resize_with(256, Vec::new);
        IoDispatch { in_slots, out_slots }
    }

    pub fn register_in(&mut self, high_byte: u8, device: Box<dyn PortDevice>) {
        self.in_slots[high_byte as usize].push(Slot { device });
    }

    pub fn register_out(&mut self, high_byte: u8, device: Box<dyn PortDevice>) {
        self.out_slots[high_byte as usize].push(Slot { device });
    }

    pub fn clear(&mut self) {
        for slot in self.in_slots.iter_mut() { slot.clear(); }
        for slot in self.out_slots.iter_mut() { slot.clear(); }
    }

    /// Invokes every enabled handler registered for this port's high byte, returning
    /// the first value supplied (later handlers are still informed is skipped - only
    /// the IN path short-circuits on first answer, matching §4.8 step 2/3).
    pub fn dispatch_in(&mut self, port: u16) -> Option<u8> {
        let high = (port >> 8) as u8;
        for slot in self.in_slots[high as usize].iter_mut() {
            if slot.device.enabled() {
                if let Some(value) = slot.device.read(port) {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Invokes every enabled handler registered for this port's high byte. All of them
    /// run - several expansion devices legitimately share address space.
    pub fn dispatch_out(&mut self, port: u16, value: u8) {
        let high = (port >> 8) as u8;
        for slot in self.out_slots[high as usize].iter_mut() {
            if slot.device.enabled() {
                slot.device.write(port, value);
            }
        }
    }
}

/// An `AND`-mask hook applied to the raw keyboard row value the PPI composes.
/// A disabled hook must return `0xFF` (no-op), per §4.8.
pub trait KeyboardReadHook {
    fn mask_for_row(&mut self, row: u8) -> u8;
    fn enabled(&self) -> bool { true }
}

/// Fire-and-forget notification hooks invoked from the PPI / FDC control paths.
#[derive(Default)]
pub struct CoreHooks {
    keyboard_read: Vec<Box<dyn KeyboardReadHook>>,
    keyboard_line_select: Vec<Box<dyn FnMut(u8)>>,
    tape_motor: Vec<Box<dyn FnMut(bool)>>,
    fdc_motor: Vec<Box<dyn FnMut(bool)>>,
}

impl fmt::Debug for CoreHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreHooks")
            .field("keyboard_read", &self.keyboard_read.len())
            .field("keyboard_line_select", &self.keyboard_line_select.len())
            .field("tape_motor", &self.tape_motor.len())
            .field("fdc_motor", &self.fdc_motor.len())
            .finish()
    }
}

impl CoreHooks {
    pub fn add_keyboard_read_hook(&mut self, hook: Box<dyn KeyboardReadHook>) {
        self.keyboard_read.push(hook);
    }

    pub fn add_keyboard_line_select_hook(&mut self, hook: Box<dyn FnMut(u8)>) {
        self.keyboard_line_select.push(hook);
    }

    pub fn add_tape_motor_hook(&mut self, hook: Box<dyn FnMut(bool)>) {
        self.tape_motor.push(hook);
    }

    pub fn add_fdc_motor_hook(&mut self, hook: Box<dyn FnMut(bool)>) {
        self.fdc_motor.push(hook);
    }

    /// Applies every enabled keyboard-read hook's AND-mask to `raw_row`.
    pub fn apply_keyboard_read(&mut self, row: u8, raw_row: u8) -> u8 {
        self.keyboard_read.iter_mut().fold(raw_row, |acc, hook| {
            if hook.enabled() { acc & hook.mask_for_row(row) } else { acc }
        })
    }

    pub fn fire_keyboard_line_select(&mut self, line: u8) {
        for hook in self.keyboard_line_select.iter_mut() { hook(line); }
    }

    pub fn fire_tape_motor(&mut self, on: bool) {
        for hook in self.tape_motor.iter_mut() { hook(on); }
    }

    pub fn fire_fdc_motor(&mut self, on: bool) {
        for hook in self.fdc_motor.iter_mut() { hook(on); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo { enabled: bool, last: std::cell::Cell<u8> }
    impl PortDevice for Echo {
        fn read(&mut self, _port: u16) -> Option<u8> { Some(0x99) }
        fn write(&mut self, _port: u16, value: u8) { self.last.set(value); }
        fn enabled(&self) -> bool { self.enabled }
        fn name(&self) -> &str { "echo" }
    }

    #[test]
    fn port_decode_sanity() {
        // Scenario 1: register an OUT handler for high-byte 0xFF, enabled, observe 0x42 once.
        use std::rc::Rc;
        let mut dispatch = IoDispatch::new();
        let last = Rc::new(std::cell::Cell::new(0u8));
        let hits = Rc::new(std::cell::Cell::new(0u32));
        struct Observer(Rc<std::cell::Cell<u8>>, Rc<std::cell::Cell<u32>>);
        impl PortDevice for Observer {
            fn write(&mut self, _port: u16, value: u8) {
                self.0.set(value);
                self.1.set(self.1.get() + 1);
            }
            fn name(&self) -> &str { "observer" }
        }
        dispatch.register_out(0xFF, Box::new(Observer(last.clone(), hits.clone())));
        dispatch.dispatch_out(0xFF00, 0x42);
        assert_eq!(last.get(), 0x42);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn disabled_device_is_skipped() {
        let mut dispatch = IoDispatch::new();
        dispatch.register_in(0x7F, Box::new(Echo { enabled: false, last: std::cell::Cell::new(0) }));
        assert_eq!(dispatch.dispatch_in(0x7F00), None);
    }
}
