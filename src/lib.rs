//! `cpcemu`: the machine-cycle core of an Amstrad CPC 6128/6128+ emulator.
//!
//! This crate wires together the Z80 CPU ([`cpcemu_core`]), the CRTC/gate
//! array/PPI/PSG/FDC peripherals ([`cpcemu_peripherals`]) and the disc/tape/
//! snapshot file formats ([`cpcemu_formats`]) into one [`Machine`] facade a
//! host (windowing, audio, GUI — all outside this crate) drives frame by
//! frame. See `cpcemu-core` for the clock/memory-map/debugger primitives and
//! `cpcemu-peripherals` for the device models.
#![allow(dead_code)]

#[cfg(feature = "peripherals")]
mod machine;

#[cfg(feature = "peripherals")]
pub use machine::Machine;

pub use cpcemu_core;
pub use cpcemu_core::z80emu;

#[cfg(feature = "peripherals")]
pub use cpcemu_peripherals;

#[cfg(feature = "formats")]
pub use cpcemu_formats;

#[cfg(test)]
mod tests {
    #[test]
    fn it_works() {
        assert_eq!(2 + 2, 4);
    }
}
