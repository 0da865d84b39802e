//! Core building blocks shared by the cpcemu library: the switchable memory map,
//! T-state clock, port I/O dispatch table and the Z80 debugger surface.
//!
//! The actual instruction decode/execute loop is provided by the
//! [`z80emu`](https://docs.rs/z80emu) crate; this crate supplies everything the
//! spec calls "core" around it.
pub mod clock;
pub mod cpu;
pub mod io;
pub mod memory;

pub use z80emu;
