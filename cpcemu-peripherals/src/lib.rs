//! Amstrad CPC peripheral devices: CRTC, gate array, keyboard matrix, PPI,
//! AY-3-8912 PSG, μPD765A FDC, autotype injection and the game/expansion
//! peripheral stubs (§4.3-4.10).
pub mod autotype;
pub mod crtc;
pub mod fdc;
pub mod gate_array;
pub mod keyboard;
pub mod ppi;
pub mod psg;
pub mod stub_devices;
