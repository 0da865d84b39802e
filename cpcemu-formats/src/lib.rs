//! File format readers/writers for the Amstrad CPC: disc images (`.DSK`),
//! the CP/M DATA filesystem layered on top of them, AMSDOS file headers,
//! machine snapshots (`.SNA`), tape images (`.CDT`/`.TZX`), and the Silicon
//! Disc battery-backed RAM image.
pub mod amsdos;
pub mod cpm;
pub mod dsk;
pub mod silicon_disc;
pub mod sna;
pub mod tape;
