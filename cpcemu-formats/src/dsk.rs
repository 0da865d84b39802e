//! `.DSK` disc image reader/writer. Accepts both the standard "MV - CPCEMU
//! Disk-File" layout (one fixed track size for the whole image) and the
//! "EXTENDED CPC DSK File" layout (one size byte per track). Always writes
//! Extended format, as spec'd for the on-disc format. See external-interfaces
//! "DSK on-disc format".
use std::io::{self, Error, ErrorKind, Read, Write};

use cpcemu_peripherals::fdc::{Sector, SectorStore, Track};

const STANDARD_SIG: &[u8] = b"MV - CPCEMU Disk-File\r\n";
const EXTENDED_SIG: &[u8] = b"EXTENDED CPC DSK File\r\n";
const HEADER_LEN: usize = 256;
const TRACK_HEADER_LEN: usize = 256;
pub const CREATOR_SIGNATURE: &str = "cpcemu v0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant { Standard, Extended }

/// An in-memory disc image: tracks indexed `[side][cylinder]`, ready to back
/// an [`SectorStore`] implementation for the FDC.
#[derive(Debug, Clone)]
pub struct DiscImage {
    pub tracks: Vec<Vec<Track>>, // tracks[side][cylinder]
    pub write_protected: bool,
}

impl DiscImage {
    pub fn blank(cylinders: u8, sides: u8) -> Self {
        let tracks = (0..sides)
            .map(|_| (0..cylinders).map(|_| Track::default()).collect())
            .collect();
        DiscImage { tracks, write_protected: false }
    }

    pub fn sides(&self) -> u8 { self.tracks.len() as u8 }
    pub fn cylinders(&self) -> u8 { self.tracks.first().map_or(0, |t| t.len() as u8) }

    pub fn load<R: Read>(mut rd: R) -> io::Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        rd.read_exact(&mut header)?;

        let variant = if header.starts_with(STANDARD_SIG) {
            Variant::Standard
        } else if header.starts_with(EXTENDED_SIG) {
            Variant::Extended
        } else {
            return Err(Error::new(ErrorKind::InvalidData, "unrecognized DSK signature"));
        };

        let num_tracks = header[48];
        let num_sides = header[49].max(1);
        let standard_track_size = u16::from_le_bytes([header[50], header[51]]) as usize;

        let mut track_sizes = vec![0usize; num_tracks as usize * num_sides as usize];
        match variant {
            Variant::Standard => track_sizes.iter_mut().for_each(|s| *s = standard_track_size),
            Variant::Extended => {
                for (i, size) in track_sizes.iter_mut().enumerate() {
                    let high = *header.get(52 + i).ok_or_else(|| {
                        Error::new(ErrorKind::InvalidData, "track size table truncated")
                    })?;
                    *size = (high as usize) * 256;
                }
            }
        }

        let mut tracks: Vec<Vec<Track>> = (0..num_sides).map(|_| Vec::with_capacity(num_tracks as usize)).collect();
        for i in 0..track_sizes.len() {
            let size = track_sizes[i];
            if size == 0 {
                for side in tracks.iter_mut() {
                    side.push(Track::default());
                }
                continue;
            }
            let mut buf = vec![0u8; size];
            rd.read_exact(&mut buf)?;
            let track = parse_track(&buf)?;
            let side = i % num_sides as usize;
            tracks[side].push(track);
        }

        Ok(DiscImage { tracks, write_protected: false })
    }

    pub fn save<W: Write>(&self, mut wr: W) -> io::Result<()> {
        let num_sides = self.sides();
        let num_cyls = self.cylinders();
        let mut header = vec![0u8; HEADER_LEN];
        header[..EXTENDED_SIG.len()].copy_from_slice(EXTENDED_SIG);
        let creator = CREATOR_SIGNATURE.as_bytes();
        let creator_len = creator.len().min(14);
        header[34..34 + creator_len].copy_from_slice(&creator[..creator_len]);
        header[48] = num_cyls;
        header[49] = num_sides;

        let mut track_bufs = Vec::with_capacity(num_cyls as usize * num_sides as usize);
        for cyl in 0..num_cyls {
            for side in 0..num_sides {
                let track = &self.tracks[side as usize][cyl as usize];
                track_bufs.push(serialize_track(track, cyl, side));
            }
        }
        for (i, buf) in track_bufs.iter().enumerate() {
            let size_256_units = ((buf.len() + 255) / 256).min(255);
            header[52 + i] = size_256_units as u8;
        }

        wr.write_all(&header)?;
        for buf in &track_bufs {
            let padded_len = (((buf.len() + 255) / 256) * 256).max(TRACK_HEADER_LEN);
            let mut padded = buf.clone();
            padded.resize(padded_len, 0);
            wr.write_all(&padded)?;
        }
        Ok(())
    }
}

fn parse_track(buf: &[u8]) -> io::Result<Track> {
    if buf.len() < TRACK_HEADER_LEN || !buf.starts_with(b"Track-Info\r\n") {
        return Err(Error::new(ErrorKind::InvalidData, "bad track header"));
    }
    let sector_size_code = buf[20];
    let num_sectors = buf[21] as usize;
    let mut sectors = Vec::with_capacity(num_sectors);
    let mut data_offset = TRACK_HEADER_LEN;
    for i in 0..num_sectors {
        let entry = 24 + i * 8;
        if entry + 8 > buf.len() { break; }
        let c = buf[entry];
        let h = buf[entry + 1];
        let r = buf[entry + 2];
        let n = buf[entry + 3];
        let actual_len = u16::from_le_bytes([buf[entry + 6], buf[entry + 7]]) as usize;
        let len = if actual_len != 0 { actual_len } else { 128usize << sector_size_code.min(7) };
        let end = (data_offset + len).min(buf.len());
        let data = buf[data_offset..end].to_vec();
        data_offset = end;
        sectors.push(Sector { cylinder: c, head: h, record: r, size_code: n, data });
    }
    Ok(Track { sectors })
}

fn serialize_track(track: &Track, cyl: u8, side: u8) -> Vec<u8> {
    let mut header = vec![0u8; TRACK_HEADER_LEN];
    header[..12].copy_from_slice(b"Track-Info\r\n");
    header[16] = cyl;
    header[17] = side;
    let size_code = track.sectors.first().map_or(2, |s| s.size_code);
    header[20] = size_code;
    header[21] = track.sectors.len() as u8;
    header[22] = 0x4E; // conventional gap#3 length
    header[23] = 0xE5;
    for (i, s) in track.sectors.iter().enumerate() {
        let entry = 24 + i * 8;
        if entry + 8 > header.len() { break; }
        header[entry] = s.cylinder;
        header[entry + 1] = s.head;
        header[entry + 2] = s.record;
        header[entry + 3] = s.size_code;
        header[entry + 4] = 0;
        header[entry + 5] = 0;
        let len = s.data.len() as u16;
        header[entry + 6..entry + 8].copy_from_slice(&len.to_le_bytes());
    }
    let mut out = header;
    for s in &track.sectors {
        out.extend_from_slice(&s.data);
    }
    out
}

impl SectorStore for DiscImage {
    fn track(&self, drive: u8, cylinder: u8, head: u8) -> Option<&Track> {
        if drive != 0 { return None; }
        self.tracks.get(head as usize)?.get(cylinder as usize)
    }

    fn track_mut(&mut self, drive: u8, cylinder: u8, head: u8) -> Option<&mut Track> {
        if drive != 0 { return None; }
        self.tracks.get_mut(head as usize)?.get_mut(cylinder as usize)
    }

    fn cylinder_count(&self, drive: u8) -> u8 {
        if drive != 0 { return 0; }
        self.cylinders()
    }

    fn drive_present(&self, drive: u8) -> bool { drive == 0 }

    fn write_protected(&self, drive: u8) -> bool {
        drive == 0 && self.write_protected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_format_disc() -> DiscImage {
        let mut disc = DiscImage::blank(40, 1);
        for cyl in 0..40u8 {
            let sectors = (0..9)
                .map(|i| Sector { cylinder: cyl, head: 0, record: 0xC1 + i, size_code: 2, data: vec![0xE5; 512] })
                .collect();
            disc.tracks[0][cyl as usize] = Track { sectors };
        }
        disc
    }

    #[test]
    fn round_trip_preserves_chrn_and_payload() {
        let mut disc = data_format_disc();
        disc.tracks[0][3].sectors[0].data = vec![0xAB; 512];

        let mut buf = Vec::new();
        disc.save(&mut buf).unwrap();
        let loaded = DiscImage::load(&buf[..]).unwrap();

        assert_eq!(loaded.cylinders(), 40);
        let reread = &loaded.tracks[0][3].sectors[0];
        assert_eq!(reread.data, vec![0xAB; 512]);
        assert_eq!((reread.cylinder, reread.head, reread.record), (3, 0, 0xC1));
    }

    #[test]
    fn rejects_unknown_signature() {
        let buf = vec![0u8; 256];
        assert!(DiscImage::load(&buf[..]).is_err());
    }

    #[test]
    fn writer_always_produces_extended_signature() {
        let disc = DiscImage::blank(1, 1);
        let mut buf = Vec::new();
        disc.save(&mut buf).unwrap();
        assert!(buf.starts_with(EXTENDED_SIG));
    }
}
