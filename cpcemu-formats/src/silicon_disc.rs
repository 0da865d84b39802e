//! Silicon Disc: battery-backed 256 KiB RAM occupying expansion banks 4..7,
//! persisted under the `"KSDX"` format. See external interfaces, "Silicon Disc".
use std::io::{self, Error, ErrorKind, Read, Write};

pub const SIZE_BYTES: usize = 256 * 1024;
const MAGIC: &[u8; 4] = b"KSDX";
const CURRENT_VERSION: u8 = 1;

#[derive(Debug, Clone)]
pub struct SiliconDisc {
    pub data: Vec<u8>,
}

impl Default for SiliconDisc {
    fn default() -> Self { SiliconDisc { data: vec![0u8; SIZE_BYTES] } }
}

impl SiliconDisc {
    pub fn new() -> Self { Self::default() }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
    }

    pub fn load<R: Read>(mut rd: R) -> io::Result<Self> {
        let mut header = [0u8; 4];
        rd.read_exact(&mut header)?;
        if &header != MAGIC {
            return Err(Error::new(ErrorKind::InvalidData, "not a KSDX silicon disc image"));
        }
        let mut rest_header = [0u8; 4]; // version byte + 3 reserved
        rd.read_exact(&mut rest_header)?;
        let mut data = vec![0u8; SIZE_BYTES];
        rd.read_exact(&mut data)?;
        Ok(SiliconDisc { data })
    }

    pub fn save<W: Write>(&self, mut wr: W) -> io::Result<()> {
        wr.write_all(MAGIC)?;
        wr.write_all(&[CURRENT_VERSION, 0, 0, 0])?;
        wr.write_all(&self.data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_contents() {
        let mut disc = SiliconDisc::new();
        disc.data[0] = 0xAA;
        disc.data[SIZE_BYTES - 1] = 0x55;
        let mut buf = Vec::new();
        disc.save(&mut buf).unwrap();
        let loaded = SiliconDisc::load(&buf[..]).unwrap();
        assert_eq!(loaded.data[0], 0xAA);
        assert_eq!(loaded.data[SIZE_BYTES - 1], 0x55);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; SIZE_BYTES + 8];
        assert!(SiliconDisc::load(&buf[..]).is_err());
    }

    #[test]
    fn clear_zeroes_all_bytes() {
        let mut disc = SiliconDisc::new();
        disc.data.iter_mut().for_each(|b| *b = 0xFF);
        disc.clear();
        assert!(disc.data.iter().all(|&b| b == 0));
    }
}
