//! AMSDOS 128-byte file header: an optional prefix recording load/exec
//! addresses and a checksum over the rest of the header. See §4.9.
use std::convert::TryInto;

pub const HEADER_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType { Basic, Protected, Binary }

impl FileType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FileType::Basic),
            1 => Some(FileType::Protected),
            2 => Some(FileType::Binary),
            _ => None,
        }
    }
    fn as_byte(self) -> u8 {
        match self {
            FileType::Basic => 0,
            FileType::Protected => 1,
            FileType::Binary => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmsdosHeader {
    pub user: u8,
    pub filename: [u8; 11],
    pub file_type: FileType,
    pub load_addr: u16,
    pub logical_length: u16,
    pub exec_addr: u16,
    pub real_length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumError;

impl std::fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AMSDOS header checksum mismatch")
    }
}
impl std::error::Error for ChecksumError {}

fn checksum(header_bytes: &[u8; HEADER_LEN]) -> u16 {
    header_bytes[0..67].iter().fold(0u32, |acc, &b| acc + b as u32) as u16
}

impl AmsdosHeader {
    /// Parses a 128-byte AMSDOS header, rejecting on checksum mismatch.
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self, ChecksumError> {
        let stored = u16::from_le_bytes([raw[67], raw[68]]);
        if checksum(raw) != stored {
            return Err(ChecksumError);
        }
        let mut filename = [0u8; 11];
        filename.copy_from_slice(&raw[1..12]);
        let file_type = FileType::from_byte(raw[18]).unwrap_or(FileType::Binary);
        let load_addr = u16::from_le_bytes([raw[21], raw[22]]);
        let logical_length = u16::from_le_bytes([raw[24], raw[25]]);
        let exec_addr = u16::from_le_bytes([raw[26], raw[27]]);
        let real_length = u32::from_le_bytes([raw[64], raw[65], raw[66], 0]);
        Ok(AmsdosHeader { user: raw[0], filename, file_type, load_addr, logical_length, exec_addr, real_length })
    }

    /// Serializes this header into 128 bytes, computing and stamping the
    /// checksum at offset 67.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut raw = [0u8; HEADER_LEN];
        raw[0] = self.user;
        raw[1..12].copy_from_slice(&self.filename);
        raw[18] = self.file_type.as_byte();
        raw[21..23].copy_from_slice(&self.load_addr.to_le_bytes());
        raw[24..26].copy_from_slice(&self.logical_length.to_le_bytes());
        raw[26..28].copy_from_slice(&self.exec_addr.to_le_bytes());
        let real_len_bytes = self.real_length.to_le_bytes();
        raw[64..67].copy_from_slice(&real_len_bytes[0..3]);
        let sum = checksum(&raw);
        raw[67..69].copy_from_slice(&sum.to_le_bytes());
        raw
    }
}

/// Builds a header for a freshly-written file, matching `make_amsdos_header`
/// from the invariants list (§8).
pub fn make_amsdos_header(
    user: u8,
    filename: &str,
    file_type: FileType,
    load_addr: u16,
    exec_addr: u16,
    data: &[u8],
) -> [u8; HEADER_LEN] {
    let mut name = [0u8; 11];
    for (i, b) in filename.bytes().take(11).enumerate() { name[i] = b; }
    let header = AmsdosHeader {
        user,
        filename: name,
        file_type,
        load_addr,
        logical_length: data.len().min(u16::MAX as usize) as u16,
        exec_addr,
        real_length: data.len().try_into().unwrap_or(u32::MAX) & 0x00FF_FFFF,
    };
    header.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_parse() {
        let raw = make_amsdos_header(0, "TEST", FileType::Binary, 0x4000, 0x4000, &[0u8; 300]);
        let parsed = AmsdosHeader::parse(&raw).unwrap();
        assert_eq!(parsed.load_addr, 0x4000);
        assert_eq!(parsed.real_length, 300);
        assert_eq!(parsed.file_type, FileType::Binary);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut raw = make_amsdos_header(0, "TEST", FileType::Basic, 0, 0, &[1, 2, 3]);
        raw[67] ^= 0xFF;
        assert!(AmsdosHeader::parse(&raw).is_err());
    }

    #[test]
    fn checksum_equals_sum_of_bytes_0_to_66() {
        let raw = make_amsdos_header(3, "FOO", FileType::Protected, 0x100, 0x200, &[9u8; 40]);
        let expected: u16 = raw[0..67].iter().fold(0u32, |acc, &b| acc + b as u32) as u16;
        let stored = u16::from_le_bytes([raw[67], raw[68]]);
        assert_eq!(stored, expected);
    }
}
