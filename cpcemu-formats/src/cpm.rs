//! CP/M DATA-format filesystem, layered atop a [`SectorStore`]. See §4.9.
use std::collections::BTreeMap;

use cpcemu_peripherals::fdc::SectorStore;

pub const BLOCK_SIZE: usize = 1024;
pub const SECTORS_PER_BLOCK: usize = 2;
pub const SECTORS_PER_TRACK: usize = 9;
pub const TRACK_COUNT: usize = 40;
pub const DIR_ENTRY_SIZE: usize = 32;
pub const DIR_ENTRIES: usize = 64;
pub const RECORDS_PER_EXTENT: usize = 128;
pub const RECORD_SIZE: usize = 128;
pub const EXTENT_SIZE: usize = RECORDS_PER_EXTENT * RECORD_SIZE;
pub const TOTAL_BLOCKS: usize = 180;
pub const DELETED_MARKER: u8 = 0xE5;
const DIR_BLOCKS: [usize; 2] = [0, 1];

/// Failure path for every filesystem operation: a human-readable message,
/// never an unwind. See §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsError(pub String);

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}
impl std::error::Error for FsError {}

fn fs_err(msg: impl Into<String>) -> FsError { FsError(msg.into()) }

/// One parsed 32-byte directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub user: u8,
    pub name: [u8; 8],
    pub ext: [u8; 3],
    pub extent_low: u8,
    pub s1: u8,
    pub extent_high: u8,
    pub record_count: u8,
    pub blocks: [u8; 16],
}

impl DirEntry {
    fn deleted(&self) -> bool { self.user == DELETED_MARKER }

    fn extent_number(&self) -> u32 {
        (self.extent_low as u32 & 0x1F) | ((self.extent_high as u32) << 5)
    }

    fn name_8_3(&self) -> String {
        let name: String = self.name.iter().map(|&b| (b & 0x7F) as char).collect();
        let ext: String = self.ext.iter().map(|&b| (b & 0x7F) as char).collect();
        format!("{}.{}", name.trim_end(), ext.trim_end())
    }

    fn from_bytes(raw: &[u8; DIR_ENTRY_SIZE]) -> Self {
        let mut name = [0u8; 8];
        name.copy_from_slice(&raw[1..9]);
        let mut ext = [0u8; 3];
        ext.copy_from_slice(&raw[9..12]);
        let mut blocks = [0u8; 16];
        blocks.copy_from_slice(&raw[16..32]);
        DirEntry {
            user: raw[0],
            name,
            ext,
            extent_low: raw[12],
            s1: raw[13],
            extent_high: raw[14],
            record_count: raw[15],
            blocks,
        }
    }

    fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw[0] = self.user;
        raw[1..9].copy_from_slice(&self.name);
        raw[9..12].copy_from_slice(&self.ext);
        raw[12] = self.extent_low;
        raw[13] = self.s1;
        raw[14] = self.extent_high;
        raw[15] = self.record_count;
        raw[16..32].copy_from_slice(&self.blocks);
        raw
    }
}

/// A file entry as reported by [`list_files`]: its canonical name and total
/// byte length across every extent in its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub user: u8,
    pub name: String,
    pub size_bytes: u64,
}

fn block_chs(block: u8) -> (u8, u8) {
    let sector_index = block as usize * SECTORS_PER_BLOCK;
    let track = (sector_index / SECTORS_PER_TRACK) as u8;
    let sector_in_track = (sector_index % SECTORS_PER_TRACK) as u8;
    (track, 0xC1 + sector_in_track)
}

fn read_block(store: &dyn SectorStore, block: u8) -> Result<Vec<u8>, FsError> {
    let mut out = Vec::with_capacity(BLOCK_SIZE);
    let (track, first_sector_id) = block_chs(block);
    for s in 0..SECTORS_PER_BLOCK as u8 {
        let sector_id = first_sector_id + s;
        let t = store.track(0, track, 0).ok_or_else(|| fs_err("track not found"))?;
        let sector = t.sectors.iter().find(|s| s.record == sector_id)
            .ok_or_else(|| fs_err(format!("sector {:#04x} not found on track {}", sector_id, track)))?;
        out.extend_from_slice(&sector.data);
    }
    out.resize(BLOCK_SIZE, 0);
    Ok(out)
}

fn write_block(store: &mut dyn SectorStore, block: u8, data: &[u8]) -> Result<(), FsError> {
    let (track, first_sector_id) = block_chs(block);
    for s in 0..SECTORS_PER_BLOCK {
        let sector_id = first_sector_id + s as u8;
        let chunk_start = s * (BLOCK_SIZE / SECTORS_PER_BLOCK);
        let chunk_end = (chunk_start + BLOCK_SIZE / SECTORS_PER_BLOCK).min(data.len());
        let chunk = if chunk_start < data.len() { &data[chunk_start..chunk_end] } else { &[] };
        let t = store.track_mut(0, track, 0).ok_or_else(|| fs_err("track not found"))?;
        let sector = t.sectors.iter_mut().find(|s| s.record == sector_id)
            .ok_or_else(|| fs_err(format!("sector {:#04x} not found on track {}", sector_id, track)))?;
        sector.data.fill(0);
        sector.data[..chunk.len()].copy_from_slice(chunk);
    }
    Ok(())
}

/// Concatenates directory blocks 0 and 1 into a 2 KiB buffer.
pub fn read_directory_raw(store: &dyn SectorStore) -> Result<Vec<u8>, FsError> {
    let mut buf = Vec::with_capacity(BLOCK_SIZE * DIR_BLOCKS.len());
    for &b in &DIR_BLOCKS {
        buf.extend(read_block(store, b as u8)?);
    }
    Ok(buf)
}

fn parse_entries(raw: &[u8]) -> Vec<DirEntry> {
    (0..DIR_ENTRIES)
        .filter_map(|i| {
            let start = i * DIR_ENTRY_SIZE;
            let end = start + DIR_ENTRY_SIZE;
            raw.get(start..end).map(|slice| {
                let mut arr = [0u8; DIR_ENTRY_SIZE];
                arr.copy_from_slice(slice);
                DirEntry::from_bytes(&arr)
            })
        })
        .collect()
}

fn write_entries(entries: &[DirEntry]) -> Vec<u8> {
    let mut buf = vec![0u8; BLOCK_SIZE * DIR_BLOCKS.len()];
    for (i, e) in entries.iter().enumerate().take(DIR_ENTRIES) {
        let start = i * DIR_ENTRY_SIZE;
        buf[start..start + DIR_ENTRY_SIZE].copy_from_slice(&e.to_bytes());
    }
    buf
}

fn write_directory(store: &mut dyn SectorStore, entries: &[DirEntry]) -> Result<(), FsError> {
    let raw = write_entries(entries);
    for (i, &b) in DIR_BLOCKS.iter().enumerate() {
        let start = i * BLOCK_SIZE;
        write_block(store, b as u8, &raw[start..start + BLOCK_SIZE])?;
    }
    Ok(())
}

/// Groups entries by `(user, name.ext)`, keeping every extent's chain sorted
/// by extent number. Rejects duplicate lowest-extent entries for one file as
/// directory corruption rather than silently picking one.
fn group_by_file(entries: &[DirEntry]) -> Result<BTreeMap<(u8, String), Vec<usize>>, FsError> {
    let mut groups: BTreeMap<(u8, String), Vec<usize>> = BTreeMap::new();
    for (idx, e) in entries.iter().enumerate() {
        if e.deleted() || e.user > 15 { continue; }
        groups.entry((e.user, e.name_8_3())).or_default().push(idx);
    }
    for indices in groups.values_mut() {
        indices.sort_by_key(|&i| entries[i].extent_number());
    }
    for indices in groups.values() {
        let mut seen = std::collections::HashSet::new();
        for &i in indices {
            let ext = entries[i].extent_number();
            if !seen.insert(ext) {
                return Err(fs_err("directory corrupt: duplicate extent number for one file"));
            }
        }
    }
    Ok(groups)
}

fn file_size_bytes(entries: &[DirEntry], indices: &[usize]) -> u64 {
    let n = indices.len() as u64;
    let last = &entries[*indices.last().unwrap()];
    if n == 0 { return 0; }
    (n - 1) * EXTENT_SIZE as u64 + last.record_count as u64 * RECORD_SIZE as u64
}

/// Lists every non-deleted file, one entry per canonical (user, name).
pub fn list_files(store: &dyn SectorStore) -> Result<Vec<FileInfo>, FsError> {
    let raw = read_directory_raw(store)?;
    let entries = parse_entries(&raw);
    let groups = group_by_file(&entries)?;
    Ok(groups
        .into_iter()
        .map(|((user, name), indices)| FileInfo { user, name, size_bytes: file_size_bytes(&entries, &indices) })
        .collect())
}

/// Reads a file's full contents, following its extent chain in order and
/// truncating to the computed byte length.
pub fn read_file(store: &dyn SectorStore, user: u8, name: &str) -> Result<Vec<u8>, FsError> {
    let raw = read_directory_raw(store)?;
    let entries = parse_entries(&raw);
    let groups = group_by_file(&entries)?;
    let indices = groups.get(&(user, name.to_string()))
        .ok_or_else(|| fs_err(format!("file not found: {}", name)))?;

    let mut out = Vec::new();
    for &i in indices {
        let entry = &entries[i];
        for &block in entry.blocks.iter() {
            if block == 0 { break; } // blocks 0/1 are reserved for the directory, never a data block
            out.extend(read_block(store, block)?);
        }
    }
    let size = file_size_bytes(&entries, indices) as usize;
    out.truncate(size);
    Ok(out)
}

fn used_blocks(entries: &[DirEntry]) -> std::collections::HashSet<u8> {
    entries.iter()
        .filter(|e| !e.deleted() && e.user <= 15)
        .flat_map(|e| e.blocks.iter().copied())
        .filter(|&b| b != 0)
        .collect()
}

/// Writes a new file. Rejects on name collision, and fails atomically with a
/// descriptive message if free blocks or directory entries are exhausted.
pub fn write_file(store: &mut dyn SectorStore, user: u8, name: &str, data: &[u8]) -> Result<(), FsError> {
    let (stem, ext) = split_8_3(name)?;

    let raw = read_directory_raw(store)?;
    let mut entries = parse_entries(&raw);
    let groups = group_by_file(&entries)?;
    if groups.contains_key(&(user, name.to_string())) {
        return Err(fs_err(format!("file already exists: {}", name)));
    }

    let blocks_needed = (data.len() + BLOCK_SIZE - 1) / BLOCK_SIZE;
    let extents_needed = (blocks_needed + 15) / 16;

    let used = used_blocks(&entries);
    let free_blocks: Vec<u8> = (2..TOTAL_BLOCKS as u8).filter(|b| !used.contains(b)).collect();
    if free_blocks.len() < blocks_needed {
        return Err(fs_err("disc full"));
    }
    let free_entries: Vec<usize> = entries.iter().enumerate()
        .filter(|(_, e)| e.deleted())
        .map(|(i, _)| i)
        .collect();
    if free_entries.len() < extents_needed {
        return Err(fs_err("directory full"));
    }

    for (i, &block) in free_blocks.iter().take(blocks_needed).enumerate() {
        let start = i * BLOCK_SIZE;
        let end = (start + BLOCK_SIZE).min(data.len());
        let mut chunk = vec![0u8; BLOCK_SIZE];
        chunk[..end - start].copy_from_slice(&data[start..end]);
        write_block(store, block, &chunk)?;
    }

    let mut remaining = data.len();
    for extent_idx in 0..extents_needed {
        let entry_slot = free_entries[extent_idx];
        let block_start = extent_idx * 16;
        let block_end = (block_start + 16).min(blocks_needed);
        let mut blocks = [0u8; 16];
        for (j, b) in free_blocks[block_start..block_end].iter().enumerate() {
            blocks[j] = *b;
        }
        let bytes_this_extent = remaining.min(EXTENT_SIZE);
        remaining = remaining.saturating_sub(bytes_this_extent);
        let record_count = ((bytes_this_extent + RECORD_SIZE - 1) / RECORD_SIZE) as u8;
        entries[entry_slot] = DirEntry {
            user,
            name: pad8(&stem),
            ext: pad3(&ext),
            extent_low: (extent_idx as u8) & 0x1F,
            s1: 0,
            extent_high: (extent_idx >> 5) as u8,
            record_count,
            blocks,
        };
    }

    write_directory(store, &entries)
}

/// Flips byte 0 to the deleted marker on every extent of the named file.
pub fn delete_file(store: &mut dyn SectorStore, user: u8, name: &str) -> Result<(), FsError> {
    let raw = read_directory_raw(store)?;
    let mut entries = parse_entries(&raw);
    let groups = group_by_file(&entries)?;
    let indices = groups.get(&(user, name.to_string()))
        .ok_or_else(|| fs_err(format!("file not found: {}", name)))?
        .clone();
    for i in indices {
        entries[i].user = DELETED_MARKER;
    }
    write_directory(store, &entries)
}

fn split_8_3(name: &str) -> Result<(String, String), FsError> {
    let mut parts = name.splitn(2, '.');
    let stem = parts.next().unwrap_or("");
    let ext = parts.next().unwrap_or("");
    if stem.is_empty() || stem.len() > 8 || ext.len() > 3 {
        return Err(fs_err(format!("invalid 8.3 name: {}", name)));
    }
    Ok((stem.to_string(), ext.to_string()))
}

fn pad8(s: &str) -> [u8; 8] {
    let mut out = [b' '; 8];
    for (i, b) in s.bytes().take(8).enumerate() { out[i] = b; }
    out
}

fn pad3(s: &str) -> [u8; 3] {
    let mut out = [b' '; 3];
    for (i, b) in s.bytes().take(3).enumerate() { out[i] = b; }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpcemu_peripherals::fdc::Track;

    struct MemStore { tracks: Vec<Track> }

    impl MemStore {
        fn formatted() -> Self {
            // A freshly formatted CP/M disc has every directory (and, by
            // convention, data) byte set to the deleted marker.
            let tracks = (0..TRACK_COUNT as u8)
                .map(|cyl| Track {
                    sectors: (0..SECTORS_PER_TRACK as u8)
                        .map(|i| cpcemu_peripherals::fdc::Sector {
                            cylinder: cyl, head: 0, record: 0xC1 + i, size_code: 2, data: vec![DELETED_MARKER; 512],
                        })
                        .collect(),
                })
                .collect();
            MemStore { tracks }
        }
    }

    impl SectorStore for MemStore {
        fn track(&self, drive: u8, cylinder: u8, head: u8) -> Option<&Track> {
            if drive != 0 || head != 0 { return None; }
            self.tracks.get(cylinder as usize)
        }
        fn track_mut(&mut self, drive: u8, cylinder: u8, head: u8) -> Option<&mut Track> {
            if drive != 0 || head != 0 { return None; }
            self.tracks.get_mut(cylinder as usize)
        }
        fn cylinder_count(&self, _drive: u8) -> u8 { TRACK_COUNT as u8 }
        fn drive_present(&self, drive: u8) -> bool { drive == 0 }
        fn write_protected(&self, _drive: u8) -> bool { false }
    }

    #[test]
    fn write_then_read_back_small_file() {
        let mut store = MemStore::formatted();
        let payload = b"HELLO, CPC WORLD".to_vec();
        write_file(&mut store, 0, "HELLO.TXT", &payload).unwrap();
        let back = read_file(&store, 0, "HELLO.TXT").unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn list_files_reports_computed_size() {
        let mut store = MemStore::formatted();
        write_file(&mut store, 0, "A.BAS", &vec![1u8; 2000]).unwrap();
        let files = list_files(&store).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size_bytes, 2000);
    }

    #[test]
    fn delete_then_list_removes_only_that_file() {
        let mut store = MemStore::formatted();
        write_file(&mut store, 0, "A.BAS", &vec![1u8; 100]).unwrap();
        write_file(&mut store, 0, "B.BAS", &vec![2u8; 100]).unwrap();
        delete_file(&mut store, 0, "A.BAS").unwrap();
        let files = list_files(&store).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "B.BAS");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut store = MemStore::formatted();
        write_file(&mut store, 0, "A.BAS", &vec![1u8; 100]).unwrap();
        let err = write_file(&mut store, 0, "A.BAS", &vec![2u8; 100]).unwrap_err();
        assert!(err.0.contains("already exists"));
    }

    #[test]
    fn a_newly_formatted_disc_lists_no_files() {
        let store = MemStore::formatted();
        assert_eq!(list_files(&store).unwrap(), vec![]);
    }
}
