//! The Amstrad CPC memory map: four switchable 16 KiB slots backed by
//! base RAM, expansion RAM, lower/upper ROM and the Multiface-2 overlay.
use core::fmt;

/// Size of a single memory slot / physical RAM or ROM bank.
pub const BANK_SIZE: usize = 0x4000;
/// Number of base RAM banks present on a 6128 (128 KiB).
pub const BASE_RAM_BANKS: usize = 8;
/// Number of addressable slots the Z80 sees (`address >> 14`).
pub const SLOT_COUNT: usize = 4;
/// Size of one upper-ROM slot.
pub const ROM_SLOT_SIZE: usize = 0x4000;
/// Number of selectable upper-ROM slots (the expansion ROM index space is a full byte).
pub const UPPER_ROM_SLOTS: usize = 256;
/// Size of the Multiface-2 ROM/RAM overlay halves.
pub const MF2_HALF_SIZE: usize = 0x2000;

/// The 8 fixed RAM bank quadruplets selected by the gate array's 3-bit `RAM_config`.
///
/// Each row names, for slots 0..3, the base-RAM bank number (0..7) that is mapped in
/// when the expansion-bank selector is zero. See [`MemoryMap::reconfigure`].
pub const RAM_CONFIGS: [[u8; 4]; 8] = [
    [0, 1, 2, 3],
    [0, 1, 2, 7],
    [4, 5, 6, 7],
    [0, 3, 2, 7],
    [0, 4, 2, 3],
    [0, 5, 2, 3],
    [0, 6, 2, 3],
    [0, 7, 2, 3],
];

/// How the gate array's 6-bit extended bank selector (`RAM_ext`) should be interpreted.
///
/// This is an [OPEN Design Note][crate] item: the source computes the extended bank number
/// from inverted port address bits, which is only documented for the Yarek 4 MiB extension.
/// We default to the conservative standard interpretation and fall back to configuration 0
/// for anything the current mode doesn't recognize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RamExtMode {
    /// Only the low 3 bits of `RAM_ext` select one of 8 extra 128 KiB pages (the common,
    /// well-documented 576 KiB expansion).
    Standard576k,
    /// All 6 bits of `RAM_ext` select one of 64 extra 128 KiB pages (Yarek 4 MiB extension).
    Yarek4M,
}

impl Default for RamExtMode {
    fn default() -> Self { RamExtMode::Standard576k }
}

/// A weak reference into one of the machine's owned memory buffers: `(buffer, offset)`.
///
/// Slots never point directly at host memory; they always resolve through this handle,
/// which keeps the borrow checker honest and makes `reconfigure()` a cheap recomputation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BankRef {
    BaseRam(u8),
    ExpansionRam(u16),
    LowerRom,
    UpperRom(u8),
    Mf2Rom,
    Mf2Ram,
    /// A fixed scratch page: writes here are discarded without faulting.
    Scratch,
}

#[derive(Debug)]
pub struct RomInventory {
    pub lower: Option<Box<[u8; BANK_SIZE]>>,
    pub upper: Vec<Option<Box<[u8; ROM_SLOT_SIZE]>>>,
    pub selected_upper: u8,
}

impl Default for RomInventory {
    fn default() -> Self {
        let mut upper = Vec::with_capacity(UPPER_ROM_SLOTS);
        upper.resize_with(UPPER_ROM_SLOTS, || None);
        RomInventory { lower: None, upper, selected_upper: 0 }
    }
}

impl RomInventory {
    pub fn load_lower(&mut self, data: &[u8]) -> Result<(), MemoryError> {
        if data.len() != BANK_SIZE {
            return Err(MemoryError::InvalidRomSize);
        }
        let mut buf = Box::new([0u8; BANK_SIZE]);
        buf.copy_from_slice(data);
        self.lower = Some(buf);
        Ok(())
    }

    pub fn load_upper(&mut self, slot: u8, data: &[u8]) -> Result<(), MemoryError> {
        if data.len() != ROM_SLOT_SIZE {
            return Err(MemoryError::InvalidRomSize);
        }
        let mut buf = Box::new([0u8; ROM_SLOT_SIZE]);
        buf.copy_from_slice(data);
        self.upper[slot as usize] = Some(buf);
        Ok(())
    }

    /// Returns the currently selected upper ROM, falling back to slot 0 (BASIC) when the
    /// selected slot is empty, per §4.1 rule 4.
    pub fn active_upper(&self) -> Option<&[u8; ROM_SLOT_SIZE]> {
        self.upper[self.selected_upper as usize].as_deref()
            .or_else(|| self.upper[0].as_deref())
    }
}

#[derive(Debug)]
pub enum MemoryError {
    InvalidRomSize,
    InvalidBankIndex,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::InvalidRomSize => write!(f, "ROM image has the wrong size"),
            MemoryError::InvalidBankIndex => write!(f, "bank index out of range"),
        }
    }
}

/// Multiface-2 cartridge overlay: an 8 KiB ROM mapped into the lower-ROM slot and an
/// 8 KiB RAM mapped into the upper half of slot 0 while paged in.
#[derive(Debug, Default)]
pub struct Mf2Overlay {
    pub rom: Box<[u8]>,
    pub ram: Box<[u8]>,
    pub active: bool,
}

impl Mf2Overlay {
    pub fn new() -> Self {
        Mf2Overlay {
            rom: vec![0u8; MF2_HALF_SIZE].into_boxed_slice(),
            ram: vec![0u8; MF2_HALF_SIZE].into_boxed_slice(),
            active: false,
        }
    }
}

/// Latched gate-array state that influences the memory map. Owned by the caller (typically
/// the gate array module); `MemoryMap::reconfigure` takes a snapshot of it each time it's called.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryMapInputs {
    /// Gate array `RAM_config` byte (only the low 6 bits are meaningful).
    pub ram_config: u8,
    /// Gate array 6-bit extended bank selector (`RAM_ext`).
    pub ram_ext: u8,
    /// `ROM_config` bit 2: lower ROM disabled when set.
    pub lower_rom_disabled: bool,
    /// `ROM_config` bit 3: upper ROM disabled when set.
    pub upper_rom_disabled: bool,
    /// 6128+ register-page flag: maps a register page into slot 1.
    pub register_page: bool,
    /// RMR2 lower-ROM overlay slot selector (6128+ only), in 0..=3.
    pub lower_rom_slot: u8,
}

/// The full CPC memory map: four read slots, four write slots, each resolved to a
/// physical buffer reference. Call [`reconfigure`][Self::reconfigure] whenever any of
/// the gate array's memory-affecting registers change.
pub struct MemoryMap {
    pub base_ram: Vec<[u8; BANK_SIZE]>,
    pub expansion_ram: Vec<[u8; BANK_SIZE]>,
    pub rom: RomInventory,
    pub mf2: Mf2Overlay,
    pub ram_ext_mode: RamExtMode,
    read_slots: [BankRef; SLOT_COUNT],
    write_slots: [BankRef; SLOT_COUNT],
    scratch: [u8; BANK_SIZE],
    inputs: MemoryMapInputs,
}

impl fmt::Debug for MemoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMap")
            .field("read_slots", &self.read_slots)
            .field("write_slots", &self.write_slots)
            .field("inputs", &self.inputs)
            .finish()
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        let mut base_ram = Vec::with_capacity(BASE_RAM_BANKS);
        base_ram.resize_with(BASE_RAM_BANKS, || [0u8; BANK_SIZE]);
        let mut mm = MemoryMap {
            base_ram,
            expansion_ram: Vec::new(),
            rom: RomInventory::default(),
            mf2: Mf2Overlay::new(),
            ram_ext_mode: RamExtMode::default(),
            read_slots: [BankRef::Scratch; SLOT_COUNT],
            write_slots: [BankRef::Scratch; SLOT_COUNT],
            scratch: [0u8; BANK_SIZE],
            inputs: MemoryMapInputs::default(),
        };
        mm.reconfigure(MemoryMapInputs::default());
        mm
    }
}

impl MemoryMap {
    /// Grows the expansion RAM pool to hold at least `banks` 16 KiB banks.
    pub fn ensure_expansion_banks(&mut self, banks: usize) {
        if self.expansion_ram.len() < banks {
            self.expansion_ram.resize_with(banks, || [0u8; BANK_SIZE]);
        }
    }

    fn extended_bank_base(&self) -> u8 {
        match self.ram_ext_mode {
            RamExtMode::Standard576k => self.inputs.ram_ext & 0x7,
            RamExtMode::Yarek4M => self.inputs.ram_ext & 0x3F,
        }
    }

    fn physical_base_bank(&self, base_bank: u8) -> BankRef {
        let ext = self.extended_bank_base();
        if ext == 0 {
            return BankRef::BaseRam(base_bank);
        }
        let index = ext as u16 * 8 + base_bank as u16;
        if (index as usize) < self.expansion_ram.len() + BASE_RAM_BANKS {
            // banks 0..7 of extension page 0 alias the base RAM; anything beyond that
            // (page >= 1) lives in the expansion pool at `index - 8`.
            BankRef::ExpansionRam(index - BASE_RAM_BANKS as u16)
        } else {
            // Out-of-range selector: fall back to plain base RAM, per the OPEN design note.
            BankRef::BaseRam(base_bank)
        }
    }

    /// Recomputes all four read/write slot pointers from the current inputs and overlay
    /// state. Cheap: a handful of comparisons and array writes, safe to call after every
    /// `OUT` that can alter the map.
    pub fn reconfigure(&mut self, inputs: MemoryMapInputs) {
        self.inputs = inputs;
        let config_index = (inputs.ram_config & 0x7) as usize;
        let quad = RAM_CONFIGS[config_index];

        for slot in 0..SLOT_COUNT {
            let base = self.physical_base_bank(quad[slot]);
            self.read_slots[slot] = base;
            self.write_slots[slot] = base;
        }

        // Lower ROM overlay (priority 2/3: MF2 takes priority, handled below).
        if !inputs.lower_rom_disabled {
            let slot = inputs.lower_rom_slot.min(3) as usize;
            self.read_slots[slot] = BankRef::LowerRom;
            self.write_slots[slot] = self.write_slots[slot]; // ROM writes fall through to RAM beneath
        }

        // 6128+ register page into slot 1 (modeled as a scratch page; the register file
        // itself is owned by the gate array, which intercepts reads before memory is hit).
        if inputs.register_page {
            self.read_slots[1] = BankRef::Scratch;
        }

        // Upper ROM overlay into slot 3.
        if !inputs.upper_rom_disabled {
            let slot_idx = self.rom.selected_upper;
            let exists = self.rom.upper[slot_idx as usize].is_some() || self.rom.upper[0].is_some();
            if exists {
                self.read_slots[3] = BankRef::UpperRom(slot_idx);
            }
        }

        // Multiface-2 overlay takes top priority over everything above.
        if self.mf2.active {
            self.read_slots[0] = BankRef::Mf2Rom;
            self.write_slots[0] = BankRef::Mf2Rom;
            // The cartridge's own RAM occupies the upper 8 KiB while paged in; we model
            // this with a second logical slot check in read8/write8 rather than a fifth
            // slot, since MF2 RAM only covers half of slot 0's address range.
        }
    }

    #[inline]
    fn slot_of(address: u16) -> usize {
        (address >> 14) as usize
    }

    pub fn read8(&self, address: u16) -> u8 {
        let slot = Self::slot_of(address);
        let offset = (address & 0x3FFF) as usize;
        if self.mf2.active && slot == 0 {
            if offset >= MF2_HALF_SIZE {
                return self.mf2.ram[offset - MF2_HALF_SIZE];
            }
            return self.mf2.rom[offset];
        }
        self.read_bank(self.read_slots[slot], offset)
    }

    pub fn write8(&mut self, address: u16, value: u8) {
        let slot = Self::slot_of(address);
        let offset = (address & 0x3FFF) as usize;
        if self.mf2.active && slot == 0 {
            if offset >= MF2_HALF_SIZE {
                self.mf2.ram[offset - MF2_HALF_SIZE] = value;
            }
            // writes to the ROM half of the MF2 overlay are discarded
            return;
        }
        match self.write_slots[slot] {
            BankRef::BaseRam(bank) => self.base_ram[bank as usize][offset] = value,
            BankRef::ExpansionRam(bank) => self.expansion_ram[bank as usize][offset] = value,
            // ROM-mapped write targets silently discard rather than fault.
            BankRef::LowerRom | BankRef::UpperRom(_) | BankRef::Mf2Rom | BankRef::Scratch => {}
            BankRef::Mf2Ram => self.mf2.ram[offset % MF2_HALF_SIZE] = value,
        }
    }

    fn read_bank(&self, bank: BankRef, offset: usize) -> u8 {
        match bank {
            BankRef::BaseRam(b) => self.base_ram[b as usize][offset],
            BankRef::ExpansionRam(b) => self.expansion_ram.get(b as usize)
                .map(|buf| buf[offset]).unwrap_or(0xFF),
            BankRef::LowerRom => self.rom.lower.as_ref().map(|b| b[offset]).unwrap_or(0xFF),
            BankRef::UpperRom(slot) => {
                self.rom.upper[slot as usize].as_deref()
                    .or_else(|| self.rom.upper[0].as_deref())
                    .map(|b| b[offset]).unwrap_or(0xFF)
            }
            BankRef::Mf2Rom => self.mf2.rom[offset % MF2_HALF_SIZE],
            BankRef::Mf2Ram => self.mf2.ram[offset % MF2_HALF_SIZE],
            BankRef::Scratch => self.scratch[offset],
        }
    }

    /// Exposes the current slot mapping, mostly for tests and debugger surfaces.
    pub fn read_slot_refs(&self) -> &[BankRef; SLOT_COUNT] { &self.read_slots }
    pub fn write_slot_refs(&self) -> &[BankRef; SLOT_COUNT] { &self.write_slots }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_slots_non_null_for_every_ram_config() {
        let mut mm = MemoryMap::default();
        for cfg in 0..8u8 {
            mm.reconfigure(MemoryMapInputs { ram_config: cfg, ..Default::default() });
            for slot in 0..SLOT_COUNT {
                // Every slot resolves to a real buffer; read8/write8 never panic.
                let addr = (slot as u16) << 14;
                let _ = mm.read8(addr);
                mm.write8(addr, 0x55);
            }
        }
    }

    #[test]
    fn rom_write_is_discarded_without_fault() {
        let mut mm = MemoryMap::default();
        mm.rom.load_lower(&[0xAAu8; BANK_SIZE]).unwrap();
        mm.reconfigure(MemoryMapInputs::default());
        assert_eq!(mm.read8(0x0000), 0xAA);
        mm.write8(0x0000, 0x11);
        assert_eq!(mm.read8(0x0000), 0xAA);
    }

    #[test]
    fn expansion_bank_reconfiguration_scenario() {
        // Scenario 2: start from RAM_config 0 (all base RAM), OUT 0xC4 selects config 4,
        // whose slot 3 maps to base bank 3; with an extended page selected it must move
        // into the expansion pool.
        let mut mm = MemoryMap::default();
        mm.ensure_expansion_banks(32);
        mm.reconfigure(MemoryMapInputs { ram_config: 0, ..Default::default() });
        assert_eq!(mm.read_slot_refs()[3], BankRef::BaseRam(3));

        mm.reconfigure(MemoryMapInputs { ram_config: 0xC4 & 0x7, ram_ext: 1, ..Default::default() });
        match mm.read_slot_refs()[3] {
            BankRef::ExpansionRam(_) => {}
            other => panic!("expected expansion bank, got {:?}", other),
        }
    }
}
