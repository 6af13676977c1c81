//! # Boot Memory Map
//!
//! The boot loader describes physical memory as an ordered list of
//! `(base, length, type)` records. Only [`MemoryRegionType::Usable`] regions
//! contribute frames; everything else is left alone. Records are not
//! validated for overlap, the boot loader is trusted to produce a sane map.

/// Type of a memory map region, using the Multiboot numbering.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryRegionType {
    /// Available RAM (type 1).
    Usable,
    /// Reserved, unusable (type 2).
    Reserved,
    /// ACPI tables, reclaimable once parsed (type 3).
    AcpiReclaimable,
    /// ACPI non-volatile storage (type 4).
    AcpiNvs,
    /// Defective RAM (type 5).
    Defective,
    /// Anything else the firmware reports.
    Unknown(u32),
}

impl MemoryRegionType {
    #[must_use]
    pub const fn from_multiboot(value: u32) -> Self {
        match value {
            1 => Self::Usable,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::Defective,
            other => Self::Unknown(other),
        }
    }
}

/// One record of the boot memory map.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryMapEntry {
    pub base_address: u64,
    pub length: u64,
    pub region_type: MemoryRegionType,
}

impl MemoryMapEntry {
    #[must_use]
    pub const fn new(base_address: u64, length: u64, region_type: MemoryRegionType) -> Self {
        Self {
            base_address,
            length,
            region_type,
        }
    }

    #[must_use]
    pub const fn usable(base_address: u64, length: u64) -> Self {
        Self::new(base_address, length, MemoryRegionType::Usable)
    }

    /// Exclusive end of the region, saturating at the top of the 64-bit space.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base_address.saturating_add(self.length)
    }

    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self.region_type, MemoryRegionType::Usable)
    }
}

/// Error raised while walking a raw Multiboot memory map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryMapError {
    #[error("memory map record at byte {offset} is truncated")]
    Truncated { offset: usize },
    #[error("memory map record at byte {offset} declares size {size}, below the 20 byte minimum")]
    RecordTooSmall { offset: usize, size: u32 },
}

/// Reader over the raw Multiboot `mmap_addr`/`mmap_length` buffer.
///
/// Each record starts with a `size` field that does not count itself,
/// followed by `base_addr: u64`, `length: u64` and `type: u32`, all little
/// endian. The next record begins `size + 4` bytes later.
///
/// ```rust
/// # use kernel_info::boot::{MemoryRegionType, MultibootMemoryMap};
/// let mut raw = Vec::new();
/// raw.extend_from_slice(&20u32.to_le_bytes());
/// raw.extend_from_slice(&0x10_0000u64.to_le_bytes());
/// raw.extend_from_slice(&0x1_0000u64.to_le_bytes());
/// raw.extend_from_slice(&1u32.to_le_bytes());
///
/// let entries: Vec<_> = MultibootMemoryMap::new(&raw).collect();
/// assert_eq!(entries.len(), 1);
/// let entry = entries[0].unwrap();
/// assert_eq!(entry.base_address, 0x10_0000);
/// assert_eq!(entry.region_type, MemoryRegionType::Usable);
/// ```
#[derive(Debug, Clone)]
pub struct MultibootMemoryMap<'a> {
    raw: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> MultibootMemoryMap<'a> {
    /// Smallest legal value of a record's `size` field.
    pub const MIN_RECORD_SIZE: u32 = 20;

    #[must_use]
    pub const fn new(raw: &'a [u8]) -> Self {
        Self {
            raw,
            offset: 0,
            failed: false,
        }
    }

    fn read_u32(&self, at: usize) -> Option<u32> {
        let bytes = self.raw.get(at..at.checked_add(4)?)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    fn read_u64(&self, at: usize) -> Option<u64> {
        let bytes = self.raw.get(at..at.checked_add(8)?)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    fn parse_at(&self, offset: usize) -> Result<(MemoryMapEntry, usize), MemoryMapError> {
        let truncated = MemoryMapError::Truncated { offset };
        let size = self.read_u32(offset).ok_or(truncated)?;
        if size < Self::MIN_RECORD_SIZE {
            return Err(MemoryMapError::RecordTooSmall { offset, size });
        }

        let base_address = self.read_u64(offset + 4).ok_or(truncated)?;
        let length = self.read_u64(offset + 12).ok_or(truncated)?;
        let region_type = self.read_u32(offset + 20).ok_or(truncated)?;

        let next = offset
            .checked_add(size as usize)
            .and_then(|n| n.checked_add(4))
            .ok_or(truncated)?;
        let entry = MemoryMapEntry::new(
            base_address,
            length,
            MemoryRegionType::from_multiboot(region_type),
        );
        Ok((entry, next))
    }
}

impl Iterator for MultibootMemoryMap<'_> {
    type Item = Result<MemoryMapEntry, MemoryMapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.raw.len() {
            return None;
        }

        match self.parse_at(self.offset) {
            Ok((entry, next)) => {
                self.offset = next;
                Some(Ok(entry))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
