use bitfield_struct::bitfield;

/// Access rights of a mapping, laid out like the `PROT_*` bits of `mmap`.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct Protection {
    /// `PROT_READ` (bit 0).
    pub read: bool,
    /// `PROT_WRITE` (bit 1).
    pub write: bool,
    /// `PROT_EXEC` (bit 2).
    pub exec: bool,
    #[bits(5)]
    __: u8,
}

/// Sharing mode of a mapping, laid out like the `MAP_*` bits of `mmap`.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct MapFlags {
    /// `MAP_SHARED` (bit 0): stores reach the file.
    pub shared: bool,
    /// `MAP_PRIVATE` (bit 1): stores stay in the process.
    pub private: bool,
    #[bits(6)]
    __: u8,
}

/// One mapped region of a process address space.
///
/// `F` is the kernel's open-file handle; anonymous mappings have no file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmArea<F> {
    /// First mapped virtual address.
    pub addr: u64,
    /// Length in bytes.
    pub length: u64,
    pub prot: Protection,
    pub flags: MapFlags,
    /// Backing file, if any.
    pub file: Option<F>,
    /// File offset that `addr` maps.
    pub offset: u64,
}

impl<F> Default for VmArea<F> {
    fn default() -> Self {
        Self {
            addr: 0,
            length: 0,
            prot: Protection::new(),
            flags: MapFlags::new(),
            file: None,
            offset: 0,
        }
    }
}

impl<F> VmArea<F> {
    /// One past the last mapped address.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.addr.saturating_add(self.length)
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: u64) -> bool {
        va >= self.addr && va < self.end()
    }

    /// Whether `[addr, addr + length)` overlaps this area.
    #[must_use]
    pub const fn overlaps(&self, addr: u64, length: u64) -> bool {
        addr < self.end() && self.addr < addr.saturating_add(length)
    }

    /// File offset backing `va`, for file mappings that contain it.
    #[must_use]
    pub fn file_offset(&self, va: u64) -> Option<u64> {
        if self.file.is_none() || !self.contains(va) {
            return None;
        }
        Some(self.offset + (va - self.addr))
    }

    /// Whether unmapping has to write dirty pages back to the file.
    #[must_use]
    pub fn writes_back(&self) -> bool {
        self.file.is_some() && self.flags.shared() && self.prot.write()
    }
}
