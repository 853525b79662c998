use object::LittleEndian;

pub type Rel = object::elf::Rel64<LittleEndian>;
pub type Rela = object::elf::Rela64<LittleEndian>;

/// Names of sections that get special treatment.
pub(crate) mod secnames {
    pub(crate) const INIT: &[u8] = b".init";
    pub(crate) const FINI: &[u8] = b".fini";
}

/// Section flag bit values.
pub mod shf {
    use super::SectionFlags;

    pub const WRITE: SectionFlags = SectionFlags::from_u32(object::elf::SHF_WRITE);
    pub const ALLOC: SectionFlags = SectionFlags::from_u32(object::elf::SHF_ALLOC);
    pub const EXECINSTR: SectionFlags = SectionFlags::from_u32(object::elf::SHF_EXECINSTR);
    pub const MERGE: SectionFlags = SectionFlags::from_u32(object::elf::SHF_MERGE);
    pub const STRINGS: SectionFlags = SectionFlags::from_u32(object::elf::SHF_STRINGS);
    pub const TLS: SectionFlags = SectionFlags::from_u32(object::elf::SHF_TLS);
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SectionFlags(u32);

impl SectionFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_u32(raw: u32) -> SectionFlags {
        SectionFlags(raw)
    }

    pub fn contains(self, flag: SectionFlags) -> bool {
        self.0 & flag.0 != 0
    }

    /// Returns self with the specified flags set.
    #[must_use]
    pub const fn with(self, flags: SectionFlags) -> SectionFlags {
        SectionFlags(self.0 | flags.0)
    }

    /// Returns self with the specified flags cleared.
    #[must_use]
    pub const fn without(self, flags: SectionFlags) -> SectionFlags {
        SectionFlags(self.0 & !flags.0)
    }

    pub const fn raw(self) -> u64 {
        self.0 as u64
    }
}

impl From<u64> for SectionFlags {
    fn from(value: u64) -> Self {
        Self(value as u32)
    }
}

impl std::fmt::Display for SectionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.contains(shf::WRITE) {
            f.write_str("W")?;
        }
        if self.contains(shf::ALLOC) {
            f.write_str("A")?;
        }
        if self.contains(shf::EXECINSTR) {
            f.write_str("X")?;
        }
        if self.contains(shf::MERGE) {
            f.write_str("M")?;
        }
        if self.contains(shf::STRINGS) {
            f.write_str("S")?;
        }
        if self.contains(shf::TLS) {
            f.write_str("T")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SectionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

impl std::ops::BitOrAssign for SectionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A section's relocations. An object uses either implicit-addend (REL) or explicit-addend
/// (RELA) records; whichever it is, the form is fixed for all relocations of a section.
#[derive(Clone, Copy)]
pub enum RelocationList<'data> {
    Rel(&'data [Rel]),
    Rela(&'data [Rela]),
}

impl RelocationList<'_> {
    pub fn len(&self) -> usize {
        match self {
            RelocationList::Rel(entries) => entries.len(),
            RelocationList::Rela(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Uniform accessors over the two relocation record forms.
pub(crate) trait RelocationEntry: Copy {
    fn offset(&self) -> u64;

    fn rel_type(&self, mips64_el: bool) -> u32;

    fn symbol_index(&self, mips64_el: bool) -> u32;

    /// The explicit addend. REL-form addends live in the section bytes and aren't visible
    /// through this accessor.
    fn addend(&self) -> i64;
}

impl RelocationEntry for Rel {
    fn offset(&self) -> u64 {
        self.r_offset.get(LittleEndian)
    }

    // The scrambled MIPS64 r_info layout only occurs in RELA objects.
    fn rel_type(&self, _mips64_el: bool) -> u32 {
        self.r_type(LittleEndian)
    }

    fn symbol_index(&self, _mips64_el: bool) -> u32 {
        self.r_sym(LittleEndian)
    }

    fn addend(&self) -> i64 {
        0
    }
}

impl RelocationEntry for Rela {
    fn offset(&self) -> u64 {
        self.r_offset.get(LittleEndian)
    }

    fn rel_type(&self, mips64_el: bool) -> u32 {
        self.r_type(LittleEndian, mips64_el)
    }

    fn symbol_index(&self, mips64_el: bool) -> u32 {
        self.r_sym(LittleEndian, mips64_el)
    }

    fn addend(&self) -> i64 {
        self.r_addend.get(LittleEndian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_flags() {
        let flags = shf::ALLOC.with(shf::EXECINSTR);
        assert!(flags.contains(shf::ALLOC));
        assert!(flags.contains(shf::EXECINSTR));
        assert!(!flags.contains(shf::WRITE));
        assert_eq!(flags.without(shf::EXECINSTR), shf::ALLOC);
        assert_eq!(flags.to_string(), "AX");
    }

    #[test]
    fn test_relocation_entry_accessors() {
        let rela = Rela {
            r_offset: object::U64::new(LittleEndian, 0x10),
            r_info: object::U64::new(
                LittleEndian,
                (7 << 32) | u64::from(object::elf::R_X86_64_PC32),
            ),
            r_addend: object::I64::new(LittleEndian, -4),
        };
        assert_eq!(rela.offset(), 0x10);
        assert_eq!(rela.rel_type(false), object::elf::R_X86_64_PC32);
        assert_eq!(rela.symbol_index(false), 7);
        assert_eq!(rela.addend(), -4);

        let rel = Rel {
            r_offset: object::U64::new(LittleEndian, 0x20),
            r_info: object::U64::new(LittleEndian, (3 << 32) | u64::from(object::elf::R_386_32)),
        };
        assert_eq!(rel.offset(), 0x20);
        assert_eq!(rel.symbol_index(false), 3);
        assert_eq!(rel.addend(), 0);
    }
}
