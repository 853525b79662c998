use crate::alignment::Alignment;
use crate::elf::RelocationList;
use crate::elf::SectionFlags;
use crate::symbol_db::FileId;
use std::borrow::Cow;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

/// An index into the linker's table of input sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputSectionId(u32);

impl InputSectionId {
    pub(crate) fn from_usize(raw: usize) -> Self {
        Self(u32::try_from(raw).expect("Section IDs overflowed 32 bits"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for InputSectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// A section from an input object, together with the state that folding maintains for it.
/// Created by the input-loading phase. Once folding has run, the only fields that have
/// changed are the class-id slots and the replacement slot.
pub struct InputSection<'data> {
    pub name: &'data [u8],
    pub flags: SectionFlags,
    pub alignment: Alignment,
    pub data: &'data [u8],
    pub relocations: RelocationList<'data>,

    /// The file the section came from. Relocation symbol indices are local to this file.
    pub file_id: FileId,

    /// Whether an earlier reachability pass decided to keep the section.
    pub live: bool,

    /// The section's equivalence class, double buffered. During a sweep, one slot is a
    /// read-only snapshot that all workers consult while freshly allocated ids go to the
    /// other slot, so disjoint ranges of sections can be refined concurrently.
    class_id: [AtomicU32; 2],

    /// The section that references to this one should resolve to. Points at the section
    /// itself until folding redirects it to a class representative. Symbols reach their
    /// section through this slot, so the single write reroutes all of them at once.
    replacement: AtomicU32,
}

impl<'data> InputSection<'data> {
    pub fn new(
        name: &'data [u8],
        flags: SectionFlags,
        alignment: Alignment,
        data: &'data [u8],
        relocations: RelocationList<'data>,
        file_id: FileId,
        live: bool,
    ) -> Self {
        Self {
            name,
            flags,
            alignment,
            data,
            relocations,
            file_id,
            live,
            class_id: [AtomicU32::new(0), AtomicU32::new(0)],
            replacement: AtomicU32::new(u32::MAX),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub(crate) fn class_id(&self, slot: usize) -> u32 {
        self.class_id[slot].load(Ordering::Relaxed)
    }

    pub(crate) fn set_class_id(&self, slot: usize, class_id: u32) {
        self.class_id[slot].store(class_id, Ordering::Relaxed);
    }

    pub(crate) fn replacement(&self) -> InputSectionId {
        InputSectionId(self.replacement.load(Ordering::Relaxed))
    }

    pub(crate) fn set_replacement(&self, id: InputSectionId) {
        self.replacement.store(id.0, Ordering::Relaxed);
    }
}

/// All sections from all input objects, in the order the objects were loaded.
#[derive(Default)]
pub struct InputSectionTable<'data> {
    sections: Vec<InputSection<'data>>,
}

impl<'data> InputSectionTable<'data> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `section`, with its replacement slot pointing at itself.
    pub fn add(&mut self, section: InputSection<'data>) -> InputSectionId {
        let id = InputSectionId::from_usize(self.sections.len());
        section.replacement.store(id.0, Ordering::Relaxed);
        self.sections.push(section);
        id
    }

    pub fn section(&self, id: InputSectionId) -> &InputSection<'data> {
        &self.sections[id.as_usize()]
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = InputSectionId> {
        (0..self.sections.len()).map(InputSectionId::from_usize)
    }

    /// Returns the section that references to `id` now resolve to: `id` itself, or the
    /// representative of the class that `id` was folded into.
    pub fn primary(&self, id: InputSectionId) -> InputSectionId {
        self.section(id).replacement()
    }

    pub fn display_name(&self, id: InputSectionId) -> Cow<'_, str> {
        String::from_utf8_lossy(self.section(id).name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::shf;

    fn section(name: &'static str) -> InputSection<'static> {
        InputSection::new(
            name.as_bytes(),
            shf::ALLOC,
            Alignment::new(1).unwrap(),
            &[],
            RelocationList::Rela(&[]),
            FileId::from_usize(0),
            true,
        )
    }

    #[test]
    fn test_replacement_starts_self_pointing() {
        let mut table = InputSectionTable::new();
        let a = table.add(section(".text.a"));
        let b = table.add(section(".text.b"));
        assert_eq!(table.primary(a), a);
        assert_eq!(table.primary(b), b);

        table.section(b).set_replacement(a);
        assert_eq!(table.primary(b), a);
        assert_eq!(table.primary(a), a);
        assert_eq!(table.display_name(b), ".text.b");
    }
}
