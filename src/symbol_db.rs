//! The linker's view of symbols after resolution. Each input file's symbols occupy a
//! contiguous range of global symbol IDs, and resolution has recorded, for every symbol,
//! which symbol ends up defining it. Folding only needs two things from all this: whether
//! two relocations resolve to the same symbol, and where a defined symbol points.

use crate::alignment::Alignment;
use crate::section::InputSectionId;

/// Identifies an input object file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u32);

impl FileId {
    pub(crate) fn from_usize(raw: usize) -> Self {
        Self(u32::try_from(raw).expect("File IDs overflowed 32 bits"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Identifies a symbol in the global symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    pub(crate) fn from_usize(raw: usize) -> Self {
        Self(u32::try_from(raw).expect("Symbol IDs overflowed 32 bits"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The range of global symbol IDs assigned to one input file. A file's local symbol
/// indices map onto the range in order.
#[derive(Debug, Clone, Copy)]
pub struct SymbolIdRange {
    start: SymbolId,
    num_symbols: u32,
}

impl SymbolIdRange {
    pub fn len(&self) -> usize {
        self.num_symbols as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_symbols == 0
    }

    pub fn input_to_id(self, local_index: u32) -> SymbolId {
        debug_assert!(local_index < self.num_symbols);
        SymbolId(self.start.0 + local_index)
    }
}

/// What a symbol resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolValue {
    /// Defined at `value` bytes into `section`.
    Regular {
        section: InputSectionId,
        value: u64,
    },

    /// An absolute address that layout won't move.
    Absolute(u64),

    /// A tentative definition. Space gets allocated for it during layout.
    Common { size: u64, alignment: Alignment },

    /// Defined by a shared object.
    Dynamic,

    Undefined,
}

/// The symbol table after resolution.
#[derive(Default)]
pub struct SymbolDb {
    /// For each symbol, the symbol that resolution selected as its definition. A symbol
    /// that nothing overrides is its own definition.
    definitions: Vec<SymbolId>,

    values: Vec<SymbolValue>,

    /// Indexed by `FileId`.
    file_ranges: Vec<SymbolIdRange>,
}

impl SymbolDb {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a file with `num_symbols` symbols. Each starts out as its own definition
    /// with no value.
    pub fn add_file(&mut self, num_symbols: usize) -> FileId {
        let file_id = FileId::from_usize(self.file_ranges.len());
        let start = SymbolId::from_usize(self.definitions.len());
        self.file_ranges.push(SymbolIdRange {
            start,
            num_symbols: u32::try_from(num_symbols).expect("Symbol IDs overflowed 32 bits"),
        });
        self.definitions
            .extend((0..num_symbols).map(|offset| SymbolId(start.0 + offset as u32)));
        self.values
            .resize(self.values.len() + num_symbols, SymbolValue::Undefined);
        file_id
    }

    pub fn symbol_id_range(&self, file_id: FileId) -> SymbolIdRange {
        self.file_ranges[file_id.as_usize()]
    }

    /// Records the value of the symbol `id`.
    pub fn define(&mut self, id: SymbolId, value: SymbolValue) {
        self.values[id.as_usize()] = value;
    }

    /// Points `id` at the symbol that resolution selected to define it.
    pub fn set_definition(&mut self, id: SymbolId, definition: SymbolId) {
        self.definitions[id.as_usize()] = definition;
    }

    pub fn definition(&self, id: SymbolId) -> SymbolId {
        self.definitions[id.as_usize()]
    }

    pub fn value(&self, id: SymbolId) -> SymbolValue {
        self.values[id.as_usize()]
    }

    /// Resolves a relocation from `file_id` to the symbol that defines its target.
    pub(crate) fn resolve(&self, file_id: FileId, local_index: u32) -> SymbolId {
        self.definition(self.symbol_id_range(file_id).input_to_id(local_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_indices_map_onto_global_ids() {
        let mut db = SymbolDb::new();
        let file_a = db.add_file(3);
        let file_b = db.add_file(2);

        let a2 = db.symbol_id_range(file_a).input_to_id(2);
        let b0 = db.symbol_id_range(file_b).input_to_id(0);
        assert_eq!(a2.as_usize(), 2);
        assert_eq!(b0.as_usize(), 3);
        assert_eq!(db.symbol_id_range(file_b).len(), 2);
    }

    #[test]
    fn test_resolution_follows_definitions() {
        let mut db = SymbolDb::new();
        let file_a = db.add_file(1);
        let file_b = db.add_file(1);

        let def = db.symbol_id_range(file_a).input_to_id(0);
        let reference = db.symbol_id_range(file_b).input_to_id(0);
        db.define(def, SymbolValue::Absolute(0x1000));
        db.set_definition(reference, def);

        assert_eq!(db.resolve(file_b, 0), def);
        assert_eq!(db.value(db.resolve(file_b, 0)), SymbolValue::Absolute(0x1000));
    }
}
