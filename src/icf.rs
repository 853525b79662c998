//! Identical code folding. Merges read-only input sections whose contents and outgoing
//! references are indistinguishable, so that the output file carries a single copy.
//! Template instantiation and generic monomorphisation produce a lot of such sections, so
//! this can shrink executables considerably. Matching is by content, which is what
//! separates this from comdat handling, where sections are merged by name.
//!
//! Two sections can only be equal if their "constant" parts match: flags, size, bytes and
//! the offset, type and addend of each relocation. That check doesn't depend on what the
//! relocations point at, so it runs once. The hard part is the "variable" half. Two
//! functions that call each other are still mergeable with another such pair, which means
//! equality of relocation targets has to be decided in terms of equivalence classes rather
//! than concrete sections. We optimistically over-group sections using a cheap hash, then
//! repeatedly split classes whose members disagree about the classes of their relocation
//! targets. A class can split but two classes never merge, so the refinement reaches a
//! fixed point. Cycles in the reference graph need no special treatment because the
//! predicate consults class ids, which are plain data, instead of following references.
//!
//! The candidate vector is kept sorted by class id, so a class is always a contiguous
//! range and ranges can be refined on separate threads. Each section carries two class-id
//! slots used as a double buffer: within a sweep, every worker reads one slot while ids
//! allocated by splits are written to the other, and newly written ids are promoted to
//! both slots between sweeps. The only state shared between workers is the serial-id
//! allocator and the list of ranges that splits created, both behind a single mutex that
//! is never held while a comparison runs.

use crate::args::Args;
use crate::elf::RelocationEntry;
use crate::elf::RelocationList;
use crate::elf::secnames;
use crate::elf::shf;
use crate::error::Result;
use crate::hash;
use crate::section::InputSection;
use crate::section::InputSectionId;
use crate::section::InputSectionTable;
use crate::symbol_db::SymbolDb;
use crate::symbol_db::SymbolValue;
use rayon::iter::IntoParallelIterator;
use rayon::iter::ParallelIterator;
use std::mem::take;
use std::sync::Mutex;

/// Class ids seeded from hashes have this bit set. Serial ids allocated during segregation
/// start from 1 and never set it, so the two kinds can't collide.
const HASH_CLASS_BIT: u32 = 1 << 31;

/// Folds all eligible sections in `sections`. On return, each folded section's replacement
/// slot points at the representative of its class; nothing else about the sections has
/// changed. The caller should only run this after symbol resolution has populated
/// `symbol_db` and a reachability pass has set the `live` flags.
#[tracing::instrument(skip_all, name = "Icf")]
pub fn fold_identical_sections(
    sections: &InputSectionTable,
    symbol_db: &SymbolDb,
    args: &Args,
) -> Result {
    Icf {
        sections,
        symbol_db,
        args,
        state: Mutex::new(SweepState {
            next_id: 1,
            new_ranges: Vec::new(),
        }),
        pass: 0,
        sequential: args.available_threads().get() == 1,
    }
    .run()
}

struct Icf<'a, 'data> {
    sections: &'a InputSectionTable<'data>,
    symbol_db: &'a SymbolDb,
    args: &'a Args,

    state: Mutex<SweepState>,

    /// Number of completed sweeps. Selects which class-id slot is read and which is
    /// written during the current sweep.
    pass: usize,

    sequential: bool,
}

struct SweepState {
    next_id: u32,
    new_ranges: Vec<ClassRange>,
}

/// A half-open interval of indices into the sorted candidate vector. All sections within a
/// range share a class id.
#[derive(Debug, Clone, Copy)]
struct ClassRange {
    begin: usize,
    end: usize,
}

impl ClassRange {
    fn len(self) -> usize {
        self.end - self.begin
    }
}

impl Icf<'_, '_> {
    fn run(mut self) -> Result {
        // Class id 0 marks sections that aren't candidates, including sections an earlier
        // run folded away. Ids from an earlier run must not survive into this one, where
        // they could alias freshly allocated ids.
        for id in self.sections.ids() {
            let section = self.sections.section(id);
            section.set_class_id(0, 0);
            section.set_class_id(1, 0);
        }

        let mut candidates = self.gather_candidates();

        // Seed both class-id slots with a cheap over-approximation of equality. Hash
        // collisions cost comparisons, not correctness, since the content pass below
        // compares full contents.
        for &id in &candidates {
            let section = self.sections.section(id);
            let class_id = initial_class_id(section);
            section.set_class_id(0, class_id);
            section.set_class_id(1, class_id);
        }

        // Sort so that sections with the same class id are contiguous. Within a class, put
        // the highest alignment requirement first; the section at the front of a range is
        // the one that survives folding, and it must be able to stand in for the others.
        candidates.sort_by_key(|&id| {
            let section = self.sections.section(id);
            (section.class_id(0), std::cmp::Reverse(section.alignment))
        });

        let ranges = self.initial_ranges(&candidates);

        // Contents and flags don't change, so one pass of content comparison suffices.
        let (mut ranges, _) = self.sweep(&mut candidates, ranges, true);
        self.pass += 1;

        // Split classes whose members disagree about the classes of their relocation
        // targets, until a full sweep splits nothing.
        let mut iterations = 1;
        loop {
            iterations += 1;
            let (next_ranges, split_any) = self.sweep(&mut candidates, ranges, false);
            self.pass += 1;
            ranges = next_ranges;
            if !split_any {
                break;
            }
        }
        tracing::debug!("ICF needed {iterations} iterations");
        if self.args.print_icf_sections {
            println!("ICF needed {iterations} iterations");
        }

        self.fold(&candidates, &ranges);
        Ok(())
    }

    fn gather_candidates(&self) -> Vec<InputSectionId> {
        self.sections
            .ids()
            .filter(|&id| is_eligible(self.sections, id))
            .collect()
    }

    /// Builds the list of ranges of candidates that share a seed class id. Singleton
    /// classes can neither fold nor split, so they are left out.
    fn initial_ranges(&self, candidates: &[InputSectionId]) -> Vec<ClassRange> {
        let mut ranges = Vec::new();
        let mut begin = 0;
        while begin < candidates.len() {
            let class_id = self.sections.section(candidates[begin]).class_id(0);
            let mut end = begin + 1;
            while end < candidates.len()
                && self.sections.section(candidates[end]).class_id(0) == class_id
            {
                end += 1;
            }
            if end - begin >= 2 {
                ranges.push(ClassRange { begin, end });
            }
            begin = end;
        }
        ranges
    }

    /// Segregates every range once, then promotes the class ids that splits assigned so
    /// the next sweep can read them through either slot. Returns the ranges to process in
    /// the next sweep and whether anything split.
    fn sweep(
        &self,
        candidates: &mut [InputSectionId],
        ranges: Vec<ClassRange>,
        use_constant: bool,
    ) -> (Vec<ClassRange>, bool) {
        let work = split_by_range(candidates, &ranges);

        let mut next_ranges: Vec<ClassRange> = if self.sequential {
            work.into_iter()
                .map(|(range, slice)| self.segregate(range, slice, use_constant))
                .collect()
        } else {
            work.into_par_iter()
                .map(|(range, slice)| self.segregate(range, slice, use_constant))
                .collect()
        };

        let new_ranges = take(&mut self.state.lock().unwrap().new_ranges);
        let split_any = !new_ranges.is_empty();

        for range in &new_ranges {
            for &id in &candidates[range.begin..range.end] {
                let section = self.sections.section(id);
                section.set_class_id(self.read_slot(), section.class_id(self.write_slot()));
            }
        }

        next_ranges.extend(new_ranges);
        next_ranges.retain(|range| range.len() >= 2);
        next_ranges.sort_unstable_by_key(|range| range.begin);
        (next_ranges, split_any)
    }

    /// Rearranges `slice` so that sections that are equal under the selected predicate are
    /// contiguous. The first group holds the sections equal to the first section; the
    /// remainder is then regrouped around a fresh pivot, and so on until the whole range
    /// is resolved, so equal sections always end up in the same group no matter how many
    /// distinct groups the range contains. Every group after the first gets a fresh class
    /// id. Quadratic in the number of distinct groups, but that number is almost always
    /// tiny. Returns the group that keeps the range's class id.
    fn segregate(
        &self,
        range: ClassRange,
        slice: &mut [InputSectionId],
        use_constant: bool,
    ) -> ClassRange {
        debug_assert_eq!(slice.len(), range.len());
        let len = slice.len();
        let mut begin = 0;
        let mut first_group_end = len;
        while begin < len {
            let pivot = slice[begin];
            let equal_count = stable_partition(&mut slice[begin + 1..len], |&id| {
                if use_constant {
                    self.equals_constant(pivot, id)
                } else {
                    self.equals_variable(pivot, id)
                }
            });
            let mid = begin + 1 + equal_count;
            if begin == 0 {
                first_group_end = mid;
                if mid == len {
                    break;
                }
            } else {
                let class_id = self.allocate_class(ClassRange {
                    begin: range.begin + begin,
                    end: range.begin + mid,
                });
                for &id in &slice[begin..mid] {
                    self.sections
                        .section(id)
                        .set_class_id(self.write_slot(), class_id);
                }
            }
            begin = mid;
        }
        ClassRange {
            begin: range.begin,
            end: range.begin + first_group_end,
        }
    }

    fn allocate_class(&self, range: ClassRange) -> u32 {
        let mut state = self.state.lock().unwrap();
        let class_id = state.next_id;
        state.next_id += 1;
        state.new_ranges.push(range);
        class_id
    }

    /// Compares the parts of two sections that don't depend on the current class
    /// assignment: flags, size, bytes and the constant parts of their relocations.
    fn equals_constant(&self, a: InputSectionId, b: InputSectionId) -> bool {
        let a = self.sections.section(a);
        let b = self.sections.section(b);
        if a.flags != b.flags || a.size() != b.size() || a.data != b.data {
            return false;
        }
        match (a.relocations, b.relocations) {
            (RelocationList::Rel(rels_a), RelocationList::Rel(rels_b)) => {
                self.relocations_eq_constant(rels_a, rels_b)
            }
            (RelocationList::Rela(rels_a), RelocationList::Rela(rels_b)) => {
                self.relocations_eq_constant(rels_a, rels_b)
            }
            // A REL-form and a RELA-form section could only be compared by decoding the
            // implicit addends out of the section bytes, so treat them as distinct unless
            // neither has any relocations.
            _ => a.relocations.is_empty() && b.relocations.is_empty(),
        }
    }

    fn relocations_eq_constant<R: RelocationEntry>(&self, rels_a: &[R], rels_b: &[R]) -> bool {
        let mips64_el = self.args.mips64_el;
        rels_a.len() == rels_b.len()
            && rels_a.iter().zip(rels_b).all(|(rel_a, rel_b)| {
                rel_a.offset() == rel_b.offset()
                    && rel_a.rel_type(mips64_el) == rel_b.rel_type(mips64_el)
                    && rel_a.addend() == rel_b.addend()
            })
    }

    /// Compares the parts that do depend on the class assignment: the targets of each pair
    /// of relocations must be the same symbol, or definitions at the same offset into
    /// sections that are currently in the same class. Only called on sections that already
    /// compared equal under `equals_constant`, so the relocation lists have the same
    /// length and form.
    fn equals_variable(&self, a: InputSectionId, b: InputSectionId) -> bool {
        let a = self.sections.section(a);
        let b = self.sections.section(b);
        match (a.relocations, b.relocations) {
            (RelocationList::Rel(rels_a), RelocationList::Rel(rels_b)) => {
                self.relocation_targets_eq(a, rels_a, b, rels_b)
            }
            (RelocationList::Rela(rels_a), RelocationList::Rela(rels_b)) => {
                self.relocation_targets_eq(a, rels_a, b, rels_b)
            }
            // Only reachable when neither section has any relocations.
            _ => true,
        }
    }

    fn relocation_targets_eq<R: RelocationEntry>(
        &self,
        a: &InputSection<'_>,
        rels_a: &[R],
        b: &InputSection<'_>,
        rels_b: &[R],
    ) -> bool {
        let mips64_el = self.args.mips64_el;
        rels_a.iter().zip(rels_b).all(|(rel_a, rel_b)| {
            let target_a = self
                .symbol_db
                .resolve(a.file_id, rel_a.symbol_index(mips64_el));
            let target_b = self
                .symbol_db
                .resolve(b.file_id, rel_b.symbol_index(mips64_el));
            if target_a == target_b {
                return true;
            }

            let (
                SymbolValue::Regular {
                    section: section_a,
                    value: value_a,
                },
                SymbolValue::Regular {
                    section: section_b,
                    value: value_b,
                },
            ) = (self.symbol_db.value(target_a), self.symbol_db.value(target_b))
            else {
                return false;
            };
            if value_a != value_b {
                return false;
            }

            // Class id 0 means the target was never a folding candidate.
            let class_a = self.current_class(section_a);
            class_a != 0 && class_a == self.current_class(section_b)
        })
    }

    fn current_class(&self, id: InputSectionId) -> u32 {
        // With a single worker nothing can be mid-write, so reading the slot being written
        // this sweep is safe, and ids assigned earlier in the sweep refine comparisons
        // made later in the same sweep.
        let slot = if self.sequential {
            self.write_slot()
        } else {
            self.read_slot()
        };
        self.sections.section(id).class_id(slot)
    }

    fn read_slot(&self) -> usize {
        self.pass % 2
    }

    fn write_slot(&self) -> usize {
        (self.pass + 1) % 2
    }

    /// Redirects every non-representative member of each surviving class to the section at
    /// the front of its range. The sort put the member with the highest alignment there.
    fn fold(&self, candidates: &[InputSectionId], ranges: &[ClassRange]) {
        for range in ranges {
            let representative = candidates[range.begin];
            if self.args.print_icf_sections {
                println!("selected {}", self.sections.display_name(representative));
            }
            for &folded in &candidates[range.begin + 1..range.end] {
                if self.args.print_icf_sections {
                    println!("  removed {}", self.sections.display_name(folded));
                }
                self.sections.section(folded).set_replacement(representative);
            }
        }
    }
}

/// Returns whether `id` may be considered for folding.
fn is_eligible(sections: &InputSectionTable, id: InputSectionId) -> bool {
    let section = sections.section(id);

    // A replacement slot that no longer points at the section itself means an earlier run
    // already folded this section away.
    if sections.primary(id) != id {
        return false;
    }

    // .init and .fini are each stitched together from fragments contributed by several
    // input files, and every fragment must be kept.
    if section.name == secnames::INIT || section.name == secnames::FINI {
        return false;
    }

    section.live && section.flags.contains(shf::ALLOC) && !section.flags.contains(shf::WRITE)
}

/// The seed class id for a section: a hash of the properties that any pair of equal
/// sections must share. Relocation targets deliberately don't contribute.
fn initial_class_id(section: &InputSection<'_>) -> u32 {
    let digest = hash::hash_of((
        section.flags,
        section.size(),
        section.relocations.len() as u64,
    ));
    digest as u32 | HASH_CLASS_BIT
}

/// Splits `candidates` into one mutable slice per range, so that each range can be handed
/// to a different worker. Ranges must be sorted and disjoint.
fn split_by_range<'out>(
    mut candidates: &'out mut [InputSectionId],
    ranges: &[ClassRange],
) -> Vec<(ClassRange, &'out mut [InputSectionId])> {
    let mut work = Vec::with_capacity(ranges.len());
    let mut consumed = 0;
    for &range in ranges {
        let (_, rest) = candidates.split_at_mut(range.begin - consumed);
        let (slice, rest) = rest.split_at_mut(range.len());
        candidates = rest;
        consumed = range.end;
        work.push((range, slice));
    }
    work
}

/// Reorders `slice` so that elements satisfying `pred` come before those that don't,
/// preserving relative order on both sides. Returns how many satisfied `pred`.
fn stable_partition<T: Copy>(slice: &mut [T], mut pred: impl FnMut(&T) -> bool) -> usize {
    let mut matched = Vec::with_capacity(slice.len());
    let mut unmatched = Vec::new();
    for &value in slice.iter() {
        if pred(&value) {
            matched.push(value);
        } else {
            unmatched.push(value);
        }
    }
    slice[..matched.len()].copy_from_slice(&matched);
    slice[matched.len()..].copy_from_slice(&unmatched);
    matched.len()
}
