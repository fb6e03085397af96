//! Note number → output line lookup.

/// Notes wired to lines 0, 1 and 2: middle C, D and E.
pub const DEFAULT_MAPPING: [(u8, usize); 3] = [(60, 0), (62, 1), (64, 2)];

const NOTE_RANGE: usize = 128;

/// Read-only table over the MIDI note domain; unmapped notes have no line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteTable {
    slots: [Option<usize>; NOTE_RANGE],
}

impl NoteTable {
    /// Entries with a note outside 0..=127 are dropped. A later entry for the
    /// same note replaces an earlier one.
    pub fn new(mapping: &[(u8, usize)]) -> Self {
        let mut slots = [None; NOTE_RANGE];
        for &(note, line) in mapping {
            if let Some(slot) = slots.get_mut(usize::from(note)) {
                *slot = Some(line);
            } else {
                log::warn!("note {note} is outside the MIDI range, not mapped");
            }
        }
        Self { slots }
    }

    pub fn line_for(&self, note: u8) -> Option<usize> {
        self.slots.get(usize::from(note)).copied().flatten()
    }

    /// Number of distinct lines the table can drive.
    pub fn line_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .max()
            .map_or(0, |&highest| highest + 1)
    }
}

impl Default for NoteTable {
    fn default() -> Self {
        Self::new(&DEFAULT_MAPPING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let table = NoteTable::default();
        assert_eq!(table.line_for(60), Some(0));
        assert_eq!(table.line_for(62), Some(1));
        assert_eq!(table.line_for(64), Some(2));
        assert_eq!(table.line_count(), 3);
    }

    #[test]
    fn everything_else_is_unmapped() {
        let table = NoteTable::default();
        let mapped: Vec<u8> = (0..=u8::MAX).filter(|&n| table.line_for(n).is_some()).collect();
        assert_eq!(mapped, vec![60, 62, 64]);
    }

    #[test]
    fn out_of_range_entries_are_dropped() {
        let table = NoteTable::new(&[(200, 0), (10, 4), (10, 1)]);
        assert_eq!(table.line_for(200), None);
        assert_eq!(table.line_for(10), Some(1));
        assert_eq!(table.line_count(), 2);
        assert_eq!(NoteTable::new(&[]).line_count(), 0);
    }
}
