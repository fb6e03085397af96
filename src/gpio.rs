//! Owns the GPIO chip and the output lines driven by incoming notes.
//! Lines are released by dropping their handles, so every exit path that
//! drops or clears the set gives them back to the kernel.

use crate::error::{Error, Result};
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

/// Consumer label shown by `gpioinfo` for the lines we hold.
pub const CONSUMER: &str = "midi2gpio";

pub trait OutputLine {
    fn offset(&self) -> u32;
    fn set(&mut self, on: bool) -> Result<()>;
}

/// A controller that hands out exclusively owned output lines.
pub trait LineController {
    type Line: OutputLine;

    /// Requests `offset` as an output, initially off.
    fn request_output(&mut self, offset: u32) -> Result<Self::Line>;
}

// ─────────────────── character-device backend ────────────────────────────────

pub struct CdevChip {
    name: String,
    chip: Chip,
}

impl CdevChip {
    /// Opens a chip by name (`gpiochip0`) or by device path.
    pub fn open(name: &str) -> Result<Self> {
        let path = if name.starts_with('/') {
            name.to_owned()
        } else {
            format!("/dev/{name}")
        };
        let chip = Chip::new(&path).map_err(|source| Error::ChipOpen {
            chip: name.to_owned(),
            source,
        })?;
        log::debug!("opened GPIO chip {path}");
        Ok(Self {
            name: name.to_owned(),
            chip,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LineController for CdevChip {
    type Line = CdevLine;

    fn request_output(&mut self, offset: u32) -> Result<CdevLine> {
        let request = |source| Error::LineRequest { offset, source };
        let handle = self
            .chip
            .get_line(offset)
            .map_err(request)?
            .request(LineRequestFlags::OUTPUT, 0, CONSUMER)
            .map_err(request)?;
        Ok(CdevLine { offset, handle })
    }
}

pub struct CdevLine {
    offset: u32,
    handle: LineHandle,
}

impl OutputLine for CdevLine {
    fn offset(&self) -> u32 {
        self.offset
    }

    fn set(&mut self, on: bool) -> Result<()> {
        self.handle
            .set_value(u8::from(on))
            .map_err(|source| Error::LineSet {
                offset: self.offset,
                source,
            })
    }
}

// ─────────────────── output set ──────────────────────────────────────────────

struct Held<L> {
    line: L,
    level: bool,
}

/// The chip plus every line requested from it. Holds either all requested
/// lines or none.
pub struct OutputSet<C: LineController> {
    chip: Option<C>,
    lines: Vec<Held<C::Line>>,
}

impl<C: LineController> OutputSet<C> {
    /// A set holding nothing; releasing it is a no-op.
    pub fn empty() -> Self {
        Self {
            chip: None,
            lines: Vec::new(),
        }
    }

    /// Requests each offset in order. On the first failure every line taken
    /// so far is released along with the chip before the error is returned.
    pub fn acquire(mut chip: C, offsets: &[u32]) -> Result<Self> {
        let mut lines = Vec::with_capacity(offsets.len());
        for &offset in offsets {
            match chip.request_output(offset) {
                Ok(line) => lines.push(Held { line, level: false }),
                Err(e) => {
                    if !lines.is_empty() {
                        log::warn!(
                            "rolling back {} GPIO line(s) acquired before the failure",
                            lines.len()
                        );
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            chip: Some(chip),
            lines,
        })
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn level(&self, index: usize) -> Option<bool> {
        self.lines.get(index).map(|h| h.level)
    }

    /// Drives line `index`. A failed write is logged and otherwise ignored.
    pub fn set_level(&mut self, index: usize, on: bool) {
        let Some(held) = self.lines.get_mut(index) else {
            log::warn!("no GPIO line at index {index}");
            return;
        };
        match held.line.set(on) {
            Ok(()) => held.level = on,
            Err(e) => log::warn!("{e}"),
        }
    }

    /// Releases every line, then the chip. Safe to call more than once.
    pub fn release_all(&mut self) {
        if self.lines.is_empty() && self.chip.is_none() {
            return;
        }
        let offsets: Vec<u32> = self.lines.iter().map(|h| h.line.offset()).collect();
        self.lines.clear();
        self.chip = None;
        log::info!("released GPIO lines {offsets:?}");
    }
}

impl OutputSet<CdevChip> {
    /// Opens `chip` and requests `offsets` from it.
    pub fn open(chip: &str, offsets: &[u32]) -> Result<Self> {
        let chip = CdevChip::open(chip)?;
        let name = chip.name().to_owned();
        let set = Self::acquire(chip, offsets)?;
        log::info!("💡 Holding {name} lines {offsets:?} as outputs");
        Ok(set)
    }
}

impl<C: LineController> Drop for OutputSet<C> {
    fn drop(&mut self) {
        self.release_all();
    }
}

// ─────────────────── in-memory controller for tests ──────────────────────────


#[cfg(test)]
mod tests {
    use super::fake::{Board, FakeChip};
    use super::*;

    #[test]
    fn acquires_all_lines_off() {
        let board = Board::default();
        let set = OutputSet::acquire(FakeChip::new(&board), &[25, 26, 27]).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(board.held(), vec![25, 26, 27]);
        assert!((0..3).all(|i| set.level(i) == Some(false)));
    }

    #[test]
    fn partial_acquisition_is_rolled_back() {
        let board = Board::default();
        let mut chip = FakeChip::new(&board);
        chip.fail_on = Some(27);
        assert!(OutputSet::acquire(chip, &[25, 26, 27]).is_err());
        assert!(board.held().is_empty());
    }

    #[test]
    fn duplicate_offset_fails_cleanly() {
        let board = Board::default();
        assert!(OutputSet::acquire(FakeChip::new(&board), &[25, 25]).is_err());
        assert!(board.held().is_empty());
    }

    #[test]
    fn set_level_tracks_and_ignores_bad_index() {
        let board = Board::default();
        let mut set = OutputSet::acquire(FakeChip::new(&board), &[25, 26]).unwrap();
        set.set_level(1, true);
        set.set_level(1, true);
        set.set_level(7, true);
        assert_eq!(set.level(0), Some(false));
        assert_eq!(set.level(1), Some(true));
        assert_eq!(*board.writes.borrow(), vec![(26, true), (26, true)]);
    }

    #[test]
    fn release_is_idempotent() {
        let board = Board::default();
        let mut set = OutputSet::acquire(FakeChip::new(&board), &[25, 26, 27]).unwrap();
        set.release_all();
        assert!(board.held().is_empty());
        assert!(set.is_empty());
        set.release_all();
        assert_eq!(set.level(0), None);

        let mut nothing = OutputSet::<FakeChip>::empty();
        nothing.release_all();
        nothing.release_all();
    }

    #[test]
    fn drop_releases() {
        let board = Board::default();
        {
            let _set = OutputSet::acquire(FakeChip::new(&board), &[4, 5]).unwrap();
            assert_eq!(board.held(), vec![4, 5]);
        }
        assert!(board.held().is_empty());
    }
}
