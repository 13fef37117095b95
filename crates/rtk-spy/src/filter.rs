use core::ops::RangeInclusive;

/// Set of record identifiers a [`crate::Spy`] lets through.
///
/// Identifiers at or above [`RecordFilter::CAPACITY`] are always dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFilter([u64; 2]);

impl RecordFilter {
    pub const CAPACITY: u8 = 128;

    pub const fn all() -> Self {
        Self([u64::MAX; 2])
    }

    pub const fn none() -> Self {
        Self([0; 2])
    }

    fn slot(record: u8) -> Option<(usize, u64)> {
        (record < Self::CAPACITY).then(|| (usize::from(record / 64), 1u64 << (record % 64)))
    }

    pub fn is_enabled(&self, record: u8) -> bool {
        Self::slot(record).is_some_and(|(word, bit)| self.0[word] & bit != 0)
    }

    pub fn enable(&mut self, record: u8) -> &mut Self {
        if let Some((word, bit)) = Self::slot(record) {
            self.0[word] |= bit;
        }
        self
    }

    pub fn disable(&mut self, record: u8) -> &mut Self {
        if let Some((word, bit)) = Self::slot(record) {
            self.0[word] &= !bit;
        }
        self
    }

    /// Enables every identifier in `group`, e.g. [`crate::records::mutex::GROUP`].
    pub fn enable_group(&mut self, group: RangeInclusive<u8>) -> &mut Self {
        for record in group {
            self.enable(record);
        }
        self
    }

    pub fn disable_group(&mut self, group: RangeInclusive<u8>) -> &mut Self {
        for record in group {
            self.disable(record);
        }
        self
    }
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self::all()
    }
}
