//! Range partitioning of houses along the X axis of the storage plane.

use std::fmt;
use std::ops::Range;

use tools::projection::MAX_X;

/// Default number of partitions, one per degree of longitude.
pub const DEFAULT_PARTITIONS: u32 = 360;

/// A slice `[lower, upper)` of the X axis, the last partition also holding `upper`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Partition {
    pub index: u32,
    pub lower: f64,
    pub upper: f64,
    /// True for the last partition, which has no upper bound in the store.
    pub is_last: bool,
}

impl Partition {
    /// Name of the table holding this partition.
    ///
    /// # Example
    /// ```
    /// use loader::partition::PartitionLayout;
    ///
    /// let layout = PartitionLayout::new(360);
    /// assert_eq!(layout.partition(7).table_name(), "house_p007");
    /// ```
    pub fn table_name(&self) -> String {
        format!("house_p{:03}", self.index)
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && (x < self.upper || (self.is_last && x == self.upper))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

/// Split of `[-MAX_X, MAX_X]` into equal-width contiguous partitions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PartitionLayout {
    count: u32,
    x_min: f64,
    x_max: f64,
    width: f64,
}

impl Default for PartitionLayout {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl PartitionLayout {
    /// Builds a layout of `count` partitions, at least one.
    pub fn new(count: u32) -> Self {
        let count = count.max(1);

        Self {
            count,
            x_min: -MAX_X,
            x_max: MAX_X,
            width: 2. * MAX_X / f64::from(count),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn x_range(&self) -> Range<f64> {
        self.x_min..self.x_max
    }

    /// Lower bound of partition `i`, `x_max` when `i == count`. Bounds are computed from the
    /// index so that a partition always ends exactly where the next one starts.
    fn lower_bound(&self, i: u32) -> f64 {
        if i >= self.count {
            self.x_max
        } else {
            self.x_min + f64::from(i) * self.width
        }
    }

    /// Returns partition `i`.
    ///
    /// # Panics
    ///
    /// If `i` is not lower than the number of partitions.
    pub fn partition(&self, i: u32) -> Partition {
        assert!(i < self.count, "partition {} out of {}", i, self.count);

        Partition {
            index: i,
            lower: self.lower_bound(i),
            upper: self.lower_bound(i + 1),
            is_last: i + 1 == self.count,
        }
    }

    pub fn partitions(&self) -> impl Iterator<Item = Partition> + '_ {
        (0..self.count).map(move |i| self.partition(i))
    }

    /// Index of the partition holding `x`, `None` if it is outside of the partitioned range.
    ///
    /// # Example
    /// ```
    /// use loader::partition::PartitionLayout;
    /// use tools::projection::MAX_X;
    ///
    /// let layout = PartitionLayout::new(4);
    /// assert_eq!(layout.partition_of(-MAX_X), Some(0));
    /// assert_eq!(layout.partition_of(0.), Some(2));
    /// assert_eq!(layout.partition_of(MAX_X), Some(3));
    /// assert_eq!(layout.partition_of(MAX_X + 1.), None);
    /// ```
    pub fn partition_of(&self, x: f64) -> Option<u32> {
        if !(self.x_min..=self.x_max).contains(&x) {
            return None;
        }

        let mut i = (((x - self.x_min) / self.width) as u32).min(self.count - 1);

        // Division rounding may be off by one near a boundary.
        while i > 0 && x < self.lower_bound(i) {
            i -= 1;
        }
        while i + 1 < self.count && x >= self.lower_bound(i + 1) {
            i += 1;
        }

        Some(i)
    }
}
