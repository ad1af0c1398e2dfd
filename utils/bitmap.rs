//! Core-set bitmap
//!
//! Cells own a fixed set of physical cores; signals are sent to a set of
//! cores at once. Both are tracked with a single-word bitmap indexed by
//! physical core id.

use core::fmt;

/// Number of cores a [`CpuSet`] can describe
pub const CPU_SET_BITS: usize = 64;

/// Set of physical cores
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CpuSet(u64);

impl CpuSet {
    /// Empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Set built from a raw bit mask
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Set holding the first `count` cores
    pub const fn first_n(count: usize) -> Self {
        if count >= CPU_SET_BITS {
            Self(u64::MAX)
        } else {
            Self((1u64 << count) - 1)
        }
    }

    /// Set holding exactly one core
    pub const fn single(cpu: usize) -> Self {
        if cpu < CPU_SET_BITS {
            Self(1 << cpu)
        } else {
            Self(0)
        }
    }

    /// Raw bit mask
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Test if a core is in the set
    pub const fn contains(&self, cpu: usize) -> bool {
        cpu < CPU_SET_BITS && (self.0 >> cpu) & 1 == 1
    }

    /// Add a core, returns false if `cpu` is out of range
    pub fn insert(&mut self, cpu: usize) -> bool {
        if cpu >= CPU_SET_BITS {
            return false;
        }
        self.0 |= 1 << cpu;
        true
    }

    /// Remove a core
    pub fn remove(&mut self, cpu: usize) {
        if cpu < CPU_SET_BITS {
            self.0 &= !(1 << cpu);
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Lowest core id in the set
    pub const fn first(&self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    pub const fn union(&self, other: CpuSet) -> CpuSet {
        CpuSet(self.0 | other.0)
    }

    pub const fn intersection(&self, other: CpuSet) -> CpuSet {
        CpuSet(self.0 & other.0)
    }

    pub const fn difference(&self, other: CpuSet) -> CpuSet {
        CpuSet(self.0 & !other.0)
    }

    pub const fn intersects(&self, other: CpuSet) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every core of `self` is also in `other`
    pub const fn is_subset(&self, other: CpuSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Iterate over core ids in ascending order
    pub fn iter(&self) -> Iter {
        Iter { remaining: self.0 }
    }
}

/// Ascending iterator over a [`CpuSet`]
pub struct Iter {
    remaining: u64,
}

impl Iterator for Iter {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let cpu = self.remaining.trailing_zeros() as usize;
        self.remaining &= self.remaining - 1;
        Some(cpu)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.count_ones() as usize;
        (n, Some(n))
    }
}

impl IntoIterator for CpuSet {
    type Item = usize;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = CpuSet::empty();
        for cpu in iter {
            set.insert(cpu);
        }
        set
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_set_basic() {
        let mut set = CpuSet::empty();
        assert!(set.is_empty());
        assert!(set.insert(3));
        assert!(set.insert(1));
        assert!(!set.insert(CPU_SET_BITS));
        assert!(set.contains(1));
        assert!(set.contains(3));
        assert!(!set.contains(2));
        assert_eq!(set.len(), 2);
        assert_eq!(set.first(), Some(1));

        set.remove(1);
        assert_eq!(set.first(), Some(3));
        assert_eq!(set.bits(), 0b1000);
    }

    #[test]
    fn test_cpu_set_iter_ascending() {
        let set: CpuSet = [5, 0, 2].into_iter().collect();
        let cpus: Vec<usize> = set.iter().collect();
        assert_eq!(cpus, vec![0, 2, 5]);
        assert_eq!(set.iter().size_hint(), (3, Some(3)));
    }

    #[test]
    fn test_cpu_set_relations() {
        let all = CpuSet::first_n(4);
        let low = CpuSet::from_bits(0b0011);
        assert!(low.is_subset(all));
        assert!(!all.is_subset(low));
        assert_eq!(all.difference(low), CpuSet::from_bits(0b1100));
        assert!(low.intersects(all));
        assert!(!low.intersects(CpuSet::single(2)));
        assert_eq!(CpuSet::first_n(64).bits(), u64::MAX);
    }

    #[test]
    fn test_cpu_set_debug() {
        let set: CpuSet = [1, 4].into_iter().collect();
        assert_eq!(format!("{:?}", set), "{1, 4}");
    }
}
