//! Fixed-capacity bit vector backing a block's pending and repair masks.
//!
//! Capacity is fixed at construction and no operation allocates afterwards.
//! The type carries no ordering semantics beyond the numeric index: it is a
//! dense presence/absence tracker with range primitives and first/next-set
//! queries, all O(word count) or better.

const WORD_BITS: usize = 64;

/// Fixed-capacity bit vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitset {
    words: Box<[u64]>,
    nbits: usize,
}

impl Bitset {
    /// Create a bitset able to hold `nbits` bits, all initially unset.
    #[must_use]
    pub fn new(nbits: usize) -> Self {
        Self {
            words: vec![0u64; nbits.div_ceil(WORD_BITS)].into_boxed_slice(),
            nbits,
        }
    }

    /// Number of bits this set can hold.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.nbits
    }

    /// Set the bit at `index`. Returns `false` if `index` is out of capacity.
    pub fn set(&mut self, index: usize) -> bool {
        if index >= self.nbits {
            return false;
        }
        self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
        true
    }

    /// Unset the bit at `index`. Out-of-capacity indices are a no-op.
    pub fn unset(&mut self, index: usize) {
        if index < self.nbits {
            self.words[index / WORD_BITS] &= !(1u64 << (index % WORD_BITS));
        }
    }

    /// Test the bit at `index`. Out-of-capacity indices read as unset.
    #[must_use]
    pub fn test(&self, index: usize) -> bool {
        if index >= self.nbits {
            return false;
        }
        self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Set `count` consecutive bits starting at `first`.
    ///
    /// Returns `false`, without mutating anything, if the range does not fit
    /// the capacity. A `count` of zero is a successful no-op.
    pub fn set_bits(&mut self, first: usize, count: usize) -> bool {
        if count == 0 {
            return first <= self.nbits;
        }
        let Some(end) = first.checked_add(count) else {
            return false;
        };
        if end > self.nbits {
            return false;
        }
        let last = end - 1;
        let (first_word, first_bit) = (first / WORD_BITS, first % WORD_BITS);
        let (last_word, last_bit) = (last / WORD_BITS, last % WORD_BITS);
        if first_word == last_word {
            let width = last_bit - first_bit;
            self.words[first_word] |= (u64::MAX >> (WORD_BITS - 1 - width)) << first_bit;
        } else {
            self.words[first_word] |= u64::MAX << first_bit;
            for word in &mut self.words[first_word + 1..last_word] {
                *word = u64::MAX;
            }
            self.words[last_word] |= u64::MAX >> (WORD_BITS - 1 - last_bit);
        }
        true
    }

    /// Reset every bit to zero.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// True when at least one bit is set.
    #[must_use]
    pub fn any(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Lowest set index, if any.
    #[must_use]
    pub fn first_set(&self) -> Option<usize> {
        self.next_set(0)
    }

    /// Lowest set index greater than or equal to `from`, if any.
    #[must_use]
    pub fn next_set(&self, from: usize) -> Option<usize> {
        if from >= self.nbits {
            return None;
        }
        let start_word = from / WORD_BITS;
        let mut word = self.words[start_word] & (u64::MAX << (from % WORD_BITS));
        let mut index = start_word;
        loop {
            if word != 0 {
                let found = index * WORD_BITS + word.trailing_zeros() as usize;
                return (found < self.nbits).then_some(found);
            }
            index += 1;
            if index >= self.words.len() {
                return None;
            }
            word = self.words[index];
        }
    }

    /// OR every bit of `other` into `self`. Capacities must match.
    pub fn union_with(&mut self, other: &Self) {
        assert_eq!(
            self.nbits, other.nbits,
            "bitset union requires equal capacities"
        );
        for (dst, src) in self.words.iter_mut().zip(other.words.iter()) {
            *dst |= *src;
        }
    }
}
