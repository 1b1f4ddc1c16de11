use crate::internal::common::utils::format_index_ranges;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::fmt;

const WORD_BITS: u32 = u64::BITS;

type Words = SmallVec<[u64; 2]>;

/// Fixed-width bitset.
///
/// The width is decided at construction and never changes implicitly: setting or clearing
/// a bit outside of the width panics (like indexing a slice), `contains` of such a bit is `false`.
/// Bits past the width are always zero.
#[derive(Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Bitmap {
    len: u32,
    words: Words,
}

/// Bitmap over device instances of one device type on one node
pub type DeviceBitmap = Bitmap;
/// Bitmap over cluster nodes (or node positions inside a job)
pub type NodeBitmap = Bitmap;
/// Bitmap over cores of one node
pub type CoreBitmap = Bitmap;

#[inline]
fn n_words(len: u32) -> usize {
    len.div_ceil(WORD_BITS) as usize
}

impl Bitmap {
    pub fn new(len: u32) -> Self {
        Bitmap {
            len,
            words: smallvec![0; n_words(len)],
        }
    }

    pub fn full(len: u32) -> Self {
        let mut bitmap = Bitmap {
            len,
            words: smallvec![u64::MAX; n_words(len)],
        };
        bitmap.mask_tail();
        bitmap
    }

    pub fn from_indices<I: IntoIterator<Item = u32>>(len: u32, indices: I) -> Self {
        let mut bitmap = Bitmap::new(len);
        for index in indices {
            bitmap.set(index);
        }
        bitmap
    }

    /// Bitmap with a contiguous range `start..end` set
    pub fn from_range(len: u32, start: u32, end: u32) -> Self {
        Self::from_indices(len, start..end)
    }

    fn mask_tail(&mut self) {
        let rem = self.len % WORD_BITS;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    fn locate(index: u32) -> (usize, u64) {
        ((index / WORD_BITS) as usize, 1u64 << (index % WORD_BITS))
    }

    pub fn set(&mut self, index: u32) {
        assert!(
            index < self.len,
            "Bit {index} out of bitmap width {}",
            self.len
        );
        let (word, mask) = Self::locate(index);
        self.words[word] |= mask;
    }

    pub fn clear(&mut self, index: u32) {
        assert!(
            index < self.len,
            "Bit {index} out of bitmap width {}",
            self.len
        );
        let (word, mask) = Self::locate(index);
        self.words[word] &= !mask;
    }

    /// Sets the bit if it is inside of the width; returns false otherwise
    pub fn try_set(&mut self, index: u32) -> bool {
        if index < self.len {
            self.set(index);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn contains(&self, index: u32) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, mask) = Self::locate(index);
        self.words[word] & mask != 0
    }

    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn is_full(&self) -> bool {
        self.count() == self.len
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(i, word)| {
            let mut word = *word;
            std::iter::from_fn(move || {
                if word == 0 {
                    return None;
                }
                let bit = word.trailing_zeros();
                word &= word - 1;
                Some(i as u32 * WORD_BITS + bit)
            })
        })
    }

    pub fn first(&self) -> Option<u32> {
        self.iter().next()
    }

    /// Number of set bits strictly below `index`.
    /// For a node set this is the position of the node inside of a job.
    pub fn rank(&self, index: u32) -> u32 {
        let (word, _) = Self::locate(index.min(self.len));
        let mut rank: u32 = self.words[..word.min(self.words.len())]
            .iter()
            .map(|w| w.count_ones())
            .sum();
        let rem = index.min(self.len) % WORD_BITS;
        if rem != 0 && word < self.words.len() {
            rank += (self.words[word] & ((1u64 << rem) - 1)).count_ones();
        }
        rank
    }

    /// Index of the n-th (zero based) set bit
    pub fn nth(&self, n: u32) -> Option<u32> {
        self.iter().nth(n as usize)
    }

    pub fn overlaps(&self, other: &Bitmap) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    pub fn overlap_count(&self, other: &Bitmap) -> u32 {
        self.words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a & b).count_ones())
            .sum()
    }

    pub fn is_subset_of(&self, other: &Bitmap) -> bool {
        self.words.iter().enumerate().all(|(i, w)| {
            let o = other.words.get(i).copied().unwrap_or(0);
            w & !o == 0
        })
    }

    /// Bitwise OR; bits of `other` outside of this width are ignored
    pub fn union_with(&mut self, other: &Bitmap) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
        self.mask_tail();
    }

    pub fn intersect_with(&mut self, other: &Bitmap) {
        for (i, a) in self.words.iter_mut().enumerate() {
            *a &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    pub fn subtract(&mut self, other: &Bitmap) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= !b;
        }
    }

    /// Changes the width; bits past the new width are dropped
    pub fn resize(&mut self, len: u32) {
        self.words.resize(n_words(len), 0);
        self.len = len;
        self.mask_tail();
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({}/{}: [{}])", self.count(), self.len, self)
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_index_ranges(self.iter()))
    }
}
