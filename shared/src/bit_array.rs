use alloc::{boxed::Box, vec};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitArray<T>(pub T);

macro_rules! impl_bitarray {
    ($($t: ty),*) => {
        $(
            impl BitArray<$t> {
                pub const BITS: usize = <$t>::BITS as usize;

                pub const fn get(&self, idx: usize) -> bool {
                    (self.0 >> idx & 1) != 0
                }

                pub const fn with(self, value: bool, idx: usize) -> Self {
                    BitArray((self.0 & !(1 << idx)) | (value as $t) << idx)
                }

                pub const fn is_full(&self) -> bool {
                    self.0 == <$t>::MAX
                }

                pub const fn count_ones(&self) -> u32 {
                    self.0.count_ones()
                }

                pub const fn load(self) -> $t { self.0 }
            }
        )*
    };
}

impl_bitarray!(u8, u16, u32, u64);

type Word = BitArray<u64>;

/// A fixed-length bitmap packed into 64-bit words.
///
/// Bits past `len` in the last word are never set.
#[derive(Clone, Debug)]
pub struct Bitmap {
    words: Box<[Word]>,
    len: usize,
}

impl Bitmap {
    /// Creates a bitmap of `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![BitArray(0); len.div_ceil(Word::BITS)].into_boxed_slice(),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn test(&self, idx: usize) -> bool {
        assert!(idx < self.len, "bit {idx} out of range (len {})", self.len);
        self.words[idx / Word::BITS].get(idx % Word::BITS)
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        assert!(idx < self.len, "bit {idx} out of range (len {})", self.len);
        let word = &mut self.words[idx / Word::BITS];
        *word = word.with(value, idx % Word::BITS);
    }

    /// Finds the lowest bit equal to `value`, flips it, and returns its index.
    pub fn scan_and_flip(&mut self, value: bool) -> Option<usize> {
        for (w, word) in self.words.iter_mut().enumerate() {
            // Skip words with nothing to offer.
            if (value && word.load() == 0) || (!value && word.is_full()) {
                continue;
            }
            for bit in 0..Word::BITS {
                let idx = w * Word::BITS + bit;
                if idx >= self.len {
                    return None;
                }
                if word.get(bit) == value {
                    *word = word.with(!value, bit);
                    return Some(idx);
                }
            }
        }
        None
    }

    /// Number of bits equal to `value`.
    pub fn count(&self, value: bool) -> usize {
        let ones: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        if value {
            ones
        } else {
            self.len - ones
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_array_with_clears() {
        let bits = BitArray(0u8).with(true, 3).with(true, 0);
        assert_eq!(bits.load(), 0b1001);
        assert_eq!(bits.with(false, 3).load(), 0b0001);
        assert!(bits.get(0));
        assert!(!bits.get(1));
    }

    #[test]
    fn test_scan_and_flip_first_fit() {
        let mut map = Bitmap::new(130);
        assert_eq!(map.scan_and_flip(false), Some(0));
        assert_eq!(map.scan_and_flip(false), Some(1));
        map.set(0, false);
        assert_eq!(map.scan_and_flip(false), Some(0));
        assert_eq!(map.count(true), 2);
        assert_eq!(map.count(false), 128);
    }

    #[test]
    fn test_scan_crosses_words_and_stops_at_len() {
        let mut map = Bitmap::new(66);
        for i in 0..65 {
            map.set(i, true);
        }
        assert_eq!(map.scan_and_flip(false), Some(65));
        assert_eq!(map.scan_and_flip(false), None);
        assert!(map.test(65));
    }

    #[test]
    #[should_panic]
    fn test_out_of_range() {
        Bitmap::new(8).test(8);
    }
}
