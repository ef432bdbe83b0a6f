//! Acceptance and sync filters
//!
//! The core compares the identifier field of a received frame (word 0 of its
//! descriptor, see [`message`](crate::message)) against `code` in every bit
//! set in `mask`.

/// A code/mask filter
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Expected identifier bits
    pub code: u32,
    /// Bits that are compared
    pub mask: u32,
}

impl Filter {
    /// Matches every frame
    pub const ACCEPT_ALL: Self = Self { code: 0, mask: 0 };

    /// Returns `true` if the core would let a frame with identifier field
    /// `head` through.
    pub fn matches(&self, head: u32) -> bool {
        (head ^ self.code) & self.mask == 0
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::ACCEPT_ALL
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn masked_bits_are_compared() {
        let filter = Filter {
            code: 0x0004_0000,
            mask: 0x1ffc_0000,
        };
        assert!(filter.matches(0x0004_0000));
        assert!(filter.matches(0x0004_1234));
        assert!(!filter.matches(0x0008_0000));
        assert!(Filter::ACCEPT_ALL.matches(0xdead_beef));
    }
}
