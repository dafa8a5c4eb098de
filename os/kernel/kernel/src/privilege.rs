//! # Privilege Levels
//!
//! | Concept | Stored in | Purpose |
//! |---------|-----------|---------|
//! | [`Rpl`] | the low 2 bits of a selector | the privilege the requester asks for |
//! | [`Dpl`] | bits 45–46 of a descriptor, bits 13–14 of a gate's access word | the privilege required to use the target |
//!
//! Only rings 0 (kernel) and 3 (user) are used.

/// Descriptor Privilege Level.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[repr(u8)]
pub enum Dpl {
    #[default]
    Ring0 = 0,
    Ring1 = 1,
    Ring2 = 2,
    Ring3 = 3,
}

impl Dpl {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => Self::Ring0,
            1 => Self::Ring1,
            2 => Self::Ring2,
            _ => Self::Ring3,
        }
    }
}

/// Requested Privilege Level.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[repr(u8)]
pub enum Rpl {
    #[default]
    Ring0 = 0,
    Ring1 = 1,
    Ring2 = 2,
    Ring3 = 3,
}

/// RPL mask in a 16-bit selector.
pub const RPL_MASK: u16 = 0b11;

impl Rpl {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u16 {
        self as u16
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(v: u16) -> Self {
        match v & RPL_MASK {
            0 => Self::Ring0,
            1 => Self::Ring1,
            2 => Self::Ring2,
            _ => Self::Ring3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_roundtrip() {
        for b in 0u8..=3 {
            assert_eq!(Dpl::from_bits(b).into_bits(), b);
            assert_eq!(Rpl::from_bits(u16::from(b)).into_bits(), u16::from(b));
        }
    }

    #[test]
    fn only_the_low_two_bits_count() {
        assert_eq!(Dpl::from_bits(0b111), Dpl::Ring3);
        assert_eq!(Rpl::from_bits(0x23), Rpl::Ring3);
        assert_eq!(Rpl::from_bits(0x28), Rpl::Ring0);
    }
}
