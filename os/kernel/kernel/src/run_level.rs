//! # Run levels
//!
//! The interrupt-acceptance priority of a processor. Interrupts whose
//! priority class is at or below the current level stay pending.
//!
//! On x86-64 the level is CR8 directly. On i686 it lives in the local APIC's
//! task priority register, which holds the priority class in bits 4–7.

/// Interrupt-acceptance priority of a processor.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
#[repr(u8)]
pub enum RunLevel {
    /// Normal thread execution; everything is delivered.
    #[default]
    Passive = 0,
    Apc = 1,
    Dispatch = 2,
    Device = 3,
    Profile = 13,
    Clock = 14,
    /// All maskable interrupts blocked.
    High = 15,
}

/// Linear address of the local APIC task priority register.
pub const APIC_TPR: usize = 0xFEE0_0080;

impl RunLevel {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    /// Decodes a level. Unassigned priority classes between device and
    /// profile collapse to [`RunLevel::Device`].
    #[inline]
    #[must_use]
    pub const fn from_bits(v: u8) -> Self {
        match v & 0xF {
            0 => Self::Passive,
            1 => Self::Apc,
            2 => Self::Dispatch,
            13 => Self::Profile,
            14 => Self::Clock,
            15 => Self::High,
            _ => Self::Device,
        }
    }

    /// Value written to the APIC task priority register.
    #[inline]
    #[must_use]
    pub const fn to_task_priority(self) -> u32 {
        (self as u32) << 4
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_task_priority(tpr: u32) -> Self {
        Self::from_bits(((tpr >> 4) & 0xF) as u8)
    }
}

impl core::fmt::Display for RunLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Passive => "PASSIVE",
            Self::Apc => "APC",
            Self::Dispatch => "DISPATCH",
            Self::Device => "DEVICE",
            Self::Profile => "PROFILE",
            Self::Clock => "CLOCK",
            Self::High => "HIGH",
        };
        f.write_str(name)
    }
}
