use crate::error::Result;
use anyhow::bail;
use std::fmt::Display;

/// An alignment. Always a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct Alignment {
    pub(crate) exponent: u8,
}

/// The minimum alignment that we support.
pub const MIN: Alignment = Alignment { exponent: 0 };

/// The maximum alignment that we support.
pub const MAX: Alignment = Alignment { exponent: 15 };

impl Alignment {
    pub fn new(raw: u64) -> Result<Self> {
        if !raw.is_power_of_two() {
            bail!("Invalid alignment 0x{raw:x}");
        }
        let exponent = raw.trailing_zeros();
        if exponent > u32::from(MAX.exponent) {
            bail!("Unsupported alignment 0x{raw:x}");
        }
        Ok(Alignment {
            exponent: exponent as u8,
        })
    }

    pub fn value(self) -> u64 {
        1 << self.exponent
    }
}

impl Display for Alignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.value(), f)
    }
}

#[test]
fn test_new() {
    assert_eq!(Alignment::new(1).unwrap(), MIN);
    assert_eq!(Alignment::new(16).unwrap().value(), 16);
    assert_eq!(Alignment::new(1 << 15).unwrap(), MAX);
    assert!(Alignment::new(0).is_err());
    assert!(Alignment::new(12).is_err());
    assert!(Alignment::new(1 << 16).is_err());
}

#[test]
fn test_ordering() {
    assert!(Alignment::new(16).unwrap() > Alignment::new(4).unwrap());
}
