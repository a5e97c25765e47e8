//! Scaling factors for decoded register values.
//!
//! Field devices report power as raw register counts. Each device type defines the factor which
//! converts those counts to kilowatts. The factor travels with every stored reading so that it is
//! applied where the value is consumed, not where it is decoded.

/// Multiplier converting a raw register value to engineering units (`value = raw * factor`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale(f32);

impl Default for Scale {
    /// Default to no scaling.
    fn default() -> Self {
        Self::UNITY
    }
}

impl Scale {
    /// Raw value already in engineering units.
    pub const UNITY: Scale = Scale(1.0);

    /// Create a new `Scale` with the given multiplier.
    pub const fn new(factor: f32) -> Self {
        Self(factor)
    }

    /// The multiplier itself.
    #[inline]
    pub const fn factor(&self) -> f32 {
        self.0
    }

    /// Convert a raw decoded register value to engineering units.
    #[inline]
    pub fn apply(&self, raw: u32) -> f32 {
        raw as f32 * self.0
    }
}
