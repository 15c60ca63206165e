use std::{fmt, num::NonZeroU32};

/// Number of bits for the polygon index
const POLY_BITS: u32 = 16;
/// Number of bits for the tile index
const TILE_BITS: u32 = 10;
/// Number of bits for the salt
const SALT_BITS: u32 = 6;

const POLY_MASK: u32 = (1 << POLY_BITS) - 1;
const TILE_MASK: u32 = (1 << TILE_BITS) - 1;
const SALT_MASK: u32 = (1 << SALT_BITS) - 1;

/// A reference to a polygon of a [`NavMesh`](crate::NavMesh).
///
/// Packs a salt, a tile index and a polygon index into 32 bits. The salt is never zero,
/// so a valid reference is never zero either and `Option<PolyRef>` stays four bytes wide.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyRef(NonZeroU32);

impl PolyRef {
    /// The largest polygon index a reference can hold.
    pub const MAX_POLYGONS: usize = POLY_MASK as usize + 1;

    /// Encodes a reference. Returns `None` if the salt is zero after masking.
    #[inline]
    pub fn encode(salt: u32, tile: u32, poly: u32) -> Option<Self> {
        let bits = ((salt & SALT_MASK) << (POLY_BITS + TILE_BITS))
            | ((tile & TILE_MASK) << POLY_BITS)
            | (poly & POLY_MASK);
        if salt & SALT_MASK == 0 {
            return None;
        }
        NonZeroU32::new(bits).map(Self)
    }

    /// Reinterprets raw bits as a reference. Returns `None` for zero.
    #[inline]
    pub fn from_bits(bits: u32) -> Option<Self> {
        NonZeroU32::new(bits).map(Self)
    }

    /// The raw bits of the reference.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0.get()
    }

    /// The salt of the mesh the polygon belongs to.
    #[inline]
    pub fn salt(self) -> u32 {
        (self.bits() >> (POLY_BITS + TILE_BITS)) & SALT_MASK
    }

    /// The index of the tile the polygon belongs to.
    #[inline]
    pub fn tile(self) -> u32 {
        (self.bits() >> POLY_BITS) & TILE_MASK
    }

    /// The index of the polygon inside its tile.
    #[inline]
    pub fn poly(self) -> u32 {
        self.bits() & POLY_MASK
    }
}

impl fmt::Debug for PolyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolyRef")
            .field("salt", &self.salt())
            .field("tile", &self.tile())
            .field("poly", &self.poly())
            .finish()
    }
}

impl fmt::Display for PolyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.salt(), self.tile(), self.poly())
    }
}
