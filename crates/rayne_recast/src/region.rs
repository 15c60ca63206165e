use crate::{CompactHeightfield, region_merge::RegionError};

bitflags::bitflags! {
    /// A region in a [`CompactHeightfield`](crate::CompactHeightfield).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionId: u16 {
        /// The default region, which is used for spans that are not in a region, i.e. not walkable.
        const NONE = 0;

        /// Heightfield border flag.
        /// If a heightfield region ID has this bit set, then the region is a border
        /// region and its spans are considered un-walkable.
        /// (Used during the region and contour build process.)
        const BORDER_REGION = 0x8000;

        /// The highest region id that fits next to [`RegionId::BORDER_REGION`].
        const MAX = Self::BORDER_REGION.bits() - 1;
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        RegionId::from_bits_retain(value)
    }
}

impl RegionId {
    /// Returns the id without the [`RegionId::BORDER_REGION`] flag.
    #[inline]
    pub fn without_border(self) -> Self {
        self.difference(Self::BORDER_REGION)
    }

    /// `true` if this is a real region, i.e. neither [`RegionId::NONE`] nor a border region.
    #[inline]
    pub fn is_region(self) -> bool {
        self != Self::NONE && !self.contains(Self::BORDER_REGION)
    }
}

/// The algorithm used to partition the walkable surface into regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PartitionType {
    /// See [`CompactHeightfield::build_regions`].
    #[default]
    Watershed,
    /// See [`CompactHeightfield::build_regions_monotone`].
    Monotone,
    /// See [`CompactHeightfield::build_layer_regions`].
    Layers,
}

impl CompactHeightfield {
    /// Partitions the walkable surface with the given algorithm.
    ///
    /// Builds the distance field first when the watershed partitioning is used.
    /// `merge_region_area` is ignored by [`PartitionType::Layers`].
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::TooManyRegions`] if the region ids overflow.
    pub fn partition(
        &mut self,
        partition_type: PartitionType,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        match partition_type {
            PartitionType::Watershed => {
                self.build_distance_field();
                self.build_regions(border_size, min_region_area, merge_region_area)
            }
            PartitionType::Monotone => {
                self.build_regions_monotone(border_size, min_region_area, merge_region_area)
            }
            PartitionType::Layers => self.build_layer_regions(border_size, min_region_area),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AreaType;

    #[test]
    fn border_flag_is_separable() {
        let id = RegionId::from(12) | RegionId::BORDER_REGION;
        assert!(id.contains(RegionId::BORDER_REGION));
        assert_eq!(id.without_border(), RegionId::from(12));
        assert!(!id.is_region());
        assert!(RegionId::from(12).is_region());
        assert!(!RegionId::NONE.is_region());
    }

    #[test]
    fn every_partition_covers_an_open_square() {
        for partition_type in [
            PartitionType::Watershed,
            PartitionType::Monotone,
            PartitionType::Layers,
        ] {
            let mut compact = crate::test_support::flat_compact_heightfield(10.0);
            compact.partition(partition_type, 0, 8, 20).unwrap();
            assert_eq!(compact.max_region, RegionId::from(1), "{partition_type:?}");
            assert!(
                compact.spans.iter().all(|span| span.region.is_region()),
                "{partition_type:?}"
            );
        }
    }

    #[test]
    fn islands_at_the_minimum_area_are_kept() {
        // Three islands separated by two-cell gaps: 8x8, 7x8 and 9x8 spans.
        let islands = [(1..9, 1..9), (11..18, 1..9), (1..10, 11..19)];
        for partition_type in [
            PartitionType::Watershed,
            PartitionType::Monotone,
            PartitionType::Layers,
        ] {
            let mut compact = crate::test_support::flat_compact_heightfield(20.0);
            for z in 0..20 {
                for x in 0..20 {
                    let on_island = islands
                        .iter()
                        .any(|(xs, zs)| xs.contains(&x) && zs.contains(&z));
                    if !on_island {
                        for i in compact.cell_at(x, z).index_range() {
                            compact.areas[i] = AreaType::NOT_WALKABLE;
                        }
                    }
                }
            }
            compact.partition(partition_type, 0, 64, 20).unwrap();

            let kept = |xs: &std::ops::Range<u16>, zs: &std::ops::Range<u16>| {
                let mut count = 0;
                for z in zs.clone() {
                    for x in xs.clone() {
                        for i in compact.cell_at(x, z).index_range() {
                            if compact.spans[i].region.is_region() {
                                count += 1;
                            }
                        }
                    }
                }
                count
            };
            let [(ax, az), (bx, bz), (cx, cz)] = &islands;
            assert_eq!(kept(ax, az), 64, "{partition_type:?}");
            assert_eq!(kept(bx, bz), 0, "{partition_type:?}");
            assert_eq!(kept(cx, cz), 72, "{partition_type:?}");
        }
    }
}
