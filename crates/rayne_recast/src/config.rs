use crate::{Aabb3d, BuildContoursFlags, PartitionType};

/// The voxel-level parameters of a navmesh build. Usually derived from agent-level settings
/// through [`NavmeshConfigBuilder`].
///
/// Units are either voxels (vx) or world units (wu). Voxel sizes are given by
/// [`Self::cell_size`] on the xz-plane and [`Self::cell_height`] on the y-axis, so every
/// parameter in voxels changes its meaning when those two change.
///
/// Not every stage reads every parameter:
/// - rasterization and filtering read the walkable limits,
/// - region partitioning reads the border and area sizes,
/// - contours, polygons and detail meshes read their own error and length bounds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The width of the field along the x-axis. `[Limit: >= 0] [Units: vx]`
    pub width: u16,

    /// The height of the field along the z-axis. `[Limit: >= 0] [Units: vx]`
    pub height: u16,

    /// The size of the non-navigable border around the heightfield. `[Limit: >=0] [Units: vx]`
    ///
    /// Zero for a single mesh covering the whole input. Spans inside the border are painted with
    /// [`RegionId::BORDER_REGION`](crate::RegionId::BORDER_REGION) and never become polygons.
    pub border_size: u16,

    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// Usually a half or a third of the agent radius. Smaller cells give a tighter mesh,
    /// but build time grows quickly while the visible gain shrinks.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// Usually half of [`Self::cell_size`]. Lower it if curbs or stairs leave holes in the mesh.
    pub cell_height: f32,

    /// The field's AABB [Units: wu]
    pub aabb: Aabb3d,

    /// The maximum slope that is considered walkable. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    ///
    /// A triangle is walkable when its normal differs from the up vector by less than this angle.
    pub walkable_slope_angle: f32,

    /// Minimum floor to 'ceiling' height that will still allow the floor area to
    /// be considered walkable. `[Limit: >= 3] [Units: vx]`
    ///
    /// Computed from the agent height `h` as `(h / cell_height).ceil()`.
    pub walkable_height: u16,

    /// Maximum ledge height that is considered to still be traversable. `[Limit: >=0] [Units: vx]`
    ///
    /// Computed from the agent step height as `(max_climb / cell_height).floor()`.
    /// Lets the mesh flow over curbs and up stairs.
    pub walkable_climb: u16,

    /// The distance to erode the walkable area away from obstructions. `[Limit: >=0] [Units: vx]`
    ///
    /// Computed from the agent radius `r` as `(r / cell_size).ceil()`.
    /// With a non-zero radius, an agent whose center stays inside the mesh does not touch walls.
    pub walkable_radius: u16,

    /// The maximum allowed length for contour edges along the border of the mesh. `[Limit: >=0] [Units: vx]`
    ///
    /// Longer wall edges are split, which avoids long thin triangles.
    /// Zero disables splitting.
    pub max_edge_len: u16,

    /// The maximum distance a simplified contour's border edges should deviate
    /// the original raw contour. `[Limit: >=0] [Units: vx]`
    ///
    /// Values in `[1.1, 1.5]` work well. Lower values produce sawtooth edges,
    /// higher values start cutting corners.
    pub max_simplification_error: f32,

    /// The minimum number of cells allowed to form isolated island areas. `[Limit: >=0] [Units: vx]`
    ///
    /// Regions with fewer spans that do not touch the border are removed.
    pub min_region_area: u16,

    /// Any regions with a span count smaller than this value will, if possible,
    /// be merged with larger regions. `[Limit: >=0] [Units: vx]`
    pub merge_region_area: u16,

    /// The maximum number of vertices allowed for polygons generated during the
    /// contour to polygon conversion process. `[Limit: >= 3]`
    pub max_vertices_per_polygon: u16,

    /// Sets the sampling distance to use when generating the detail mesh.
    /// (For height detail only.) `[Limits: 0 or >= 0.9] [Units: wu]`
    pub detail_sample_dist: f32,

    /// The maximum distance the detail mesh surface should deviate from heightfield
    /// data. (For height detail only.) `[Limit: >=0] [Units: wu]`
    pub detail_sample_max_error: f32,

    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation process.
    pub contour_flags: BuildContoursFlags,

    /// The algorithm used to partition the walkable surface into regions.
    pub partition_type: PartitionType,
}

/// A builder for [`NavmeshConfig`]. Holds the agent-level settings in world units
/// and converts them to voxels once the bounds of the input are known.
///
/// The default values suit an agent resembling an adult human.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_size: f32,
    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_height: f32,
    /// The height of the agent. `[Limit: > 0] [Units: wu]`
    ///
    /// It's often a good idea to add a little bit of padding to the height. For example,
    /// an agent that is 1.8 world units tall might want to set this value to 2.0 units.
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: > 0] [Units: wu]`
    pub agent_radius: f32,
    /// The highest step the agent can walk up. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// The steepest walkable slope. `[Units: Radians]`
    pub agent_max_slope: f32,
    /// The side length of the smallest region that is kept. Squared into a span count. `[Units: vx]`
    pub region_min_size: f32,
    /// The side length below which regions are merged into neighbours. Squared into a span count. `[Units: vx]`
    pub region_merge_size: f32,
    /// The longest allowed wall edge. `[Units: wu]`
    pub edge_max_len: f32,
    /// The maximum contour simplification error. `[Units: vx]`
    pub edge_max_error: f32,
    /// The maximum number of vertices per polygon.
    pub verts_per_poly: f32,
    /// The detail sampling distance in cells. Values below 0.9 disable sampling.
    pub detail_sample_dist: f32,
    /// The maximum detail error in cell heights.
    pub detail_sample_max_error: f32,
    /// The bounds of the input geometry. `[Units: wu]`
    pub aabb: Aabb3d,
    /// Flags controlling the contour generation.
    pub contour_flags: BuildContoursFlags,
    /// The algorithm used to partition the walkable surface into regions.
    pub partition_type: PartitionType,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6.0,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            aabb: Aabb3d::default(),
            contour_flags: BuildContoursFlags::default(),
            partition_type: PartitionType::default(),
        }
    }
}

impl NavmeshConfigBuilder {
    /// Builds a [`NavmeshConfig`] from the current configuration.
    pub fn build(self) -> NavmeshConfig {
        NavmeshConfig {
            width: ((self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5) as u16,
            height: ((self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5) as u16,
            border_size: 0,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb: self.aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius: (self.agent_radius / self.cell_size).ceil() as u16,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u16,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u16,
            max_vertices_per_polygon: self.verts_per_poly as u16,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                self.cell_size * self.detail_sample_dist
            },
            detail_sample_max_error: self.cell_height * self.detail_sample_max_error,
            contour_flags: self.contour_flags,
            partition_type: self.partition_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn agent_settings_are_converted_to_voxels() {
        let config = NavmeshConfigBuilder {
            aabb: Aabb3d::new(Vec3::new(-5.0, 0.0, -5.0), Vec3::new(5.0, 1.0, 5.0)),
            ..Default::default()
        }
        .build();
        assert_eq!(config.width, 33);
        assert_eq!(config.height, 33);
        assert_eq!(config.walkable_height, 10);
        assert_eq!(config.walkable_climb, 4);
        assert_eq!(config.walkable_radius, 2);
        assert_eq!(config.max_edge_len, 40);
        assert_eq!(config.max_vertices_per_polygon, 6);
        assert_eq!(config.border_size, 0);
        approx::assert_relative_eq!(config.detail_sample_dist, 1.8, epsilon = 1e-5);
        approx::assert_relative_eq!(config.detail_sample_max_error, 0.2);
    }

    #[test]
    fn region_sizes_are_squared() {
        let config = NavmeshConfigBuilder::default().build();
        assert_eq!(config.min_region_area, 64);
        assert_eq!(config.merge_region_area, 400);
    }

    #[test]
    fn low_detail_sample_distance_disables_sampling() {
        let config = NavmeshConfigBuilder {
            detail_sample_dist: 0.5,
            ..Default::default()
        }
        .build();
        assert_eq!(config.detail_sample_dist, 0.0);
    }
}
