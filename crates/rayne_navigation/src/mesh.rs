//! Generation of a navigation mesh from host geometry.

use std::{fs::File, io::BufWriter, path::Path, sync::Arc, time::Instant};

use anyhow::Context as _;
use rayne_detour::{NavMesh, NavMeshCreateParams, PolyFlags, VERTS_PER_POLYGON};
use rayne_recast::{
    AreaType, DetailPolygonMesh, HeightfieldBuilder, NavmeshConfigBuilder, PartitionType,
    PolygonMesh,
};

use crate::{
    BuildError, BuildLog, BuildTimings, GeometryCollector, LogCategory, MeshSource, TimerCategory,
};

/// A navigation mesh generated from host geometry.
///
/// Holds the build settings and the results of the last successful build: the polygon mesh, its
/// height detail and, if the settings allow at most [`VERTS_PER_POLYGON`] vertices per polygon,
/// the runtime [`NavMesh`] that [`Path`](crate::Path)s query.
#[derive(Debug, Clone, Default)]
pub struct NavigationMesh {
    /// The settings used by the next build. The bounds are taken from the input geometry.
    pub settings: NavmeshConfigBuilder,
    poly_mesh: Option<PolygonMesh>,
    detail_mesh: Option<DetailPolygonMesh>,
    nav_mesh: Option<Arc<NavMesh>>,
    timings: BuildTimings,
}

impl NavigationMesh {
    /// Creates a navigation mesh that has not been built yet.
    pub fn new(settings: NavmeshConfigBuilder) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Rebuilds the navigation mesh from a single mesh. See [`NavigationMesh::generate_from_models`].
    pub fn generate_from_model(
        &mut self,
        model: &dyn MeshSource,
        log: &dyn BuildLog,
    ) -> Result<(), BuildError> {
        self.generate_from_models(&[model], log)
    }

    /// Rebuilds the navigation mesh from the triangles of all `models`.
    ///
    /// The results of the previous build are dropped first. Progress and failures are reported to `log`.
    /// If a stage after the polygon mesh fails, the polygon mesh of this build is kept.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::EmptyInput`] if there is no geometry, and otherwise the error of the first
    /// stage that failed.
    pub fn generate_from_models(
        &mut self,
        models: &[&dyn MeshSource],
        log: &dyn BuildLog,
    ) -> Result<(), BuildError> {
        self.cleanup();
        let total = Instant::now();
        let mut timings = BuildTimings::default();

        let geometry = GeometryCollector::collect(models)?;
        let settings = NavmeshConfigBuilder {
            aabb: geometry.aabb,
            ..self.settings.clone()
        };
        let config = settings.clone().build();

        log.log(LogCategory::Progress, "Building navigation:");
        log.log(
            LogCategory::Progress,
            &format!(" - {} x {} cells", config.width, config.height),
        );
        log.log(
            LogCategory::Progress,
            &format!(
                " - {:.1}K verts, {:.1}K tris",
                geometry.vertex_count() as f32 / 1000.0,
                geometry.triangle_count() as f32 / 1000.0
            ),
        );

        let mut heightfield = HeightfieldBuilder {
            aabb: config.aabb,
            cell_size: config.cell_size,
            cell_height: config.cell_height,
        }
        .build()
        .map_err(fail(log, "Could not create solid heightfield."))?;

        let mut trimesh = geometry.trimesh;
        timings
            .time(TimerCategory::Rasterization, || {
                trimesh.mark_walkable_triangles(config.walkable_slope_angle);
                heightfield.rasterize_triangles(&trimesh, config.walkable_climb)
            })
            .map_err(fail(log, "Could not rasterize triangles."))?;
        drop(trimesh);

        timings.time(TimerCategory::Filtering, || {
            heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
            heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
            heightfield.filter_walkable_low_height_spans(config.walkable_height);
        });

        let mut compact = timings
            .time(TimerCategory::Compaction, || {
                heightfield.into_compact(config.walkable_height, config.walkable_climb)
            })
            .map_err(fail(log, "Could not build compact data."))?;

        timings.time(TimerCategory::Erosion, || {
            compact.erode_walkable_area(config.walkable_radius)
        });

        // The whole input is a single tile, so no border is reserved around the regions.
        let regions = match config.partition_type {
            PartitionType::Watershed => {
                timings.time(TimerCategory::DistanceField, || compact.build_distance_field());
                timings
                    .time(TimerCategory::Regions, || {
                        compact.build_regions(0, config.min_region_area, config.merge_region_area)
                    })
                    .map_err(fail(log, "Could not build watershed regions."))
            }
            PartitionType::Monotone => timings
                .time(TimerCategory::Regions, || {
                    compact.build_regions_monotone(
                        0,
                        config.min_region_area,
                        config.merge_region_area,
                    )
                })
                .map_err(fail(log, "Could not build monotone regions.")),
            PartitionType::Layers => timings
                .time(TimerCategory::Regions, || {
                    compact.build_layer_regions(0, config.min_region_area)
                })
                .map_err(fail(log, "Could not build layer regions.")),
        };
        regions?;

        let contours = timings
            .time(TimerCategory::Contours, || {
                compact.build_contours(
                    config.max_simplification_error,
                    config.max_edge_len,
                    config.contour_flags,
                )
            })
            .map_err(fail(log, "Could not create contours."))?;

        let poly_mesh = timings
            .time(TimerCategory::PolyMesh, || {
                contours.into_polygon_mesh(config.max_vertices_per_polygon)
            })
            .map_err(fail(log, "Could not triangulate contours."))?;
        let poly_mesh = self.poly_mesh.insert(poly_mesh);

        let detail_mesh = timings
            .time(TimerCategory::DetailMesh, || {
                DetailPolygonMesh::new(
                    poly_mesh,
                    &compact,
                    config.detail_sample_dist,
                    config.detail_sample_max_error,
                )
            })
            .map_err(fail(log, "Could not build detail mesh."))?;
        drop(compact);
        let detail_mesh = self.detail_mesh.insert(detail_mesh);

        if config.max_vertices_per_polygon as usize <= VERTS_PER_POLYGON {
            // Every polygon is plain walkable ground.
            poly_mesh.areas.fill(AreaType(0));
            poly_mesh.flags.fill(PolyFlags::WALK.bits());

            let params = NavMeshCreateParams {
                walkable_height: settings.agent_height,
                walkable_radius: settings.agent_radius,
                walkable_climb: settings.agent_max_climb,
                cell_size: config.cell_size,
                cell_height: config.cell_height,
                ..NavMeshCreateParams::new(poly_mesh, detail_mesh)
            };
            let nav_mesh = timings
                .time(TimerCategory::NavMesh, || NavMesh::new(&params))
                .map_err(|error| {
                    log.log(LogCategory::Error, "Could not build Detour navmesh.");
                    BuildError::from(error)
                })?;
            self.nav_mesh = Some(Arc::new(nav_mesh));
        } else {
            tracing::debug!(
                "Skipping the runtime navmesh: {} vertices per polygon exceed the limit of {VERTS_PER_POLYGON}",
                config.max_vertices_per_polygon
            );
        }

        timings.record(TimerCategory::Total, total.elapsed());
        log.log(
            LogCategory::Progress,
            &format!(
                ">> Polymesh: {} vertices  {} polygons",
                poly_mesh.vertices.len(),
                poly_mesh.polygon_count()
            ),
        );
        timings.report(log);
        self.timings = timings;
        Ok(())
    }

    /// Drops the results of the last build.
    pub fn cleanup(&mut self) {
        self.poly_mesh = None;
        self.detail_mesh = None;
        self.nav_mesh = None;
        self.timings = BuildTimings::default();
    }

    /// The polygon mesh of the last build.
    #[inline]
    pub fn poly_mesh(&self) -> Option<&PolygonMesh> {
        self.poly_mesh.as_ref()
    }

    /// The height detail of the last build.
    #[inline]
    pub fn detail_mesh(&self) -> Option<&DetailPolygonMesh> {
        self.detail_mesh.as_ref()
    }

    /// The runtime navigation mesh of the last build.
    #[inline]
    pub fn nav_mesh(&self) -> Option<&Arc<NavMesh>> {
        self.nav_mesh.as_ref()
    }

    /// How long the stages of the last successful build took.
    #[inline]
    pub fn timings(&self) -> &BuildTimings {
        &self.timings
    }

    /// Writes the detail mesh to `path` as Wavefront OBJ, replacing the file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing has been built yet or the file cannot be written.
    pub fn dump_to_obj(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let detail_mesh = self
            .detail_mesh
            .as_ref()
            .context("The navigation mesh has no detail mesh to dump")?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        detail_mesh
            .write_obj(&mut writer)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Logs `message` as the failure of a build stage and converts the stage's error.
fn fail<'a, E: Into<BuildError>>(
    log: &'a dyn BuildLog,
    message: &'static str,
) -> impl FnOnce(E) -> BuildError + 'a {
    move |error| {
        log.log(LogCategory::Error, &format!("buildNavigation: {message}"));
        error.into()
    }
}
