use bevy::prelude::*;
use bevy::render::extract_component::ExtractComponent;
use bevy::render::renderer::{RenderDevice, RenderQueue};

use crate::gpu::{HostDevice, MeshDevice, RenderMeshDevice};
use crate::render::{TerrainDrawBuffers, TerrainRenderPlugin};
use crate::{NormalMode, Terrain, TerrainConfig};

pub struct TerrainPlugin {
    pub config: TerrainConfig,
}

impl Plugin for TerrainPlugin {
    fn build(&self, app: &mut App) {
        let device: Box<dyn MeshDevice> = match (
            app.world.get_resource::<RenderDevice>(),
            app.world.get_resource::<RenderQueue>(),
        ) {
            (Some(device), Some(queue)) => {
                Box::new(RenderMeshDevice::new(device.clone(), queue.clone()))
            }
            _ => {
                warn!("no render device; terrain buffers stay on the host and are not drawn");
                Box::new(HostDevice::new())
            }
        };

        app.insert_resource(TerrainResource(Terrain::with_device(
            self.config.clone(),
            device,
        )))
        .add_plugin(TerrainRenderPlugin)
        .add_startup_system(setup_terrain)
        .add_system(toggle_terrain_debug)
        .add_system(update_terrain_normals.after(toggle_terrain_debug))
        .add_system(sync_draw_buffers.after(update_terrain_normals));
    }
}

#[derive(Resource)]
pub struct TerrainResource(pub Terrain);

/// The surface entity; drawn from the device buffers in the render world.
#[derive(Component, Clone, Copy, Default, ExtractComponent)]
pub struct TerrainSurface;

#[derive(Component)]
pub struct TerrainNormalLines;

fn setup_terrain(
    mut commands: Commands,
    mut terrain: ResMut<TerrainResource>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let terrain = &mut terrain.0;
    let path = terrain.config().heightmap.clone();

    // Errors are logged by the terrain; the scene just stays empty
    if terrain.load_heightmap(&path).is_err() || terrain.generate().is_err() {
        return;
    }

    // The host mesh supplies transform, bounds and vertex layout only
    let render = terrain.render();
    commands.spawn((
        meshes.add(render.surface),
        SpatialBundle::default(),
        TerrainSurface,
    ));

    let lines = terrain
        .mesh()
        .normal_lines_mesh(terrain.config().normal_line_length);
    let visibility = if terrain.show_normals() {
        Visibility::Visible
    } else {
        Visibility::Hidden
    };

    commands
        .spawn(PbrBundle {
            mesh: meshes.add(lines),
            material: materials.add(StandardMaterial {
                base_color: Color::RED,
                unlit: true,
                ..default()
            }),
            visibility,
            ..default()
        })
        .insert(TerrainNormalLines);
}

/// `N` switches the normal strategy, `L` toggles the debug normal lines.
fn toggle_terrain_debug(
    keys: Res<Input<KeyCode>>,
    mut terrain: ResMut<TerrainResource>,
    mut lines: Query<&mut Visibility, With<TerrainNormalLines>>,
) {
    let terrain = &mut terrain.0;

    if keys.just_pressed(KeyCode::N) {
        let mode = terrain.normal_mode().toggled();
        terrain.set_normal_mode(mode);
    }

    if keys.just_pressed(KeyCode::L) {
        let show = !terrain.show_normals();
        terrain.set_show_normals(show);
        for mut visibility in lines.iter_mut() {
            *visibility = if show {
                Visibility::Visible
            } else {
                Visibility::Hidden
            };
        }
    }
}

/// Recomputes normals every frame. Both strategies leave the result in the
/// device normal buffer the surface is drawn from.
fn update_terrain_normals(mut terrain: ResMut<TerrainResource>) {
    let terrain = &mut terrain.0;

    if let Err(err) = terrain.compute_normals() {
        warn!("normal pass failed ({:?}): {err}", terrain.normal_mode());
        if terrain.normal_mode() == NormalMode::Parallel {
            terrain.set_normal_mode(NormalMode::Sequential);
        }
    }
}

/// Points the renderer at the current device buffers after a regenerate.
fn sync_draw_buffers(terrain: Res<TerrainResource>, mut draw: ResMut<TerrainDrawBuffers>) {
    let current = terrain.0.gpu().draw_buffers();

    let stale = match (&draw.0, &current) {
        (Some(drawn), Some(current)) => drawn.positions.id() != current.positions.id(),
        (None, None) => false,
        _ => true,
    };

    if stale {
        draw.0 = current;
    }
}
