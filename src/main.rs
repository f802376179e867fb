use heightmap_terrain::{TerrainConfig, TerrainPlugin};

use bevy::prelude::*;
use bevy_fly_camera::{FlyCamera, FlyCameraPlugin};

fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => match TerrainConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        },
        None => TerrainConfig::default(),
    };

    let start_height = config.height_scale * 2.;

    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugin(FlyCameraPlugin)
        .add_plugin(TerrainPlugin { config })
        .add_startup_system(move |mut commands: Commands| add_camera(&mut commands, start_height))
        .add_startup_system(add_lights)
        .run();
}

fn add_camera(commands: &mut Commands, start_height: f32) {
    commands
        .spawn(Camera3dBundle {
            transform: Transform::from_translation(Vec3 {
                x: 0.0,
                y: start_height,
                z: 30.0,
            })
            .looking_at(Vec3::ZERO, Vec3::Y),
            ..default()
        })
        .insert(FlyCamera::default());
}

fn add_lights(mut commands: Commands) {
    commands.insert_resource(AmbientLight {
        color: Color::WHITE,
        brightness: 0.1,
    });

    commands.spawn(DirectionalLightBundle {
        directional_light: DirectionalLight {
            illuminance: 10000.,
            shadows_enabled: false,
            ..default()
        },
        transform: Transform::from_rotation(Quat::from_rotation_x(-0.25 * std::f32::consts::PI)),
        ..default()
    });
}
