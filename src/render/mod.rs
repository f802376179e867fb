//! Draws the terrain surface from the device mesh buffers.
//!
//! The surface entity carries a host [`Mesh`] only for its transform, bounds
//! and vertex layout. The draw call binds the wgpu buffers owned by the
//! terrain's [`RenderMeshDevice`](crate::gpu::RenderMeshDevice): positions,
//! the normals written by the normal pass, band colors and indices.

use bevy::{
    core_pipeline::core_3d::Opaque3d,
    ecs::system::{lifetimeless::SRes, SystemParamItem},
    pbr::{MeshPipeline, MeshPipelineKey, MeshUniform, SetMeshBindGroup, SetMeshViewBindGroup},
    prelude::*,
    reflect::TypeUuid,
    render::{
        extract_component::ExtractComponentPlugin,
        extract_resource::{ExtractResource, ExtractResourcePlugin},
        mesh::MeshVertexBufferLayout,
        render_asset::RenderAssets,
        render_phase::{
            AddRenderCommand, DrawFunctions, PhaseItem, RenderCommand, RenderCommandResult,
            RenderPhase, SetItemPipeline, TrackedRenderPass,
        },
        render_resource::*,
        view::ExtractedView,
        RenderApp, RenderSet,
    },
};

use crate::gpu::DeviceMeshBuffers;
use crate::plugin::TerrainSurface;

pub const TERRAIN_SHADER_HANDLE: HandleUntyped =
    HandleUntyped::weak_from_u64(Shader::TYPE_UUID, 0x6d2f_91c4_3b7a_4e05);

/// Device buffers of the current terrain mesh, mirrored into the render
/// world every time they change.
#[derive(Resource, Clone, Default, ExtractResource)]
pub struct TerrainDrawBuffers(pub Option<DeviceMeshBuffers>);

pub struct TerrainRenderPlugin;

impl Plugin for TerrainRenderPlugin {
    fn build(&self, app: &mut App) {
        let mut shaders = app.world.resource_mut::<Assets<Shader>>();
        shaders.set_untracked(
            TERRAIN_SHADER_HANDLE,
            Shader::from_wgsl(include_str!("terrain.wgsl")),
        );

        app.init_resource::<TerrainDrawBuffers>()
            .add_plugin(ExtractResourcePlugin::<TerrainDrawBuffers>::default())
            .add_plugin(ExtractComponentPlugin::<TerrainSurface>::default());

        let Ok(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .add_render_command::<Opaque3d, DrawTerrain>()
            .init_resource::<TerrainPipeline>()
            .init_resource::<SpecializedMeshPipelines<TerrainPipeline>>()
            .add_system(queue_terrain.in_set(RenderSet::Queue));
    }
}

#[derive(Resource)]
pub struct TerrainPipeline {
    shader: Handle<Shader>,
    mesh_pipeline: MeshPipeline,
}

impl FromWorld for TerrainPipeline {
    fn from_world(world: &mut World) -> Self {
        Self {
            shader: TERRAIN_SHADER_HANDLE.typed::<Shader>(),
            mesh_pipeline: world.resource::<MeshPipeline>().clone(),
        }
    }
}

/// One tightly packed `vec3<f32>` per vertex.
fn float3_slot(shader_location: u32) -> VertexBufferLayout {
    VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as u64,
        step_mode: VertexStepMode::Vertex,
        attributes: vec![VertexAttribute {
            format: VertexFormat::Float32x3,
            offset: 0,
            shader_location,
        }],
    }
}

impl SpecializedMeshPipeline for TerrainPipeline {
    type Key = MeshPipelineKey;

    fn specialize(
        &self,
        key: Self::Key,
        layout: &MeshVertexBufferLayout,
    ) -> Result<RenderPipelineDescriptor, SpecializedMeshPipelineError> {
        let mut descriptor = self.mesh_pipeline.specialize(key, layout)?;
        descriptor.label = Some("terrain_pipeline".into());

        // Positions, normals and colors live in separate device buffers
        descriptor.vertex.shader = self.shader.clone();
        descriptor.vertex.buffers = vec![float3_slot(0), float3_slot(1), float3_slot(2)];

        if let Some(fragment) = descriptor.fragment.as_mut() {
            fragment.shader = self.shader.clone();
        }

        Ok(descriptor)
    }
}

#[allow(clippy::too_many_arguments)]
fn queue_terrain(
    opaque_draw_functions: Res<DrawFunctions<Opaque3d>>,
    terrain_pipeline: Res<TerrainPipeline>,
    msaa: Res<Msaa>,
    mut pipelines: ResMut<SpecializedMeshPipelines<TerrainPipeline>>,
    pipeline_cache: Res<PipelineCache>,
    meshes: Res<RenderAssets<Mesh>>,
    buffers: Res<TerrainDrawBuffers>,
    surfaces: Query<(Entity, &MeshUniform, &Handle<Mesh>), With<TerrainSurface>>,
    mut views: Query<(&ExtractedView, &mut RenderPhase<Opaque3d>)>,
) {
    if buffers.0.is_none() {
        return;
    }

    let draw_terrain = opaque_draw_functions.read().id::<DrawTerrain>();
    let msaa_key = MeshPipelineKey::from_msaa_samples(msaa.samples());

    for (view, mut opaque_phase) in &mut views {
        let view_key = msaa_key | MeshPipelineKey::from_hdr(view.hdr);
        let rangefinder = view.rangefinder3d();

        for (entity, mesh_uniform, mesh_handle) in &surfaces {
            let Some(mesh) = meshes.get(mesh_handle) else {
                continue;
            };

            let key =
                view_key | MeshPipelineKey::from_primitive_topology(mesh.primitive_topology);
            let pipeline =
                match pipelines.specialize(&pipeline_cache, &terrain_pipeline, key, &mesh.layout) {
                    Ok(pipeline) => pipeline,
                    Err(err) => {
                        error!("terrain pipeline: {err:?}");
                        continue;
                    }
                };

            opaque_phase.add(Opaque3d {
                entity,
                pipeline,
                draw_function: draw_terrain,
                distance: rangefinder.distance(&mesh_uniform.transform),
            });
        }
    }
}

type DrawTerrain = (
    SetItemPipeline,
    SetMeshViewBindGroup<0>,
    SetMeshBindGroup<1>,
    DrawTerrainBuffers,
);

pub struct DrawTerrainBuffers;

impl<P: PhaseItem> RenderCommand<P> for DrawTerrainBuffers {
    type Param = SRes<TerrainDrawBuffers>;
    type ViewWorldQuery = ();
    type ItemWorldQuery = ();

    #[inline]
    fn render<'w>(
        _item: &P,
        _view: (),
        _entity: (),
        buffers: SystemParamItem<'w, '_, Self::Param>,
        pass: &mut TrackedRenderPass<'w>,
    ) -> RenderCommandResult {
        let Some(buffers) = &buffers.into_inner().0 else {
            return RenderCommandResult::Failure;
        };
        if buffers.index_count == 0 {
            return RenderCommandResult::Success;
        }

        pass.set_vertex_buffer(0, buffers.positions.slice(..));
        pass.set_vertex_buffer(1, buffers.normals.slice(..));
        pass.set_vertex_buffer(2, buffers.colors.slice(..));
        pass.set_index_buffer(buffers.indices.slice(..), 0, IndexFormat::Uint32);
        pass.draw_indexed(0..buffers.index_count, 0, 0..1);

        RenderCommandResult::Success
    }
}
