//! Demo pass chain: a deferred-style frame on the dummy device.
//!
//! | Pass | Queue | Reads | Writes |
//! |------|-------|-------|--------|
//! | `GBuffer` | graphics | `SceneVertices` | `GBufferAlbedo`, `GBufferNormal`, `Depth` |
//! | `LightCulling` | compute | `Depth` | `LightGrid` |
//! | `Lighting` | graphics | G-buffer, `LightGrid` | `HdrColor` |
//! | `Tonemap` | graphics | `HdrColor` | `LdrColor` |
//! | `CopyToBackBuffer` | copy | `LdrColor` | `BackBuffer` (imported) |
//!
//! `LdrColor` has the G-buffer albedo's footprint, so once lighting is done
//! with the albedo the tonemap output is placed over its memory.

use std::f32::consts::TAU;

use glam::{Mat4, Vec3, Vec4};

use framewright_graphics::backend::TextureHandle;
use framewright_graphics::{
    BufferDescriptor, BufferRef, BufferUsage, FrameGraph, GpuResource, GraphError, PassDesc,
    ResourceState, TextureDescriptor, TextureFormat, TextureRef, TextureUsage,
};

/// Handle of the externally owned back buffer.
pub const BACK_BUFFER: TextureHandle = TextureHandle(u64::MAX);

/// Screen tiles the light grid is built over.
const TILE_SIZE: u32 = 16;

const MAX_LIGHTS: u32 = 64;

/// Per-frame camera block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraConstants {
    /// World to view.
    pub view: Mat4,
    /// View to clip.
    pub proj: Mat4,
    /// World to clip.
    pub view_proj: Mat4,
}

impl CameraConstants {
    /// Camera orbiting the origin, `t` turns around.
    pub fn orbit(t: f32, aspect: f32) -> Self {
        let angle = t * TAU;
        let eye = Vec3::new(angle.cos() * 6.0, 2.5, angle.sin() * 6.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 100.0);
        Self {
            view,
            proj,
            view_proj: proj * view,
        }
    }
}

/// Per-frame light block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightConstants {
    /// Direction the sun light travels, `w` unused.
    pub direction: Vec4,
    /// Linear light color, `w` is intensity.
    pub color: Vec4,
    /// Point lights the culling pass bins.
    pub count: u32,
    pub _pad: [u32; 3],
}

impl Default for LightConstants {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize().extend(0.0),
            color: Vec4::new(1.0, 0.95, 0.9, 1.0),
            count: MAX_LIGHTS,
            _pad: [0; 3],
        }
    }
}

#[derive(Default)]
struct GBufferData {
    vertices: Option<BufferRef>,
    vertex_count: u32,
}

#[derive(Default)]
struct CopyData {
    source: Option<TextureRef>,
    target: Option<TextureRef>,
}

fn target(width: u32, height: u32, format: TextureFormat) -> TextureDescriptor {
    TextureDescriptor::new_2d(
        width,
        height,
        format,
        TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
    )
    .with_state(ResourceState::RenderTarget)
}

/// A unit cube as a triangle list.
fn cube_vertices() -> Vec<Vec3> {
    const FACES: [[usize; 4]; 6] = [
        [0, 1, 3, 2],
        [4, 6, 7, 5],
        [0, 4, 5, 1],
        [2, 3, 7, 6],
        [0, 2, 6, 4],
        [1, 5, 7, 3],
    ];
    let corner = |i: usize| {
        Vec3::new(
            if i & 4 == 0 { -0.5 } else { 0.5 },
            if i & 2 == 0 { -0.5 } else { 0.5 },
            if i & 1 == 0 { -0.5 } else { 0.5 },
        )
    };
    FACES
        .iter()
        .flat_map(|[a, b, c, d]| [*a, *b, *c, *a, *c, *d])
        .map(corner)
        .collect()
}

/// Register the demo passes on `graph` for a `width` x `height` frame.
pub fn add_demo_passes(graph: &mut FrameGraph, width: u32, height: u32) -> Result<(), GraphError> {
    let tiles_x = width.div_ceil(TILE_SIZE);
    let tiles_y = height.div_ceil(TILE_SIZE);

    graph.add_pass::<GBufferData, _, _>(
        PassDesc::graphics("GBuffer", width, height),
        move |data, builder| {
            let vertices = cube_vertices();
            let bytes: Vec<u8> = bytemuck::cast_slice(&vertices).to_vec();
            let desc = BufferDescriptor::new(bytes.len() as u64, BufferUsage::VERTEX | BufferUsage::COPY_DST)
                .with_stride(std::mem::size_of::<Vec3>() as u32)
                .with_state(ResourceState::VertexAndConstant);
            data.vertices = Some(builder.declare_read_buffer_with_data("SceneVertices", desc, bytes));
            data.vertex_count = vertices.len() as u32;

            builder.declare_write_texture("GBufferAlbedo", target(width, height, TextureFormat::Rgba8Unorm));
            builder.declare_write_texture("GBufferNormal", target(width, height, TextureFormat::Rg16Float));
            builder.declare_write_texture(
                "Depth",
                target(width, height, TextureFormat::Depth32Float).with_state(ResourceState::DepthWrite),
            );
        },
        |data, ctx, list| {
            if ctx.constants::<CameraConstants>().is_none() {
                log::trace!("GBuffer: no camera for frame {}", ctx.frame_index());
                return;
            }
            if let Some(vertices) = &data.vertices {
                let _ = ctx.buffer(vertices);
                list.draw(data.vertex_count, 1);
            }
        },
    )?;

    graph.add_pass::<Option<BufferRef>, _, _>(
        PassDesc::compute("LightCulling"),
        move |grid, builder| {
            builder.transition_read_texture("Depth", ResourceState::ShaderResource);
            let desc = BufferDescriptor::new(
                u64::from(tiles_x * tiles_y * MAX_LIGHTS) * 4,
                BufferUsage::STORAGE,
            )
            .with_state(ResourceState::UnorderedAccess);
            *grid = Some(builder.declare_write_buffer("LightGrid", desc));
        },
        move |_, _, list| list.dispatch(tiles_x, tiles_y, 1),
    )?;

    graph.add_pass::<(), _, _>(
        PassDesc::graphics("Lighting", width, height),
        move |_, builder| {
            builder.transition_read_texture("GBufferAlbedo", ResourceState::ShaderResource);
            builder.transition_read_texture("GBufferNormal", ResourceState::ShaderResource);
            builder.transition_read_buffer("LightGrid", ResourceState::ShaderResource);
            builder.declare_write_texture("HdrColor", target(width, height, TextureFormat::Rgba16Float));
        },
        |_, ctx, list| {
            if ctx.constants::<LightConstants>().is_some() {
                list.draw(3, 1);
            }
        },
    )?;

    graph.add_pass::<(), _, _>(
        PassDesc::graphics("Tonemap", width, height),
        move |_, builder| {
            builder.transition_read_texture("HdrColor", ResourceState::ShaderResource);
            let desc = target(width, height, TextureFormat::Rgba8Unorm);
            builder.declare_write_texture("LdrColor", desc);
        },
        |_, _, list| list.draw(3, 1),
    )?;

    graph.add_pass::<CopyData, _, _>(
        PassDesc::copy("CopyToBackBuffer"),
        move |data, builder| {
            let back_buffer = TextureDescriptor::new_2d(
                width,
                height,
                TextureFormat::Bgra8Unorm,
                TextureUsage::COPY_DST,
            )
            .with_state(ResourceState::CopyDst);
            builder.import_texture("BackBuffer", BACK_BUFFER, back_buffer, false);
            data.target = Some(builder.transition_write_texture("BackBuffer", ResourceState::CopyDst));
            data.source = Some(builder.transition_read_texture("LdrColor", ResourceState::CopySrc));
        },
        |data, ctx, list| {
            let (Some(source), Some(target)) = (&data.source, &data.target) else {
                return;
            };
            let (GpuResource::Texture(src), GpuResource::Texture(dst)) =
                (ctx.texture(source).gpu, ctx.texture(target).gpu)
            else {
                unreachable!("texture bound as a buffer");
            };
            list.copy_texture(src, dst);
        },
    )?;

    log::info!("Renderer: registered {} passes at {width}x{height}", graph.pass_count());
    Ok(())
}

/// Stage the constants for the next frame recorded on `thread_index`.
pub fn update_constants(
    graph: &FrameGraph,
    thread_index: usize,
    aspect: f32,
) -> Result<(), GraphError> {
    // The slot's next frame comes one round after the last one it recorded.
    let slot = graph.slot(thread_index)?;
    let frame = slot.frame_index() + graph.frames_in_flight() as u64;
    let camera = CameraConstants::orbit(frame as f32 / 240.0, aspect);
    graph.update_frame_constants(thread_index, &camera)?;
    graph.update_frame_constants(thread_index, &LightConstants::default())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use framewright_graphics::{DummyDevice, EventBus, GraphConfig};

    use super::*;

    fn demo_graph() -> (Arc<DummyDevice>, FrameGraph) {
        let device = Arc::new(DummyDevice::new());
        let config = GraphConfig::default().with_worker_threads(2);
        let mut graph = FrameGraph::new(device.clone(), config, EventBus::new()).unwrap();
        add_demo_passes(&mut graph, 320, 240).unwrap();
        graph.compile().unwrap();
        (device, graph)
    }

    #[test]
    fn test_cube_vertices() {
        let vertices = cube_vertices();
        assert_eq!(vertices.len(), 36);
        assert!(vertices.iter().all(|v| v.abs() == Vec3::splat(0.5)));
    }

    #[test]
    fn test_demo_graph_edges() {
        let (_device, graph) = demo_graph();
        let id = |name| graph.pass_id(name).unwrap();
        let edges = graph.edges();

        assert!(edges.contains(&(id("GBuffer"), id("LightCulling"))));
        assert!(edges.contains(&(id("LightCulling"), id("Lighting"))));
        assert!(edges.contains(&(id("Tonemap"), id("CopyToBackBuffer"))));
        assert!(graph.signals(id("GBuffer")));
        assert_eq!(graph.waits(id("CopyToBackBuffer")), &[id("Tonemap")]);
    }

    #[test]
    fn test_tonemap_output_reuses_albedo_memory() {
        let (_device, graph) = demo_graph();
        for thread_index in 0..3 {
            update_constants(&graph, thread_index, 4.0 / 3.0).unwrap();
            graph.execute(thread_index).unwrap();
        }

        let albedo = graph.pool().find_texture("GBufferAlbedo").unwrap();
        let ldr = graph.pool().find_texture("LdrColor").unwrap();
        assert_eq!(albedo.memory(), ldr.memory());
        assert!(graph.pool().find_texture("BackBuffer").unwrap().is_imported());
    }

    #[test]
    fn test_back_buffer_copy_is_submitted_last() {
        let (device, graph) = demo_graph();
        update_constants(&graph, 0, 1.0).unwrap();
        graph.execute(0).unwrap();

        let names = device.submitted_list_names();
        assert_eq!(names.last().map(String::as_str), Some("CopyToBackBuffer"));
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_orbit_camera_is_consistent() {
        let camera = CameraConstants::orbit(0.25, 16.0 / 9.0);
        assert_eq!(camera.view_proj, camera.proj * camera.view);
    }
}
