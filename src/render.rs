//! GPU point rendering of the satellite layer.
//!
//! Both halves of the double buffer live in vertex buffers; the vertex
//! shader blends them with `u_blend`, so the CPU only touches vertex data
//! when a new batch is installed.

use eframe::glow;
use glow::HasContext as _;
use nalgebra::Matrix3;
use thiserror::Error;

use crate::buffers::FrameView;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot create {0}: {1}")]
    Create(&'static str, String),
    #[error("failed to compile shader: {0}")]
    Compile(String),
    #[error("failed to link program: {0}")]
    Link(String),
}

pub(crate) fn shader_version() -> &'static str {
    if cfg!(target_arch = "wasm32") {
        "#version 300 es"
    } else {
        "#version 330"
    }
}

/// Compiles and links a vertex/fragment pair. Shaders are released once
/// linked.
pub(crate) unsafe fn link_program(
    gl: &glow::Context,
    vertex_shader_source: &str,
    fragment_shader_source: &str,
) -> Result<glow::Program, RenderError> {
    let program = gl.create_program().map_err(|e| RenderError::Create("program", e))?;
    let shader_sources = [
        (glow::VERTEX_SHADER, vertex_shader_source),
        (glow::FRAGMENT_SHADER, fragment_shader_source),
    ];

    let mut shaders = Vec::with_capacity(shader_sources.len());
    for (shader_type, shader_source) in shader_sources {
        let shader = gl.create_shader(shader_type).map_err(|e| RenderError::Create("shader", e))?;
        gl.shader_source(shader, &format!("{}\n{shader_source}", shader_version()));
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            gl.delete_program(program);
            return Err(RenderError::Compile(log));
        }
        gl.attach_shader(program, shader);
        shaders.push(shader);
    }

    gl.link_program(program);
    let linked = gl.get_program_link_status(program);
    for shader in shaders {
        gl.detach_shader(program, shader);
        gl.delete_shader(shader);
    }
    if !linked {
        let log = gl.get_program_info_log(program);
        gl.delete_program(program);
        return Err(RenderError::Link(log));
    }
    Ok(program)
}

/// Column-major upload order for `uniform_matrix_3_f32_slice`.
pub(crate) fn mat3_columns(m: &Matrix3<f64>) -> [f32; 9] {
    [
        m[(0, 0)] as f32, m[(1, 0)] as f32, m[(2, 0)] as f32,
        m[(0, 1)] as f32, m[(1, 1)] as f32, m[(2, 1)] as f32,
        m[(0, 2)] as f32, m[(1, 2)] as f32, m[(2, 2)] as f32,
    ]
}

const VERTEX_SHADER: &str = r#"
    in vec3 a_prev;
    in vec3 a_next;
    uniform float u_blend;
    uniform mat3 u_rotation;
    uniform float u_scale;
    uniform float u_aspect;
    uniform float u_point_size;
    out float v_facing;

    void main() {
        vec3 p = a_prev * (1.0 - u_blend) + a_next * u_blend;
        vec3 v = u_rotation * p;
        float r2 = dot(v.xy, v.xy);
        bool hidden = r2 < 1.0 && v.z < sqrt(max(1.0 - r2, 0.0));

        vec2 ndc = v.xy * u_scale;
        ndc.x /= max(u_aspect, 1.0);
        ndc.y /= max(1.0 / u_aspect, 1.0);

        gl_Position = hidden ? vec4(2.0, 2.0, 2.0, 1.0) : vec4(ndc, 0.0, 1.0);
        gl_PointSize = u_point_size;
        v_facing = clamp(v.z / max(length(p), 1e-6), 0.0, 1.0);
    }
"#;

const FRAGMENT_SHADER: &str = r#"
    precision highp float;
    in float v_facing;
    out vec4 out_color;
    uniform vec3 u_color;

    void main() {
        vec2 c = gl_PointCoord * 2.0 - 1.0;
        float d = dot(c, c);
        if (d > 1.0) {
            discard;
        }
        float edge = 1.0 - smoothstep(0.55, 1.0, d);
        vec3 color = u_color * (0.65 + 0.35 * v_facing);
        out_color = vec4(color, edge);
    }
"#;

/// Owned copy of a [`FrameView`]'s halves, handed to the paint callback
/// when the generation changes.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameUpload {
    pub generation: u64,
    pub prev: Vec<f32>,
    pub next: Vec<f32>,
}

impl FrameUpload {
    pub fn from_view(view: &FrameView<'_>) -> Self {
        Self { generation: view.generation, prev: view.prev.to_vec(), next: view.next.to_vec() }
    }
}

pub const SATELLITE_COLOR: [f32; 3] = [1.0, 0.82, 0.35];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSetParams {
    pub visible: bool,
    pub point_size: f32,
}

impl Default for RenderSetParams {
    fn default() -> Self {
        Self { visible: true, point_size: 3.0 }
    }
}

pub struct SatelliteRenderer {
    program: glow::Program,
    vertex_array: glow::VertexArray,
    prev_buffer: glow::Buffer,
    next_buffer: glow::Buffer,
    uploaded_generation: Option<u64>,
    point_count: usize,
}

impl SatelliteRenderer {
    pub fn new(gl: &glow::Context) -> Result<Self, RenderError> {
        unsafe {
            let program = link_program(gl, VERTEX_SHADER, FRAGMENT_SHADER)?;
            let vertex_array = gl.create_vertex_array().map_err(|e| RenderError::Create("vertex array", e))?;
            let prev_buffer = gl.create_buffer().map_err(|e| RenderError::Create("buffer", e))?;
            let next_buffer = gl.create_buffer().map_err(|e| RenderError::Create("buffer", e))?;

            gl.bind_vertex_array(Some(vertex_array));
            for (name, buffer) in [("a_prev", prev_buffer), ("a_next", next_buffer)] {
                if let Some(location) = gl.get_attrib_location(program, name) {
                    gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
                    gl.enable_vertex_attrib_array(location);
                    gl.vertex_attrib_pointer_f32(location, 3, glow::FLOAT, false, 0, 0);
                }
            }
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);

            Ok(Self {
                program,
                vertex_array,
                prev_buffer,
                next_buffer,
                uploaded_generation: None,
                point_count: 0,
            })
        }
    }

    pub fn uploaded_generation(&self) -> Option<u64> {
        self.uploaded_generation
    }

    /// Replaces both halves; a no-op when this generation is already on
    /// the GPU.
    pub fn upload(&mut self, gl: &glow::Context, upload: &FrameUpload) {
        if self.uploaded_generation == Some(upload.generation) {
            return;
        }
        unsafe {
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.prev_buffer));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(&upload.prev), glow::DYNAMIC_DRAW);
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.next_buffer));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(&upload.next), glow::DYNAMIC_DRAW);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
        self.uploaded_generation = Some(upload.generation);
        self.point_count = upload.prev.len() / 3;
    }

    #[allow(clippy::too_many_arguments)]
    pub fn paint(
        &mut self,
        gl: &glow::Context,
        blend: f32,
        params: RenderSetParams,
        rotation: &Matrix3<f64>,
        aspect: f32,
        scale: f32,
        pixels_per_point: f32,
    ) {
        if !params.visible || self.point_count == 0 {
            return;
        }

        unsafe {
            gl.use_program(Some(self.program));
            gl.bind_vertex_array(Some(self.vertex_array));

            gl.uniform_1_f32(gl.get_uniform_location(self.program, "u_blend").as_ref(), blend);
            gl.uniform_matrix_3_f32_slice(
                gl.get_uniform_location(self.program, "u_rotation").as_ref(),
                false,
                &mat3_columns(rotation),
            );
            gl.uniform_1_f32(gl.get_uniform_location(self.program, "u_scale").as_ref(), scale);
            gl.uniform_1_f32(gl.get_uniform_location(self.program, "u_aspect").as_ref(), aspect);
            gl.uniform_1_f32(
                gl.get_uniform_location(self.program, "u_point_size").as_ref(),
                params.point_size * pixels_per_point,
            );
            let [r, g, b] = SATELLITE_COLOR;
            gl.uniform_3_f32(gl.get_uniform_location(self.program, "u_color").as_ref(), r, g, b);

            if !cfg!(target_arch = "wasm32") {
                gl.enable(glow::PROGRAM_POINT_SIZE);
            }
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);

            gl.draw_arrays(glow::POINTS, 0, self.point_count as i32);
            gl.bind_vertex_array(None);
        }
    }

    pub fn destroy(&self, gl: &glow::Context) {
        unsafe {
            gl.delete_program(self.program);
            gl.delete_vertex_array(self.vertex_array);
            gl.delete_buffer(self.prev_buffer);
            gl.delete_buffer(self.next_buffer);
        }
    }
}
