//! Procedural globe shading.
//!
//! A full-screen quad ray-casts the unit sphere orthographically. The
//! surface is drawn without textures: ocean, polar caps, a graticule, the
//! day/night terminator, an atmosphere rim and a hashed starfield.

use eframe::glow;
use glow::HasContext as _;
use nalgebra::Matrix3;

use crate::render::{link_program, mat3_columns, RenderError};

const VERTEX_SHADER: &str = r#"
    const vec2 verts[4] = vec2[4](
        vec2(-1.0, -1.0),
        vec2( 1.0, -1.0),
        vec2(-1.0,  1.0),
        vec2( 1.0,  1.0)
    );
    out vec2 v_uv;
    void main() {
        v_uv = verts[gl_VertexID] * 0.5 + 0.5;
        gl_Position = vec4(verts[gl_VertexID], 0.0, 1.0);
    }
"#;

const FRAGMENT_SHADER: &str = r#"
    precision highp float;
    in vec2 v_uv;
    out vec4 out_color;

    uniform mat3 u_inv_rotation;
    uniform float u_aspect;
    uniform float u_scale;
    uniform float u_show_day_night;
    uniform float u_show_grid;
    uniform float u_show_stars;
    uniform vec3 u_sun_dir;
    uniform vec3 u_bg_color;

    const float PI = 3.14159265359;
    const vec3 OCEAN = vec3(0.05, 0.18, 0.38);
    const vec3 ICE = vec3(0.82, 0.88, 0.93);
    const vec3 NIGHT = vec3(0.01, 0.02, 0.06);
    const vec3 GRID = vec3(0.35, 0.55, 0.75);
    const vec3 ATMO_COLOR = vec3(0.4, 0.7, 1.0);
    const float ATMO_THICKNESS = 0.06;
    const float GRID_STEP = PI / 12.0;

    float hash(vec3 p) {
        p = fract(p * 0.3183099 + 0.1);
        p *= 17.0;
        return fract(p.x * p.y * p.z * (p.x + p.y + p.z));
    }

    float grid_line(float angle, float width) {
        float f = abs(fract(angle / GRID_STEP + 0.5) - 0.5) * GRID_STEP;
        return 1.0 - smoothstep(0.0, width, f);
    }

    void main() {
        vec2 centered = (v_uv - 0.5) * 2.0;
        centered.x *= max(u_aspect, 1.0);
        centered.y *= max(1.0 / u_aspect, 1.0);
        centered /= u_scale;

        float r2 = dot(centered, centered);
        vec3 D = u_inv_rotation * vec3(0.0, 0.0, -1.0);

        if (r2 >= 1.0) {
            vec3 bg = vec3(0.0);
            float bg_alpha = 0.0;
            if (u_show_stars > 0.5) {
                vec2 sp = (v_uv - 0.5) * 2.0;
                sp.x *= u_aspect;
                vec3 dir = u_inv_rotation * normalize(vec3(sp, -2.0));
                vec3 cell = floor(dir * 220.0);
                float h = hash(cell);
                float star = step(0.9975, h) * (0.4 + 0.6 * hash(cell + 7.0));
                bg = vec3(star);
                bg_alpha = star;
            }
            float screen_dist = sqrt(r2);
            float atmo_outer = 1.0 + ATMO_THICKNESS;
            if (screen_dist < atmo_outer) {
                float depth = clamp((screen_dist - 1.0) / ATMO_THICKNESS, 0.0, 1.0);
                float glow = pow(1.0 - depth, 2.0) * 0.8;
                bg = bg * (1.0 - glow) + ATMO_COLOR * glow;
                bg_alpha = max(bg_alpha, glow);
            }
            out_color = vec4(mix(u_bg_color, bg, bg_alpha), 1.0);
            return;
        }

        vec3 normal = u_inv_rotation * vec3(centered, sqrt(1.0 - r2));
        float lat = asin(clamp(normal.y, -1.0, 1.0));
        float lon = atan(-normal.x, -normal.z);

        vec3 surface = mix(OCEAN, ICE, smoothstep(1.15, 1.25, abs(lat)));
        if (u_show_grid > 0.5) {
            float line = max(grid_line(lat, 0.004), grid_line(lon, 0.004 / max(cos(lat), 0.05)));
            surface = mix(surface, GRID, line * 0.6);
        }

        vec3 color;
        float sun_dot = dot(normal, u_sun_dir);
        if (u_show_day_night > 0.5) {
            float day_factor = smoothstep(-0.1, 0.1, sun_dot);
            vec3 lit_day = surface * (0.2 + 0.8 * max(sun_dot, 0.0));
            color = mix(NIGHT + surface * 0.08, lit_day, day_factor);
        } else {
            color = surface * (0.3 + 0.7 * max(dot(normal, -D), 0.0));
        }

        float fresnel = pow(1.0 - max(dot(normal, -D), 0.0), 3.0);
        float atmo_sun = u_show_day_night > 0.5 ? max(sun_dot + 0.3, 0.0) : 1.0;
        color = mix(color, ATMO_COLOR * atmo_sun, fresnel * 0.6);

        out_color = vec4(color, 1.0);
    }
"#;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobeParams {
    pub show_day_night: bool,
    pub show_grid: bool,
    pub show_stars: bool,
    pub sun_dir: [f32; 3],
    pub bg_color: [f32; 3],
}

pub struct GlobeRenderer {
    program: glow::Program,
    vertex_array: glow::VertexArray,
}

impl GlobeRenderer {
    pub fn new(gl: &glow::Context) -> Result<Self, RenderError> {
        unsafe {
            let program = link_program(gl, VERTEX_SHADER, FRAGMENT_SHADER)?;
            let vertex_array = gl.create_vertex_array().map_err(|e| RenderError::Create("vertex array", e))?;
            Ok(Self { program, vertex_array })
        }
    }

    pub fn paint(
        &self,
        gl: &glow::Context,
        inv_rotation: &Matrix3<f64>,
        aspect: f32,
        scale: f32,
        params: &GlobeParams,
    ) {
        let flag = |on: bool| if on { 1.0 } else { 0.0 };
        unsafe {
            gl.use_program(Some(self.program));
            gl.bind_vertex_array(Some(self.vertex_array));

            gl.uniform_matrix_3_f32_slice(
                gl.get_uniform_location(self.program, "u_inv_rotation").as_ref(),
                false,
                &mat3_columns(inv_rotation),
            );
            gl.uniform_1_f32(gl.get_uniform_location(self.program, "u_aspect").as_ref(), aspect);
            gl.uniform_1_f32(gl.get_uniform_location(self.program, "u_scale").as_ref(), scale);
            gl.uniform_1_f32(gl.get_uniform_location(self.program, "u_show_day_night").as_ref(), flag(params.show_day_night));
            gl.uniform_1_f32(gl.get_uniform_location(self.program, "u_show_grid").as_ref(), flag(params.show_grid));
            gl.uniform_1_f32(gl.get_uniform_location(self.program, "u_show_stars").as_ref(), flag(params.show_stars));
            let [sx, sy, sz] = params.sun_dir;
            gl.uniform_3_f32(gl.get_uniform_location(self.program, "u_sun_dir").as_ref(), sx, sy, sz);
            let [br, bg, bb] = params.bg_color;
            gl.uniform_3_f32(gl.get_uniform_location(self.program, "u_bg_color").as_ref(), br, bg, bb);

            gl.disable(glow::BLEND);
            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
            gl.bind_vertex_array(None);
        }
    }

    pub fn destroy(&self, gl: &glow::Context) {
        unsafe {
            gl.delete_program(self.program);
            gl.delete_vertex_array(self.vertex_array);
        }
    }
}
