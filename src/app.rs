//! Application shell and eframe integration.
//!
//! Owns the satellite subsystem, the camera and the GL renderers, and
//! drives one `poll` of the subsystem per frame.

use std::sync::Arc;

use chrono::Utc;
use eframe::{egui, egui_glow, glow};
use egui::mutex::Mutex;
use nalgebra::Vector3;

use crate::astronomy::sun_direction;
use crate::config::AppConfig;
use crate::globe::{GlobeParams, GlobeRenderer};
use crate::math::Camera;
use crate::pipeline::{PipelineSettings, SatelliteSystem};
use crate::propagation::sgp4_loader;
use crate::render::{FrameUpload, RenderSetParams, SatelliteRenderer, SATELLITE_COLOR};
use crate::tle::TlePreset;

/// Pick radius around the pointer, in points.
const PICK_RADIUS: f32 = 8.0;
const DRAG_SENSITIVITY: f64 = 0.01;

pub(crate) struct ViewState {
    pub(crate) camera: Camera,
    pub(crate) satellites: RenderSetParams,
    pub(crate) show_day_night: bool,
    pub(crate) show_grid: bool,
    pub(crate) show_stars: bool,
    pub(crate) selected: Option<usize>,
    pub(crate) preset: Option<TlePreset>,
}

pub struct App {
    pub(crate) system: SatelliteSystem,
    pub(crate) view: ViewState,
    globe_renderer: Option<Arc<Mutex<GlobeRenderer>>>,
    satellite_renderer: Option<Arc<Mutex<SatelliteRenderer>>>,
}

impl App {
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig) -> Self {
        let (globe_renderer, satellite_renderer) = match cc.gl.as_ref() {
            Some(gl) => create_renderers(gl),
            None => {
                log::warn!("no glow context; drawing with the egui painter");
                (None, None)
            }
        };

        let mut system = SatelliteSystem::new(
            PipelineSettings::from(&config),
            Box::new(config.element_source()),
            sgp4_loader(),
        );
        system.request_population();

        Self {
            system,
            view: ViewState {
                camera: Camera::default(),
                satellites: RenderSetParams { visible: config.show_satellites, point_size: config.point_size },
                show_day_night: true,
                show_grid: true,
                show_stars: true,
                selected: None,
                preset: config.preset(),
            },
            globe_renderer,
            satellite_renderer,
        }
    }

    fn show_globe(&mut self, ui: &mut egui::Ui, now: f64) {
        let (rect, response) = ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
        let camera = &mut self.view.camera;

        if response.dragged() && !response.drag_started() {
            let drag = response.drag_delta();
            let sens = DRAG_SENSITIVITY / camera.zoom.max(1.0);
            camera.drag(drag.x as f64 * sens, drag.y as f64 * sens);
        }
        if response.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                camera.zoom_by(1.0 + scroll as f64 * 0.001);
            }
            if let Some(touch) = ui.input(|i| i.multi_touch()) {
                camera.zoom_by(touch.zoom_delta as f64);
            }
        }
        if response.double_clicked() {
            camera.reset();
        } else if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.view.selected = self.pick(rect, pos, now);
            }
        }

        let aspect = rect.width() / rect.height().max(1.0);
        let bg = ui.visuals().extreme_bg_color;
        let bg_color = [bg.r() as f32 / 255.0, bg.g() as f32 / 255.0, bg.b() as f32 / 255.0];

        match (&self.globe_renderer, &self.satellite_renderer) {
            (Some(globe), Some(satellites)) => {
                let frame = self.system.frame(now);
                let upload = (satellites.lock().uploaded_generation() != Some(frame.generation))
                    .then(|| FrameUpload::from_view(&frame));
                let blend = frame.blend;
                let sun = sun_direction(Utc::now());
                let globe_params = GlobeParams {
                    show_day_night: self.view.show_day_night,
                    show_grid: self.view.show_grid,
                    show_stars: self.view.show_stars,
                    sun_dir: [sun.x as f32, sun.y as f32, sun.z as f32],
                    bg_color,
                };
                let params = self.view.satellites;
                let rotation = self.view.camera.rotation;
                let inv_rotation = rotation.transpose();
                let scale = self.view.camera.scale() as f32;
                let globe = globe.clone();
                let satellites = satellites.clone();

                let callback = egui::PaintCallback {
                    rect,
                    callback: Arc::new(egui_glow::CallbackFn::new(move |info, painter| {
                        let gl = painter.gl();
                        globe.lock().paint(gl, &inv_rotation, aspect, scale, &globe_params);
                        let mut satellites = satellites.lock();
                        if let Some(upload) = &upload {
                            satellites.upload(gl, upload);
                        }
                        satellites.paint(gl, blend, params, &rotation, aspect, scale, info.pixels_per_point);
                    })),
                };
                ui.painter().add(callback);
            }
            _ => self.paint_with_egui(ui.painter(), rect, now),
        }

        self.paint_selection(ui.painter(), rect, now);
    }

    /// Painter-only rendering when no GL context is available.
    ///
    /// A degraded path: every point is blended on the CPU each frame. The
    /// shader blend in `SatelliteRenderer` is the normative one.
    fn paint_with_egui(&self, painter: &egui::Painter, rect: egui::Rect, now: f64) {
        let aspect = (rect.width() / rect.height().max(1.0)) as f64;
        let camera = &self.view.camera;
        let radius = ndc_to_screen(rect, [camera.scale() / aspect.max(1.0), 0.0]).x - rect.center().x;
        painter.circle_filled(rect.center(), radius, egui::Color32::from_rgb(13, 46, 97));

        if !self.view.satellites.visible {
            return;
        }
        let [r, g, b] = SATELLITE_COLOR;
        let color = egui::Color32::from_rgb((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8);
        let count = self.system.frame(now).point_count();
        for index in 0..count {
            if let Some(pos) = self.screen_position(rect, index, now) {
                painter.circle_filled(pos, self.view.satellites.point_size * 0.5, color);
            }
        }
    }

    fn paint_selection(&self, painter: &egui::Painter, rect: egui::Rect, now: f64) {
        let Some(index) = self.view.selected else { return };
        let Some(pos) = self.screen_position(rect, index, now) else { return };
        let name = self
            .system
            .collection()
            .and_then(|c| c.get(index))
            .map_or("?", |entry| entry.name.as_str());
        let stroke = egui::Stroke::new(1.5, egui::Color32::WHITE);
        painter.circle_stroke(pos, self.view.satellites.point_size + 4.0, stroke);
        painter.text(
            pos + egui::vec2(10.0, -10.0),
            egui::Align2::LEFT_BOTTOM,
            name,
            egui::FontId::proportional(13.0),
            egui::Color32::WHITE,
        );
    }

    fn screen_position(&self, rect: egui::Rect, index: usize, now: f64) -> Option<egui::Pos2> {
        let [x, y, z] = self.system.position_of(index, now)?;
        let point = Vector3::new(x as f64, y as f64, z as f64);
        let aspect = (rect.width() / rect.height().max(1.0)) as f64;
        self.view.camera.project(&point, aspect).map(|ndc| ndc_to_screen(rect, ndc))
    }

    fn pick(&self, rect: egui::Rect, pointer: egui::Pos2, now: f64) -> Option<usize> {
        let count = self.system.frame(now).point_count();
        (0..count)
            .filter_map(|i| self.screen_position(rect, i, now).map(|p| (i, p.distance(pointer))))
            .filter(|(_, d)| *d <= PICK_RADIUS)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }
}

fn create_renderers(
    gl: &glow::Context,
) -> (Option<Arc<Mutex<GlobeRenderer>>>, Option<Arc<Mutex<SatelliteRenderer>>>) {
    let globe = GlobeRenderer::new(gl);
    let satellites = SatelliteRenderer::new(gl);
    match (globe, satellites) {
        (Ok(globe), Ok(satellites)) => (Some(Arc::new(Mutex::new(globe))), Some(Arc::new(Mutex::new(satellites)))),
        (globe, satellites) => {
            for e in [globe.err(), satellites.err()].into_iter().flatten() {
                log::error!("{}", e);
            }
            (None, None)
        }
    }
}

fn ndc_to_screen(rect: egui::Rect, ndc: [f64; 2]) -> egui::Pos2 {
    let c = rect.center();
    egui::pos2(
        c.x + ndc[0] as f32 * rect.width() * 0.5,
        c.y - ndc[1] as f32 * rect.height() * 0.5,
    )
}

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = ctx.input(|i| i.time);
        self.system.poll(now, Utc::now());

        egui::SidePanel::left("settings")
            .resizable(false)
            .default_width(240.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| self.show_settings(ui, now));
            });

        egui::CentralPanel::default()
            .frame(egui::Frame::default().fill(ctx.style().visuals.extreme_bg_color))
            .show(ctx, |ui| self.show_globe(ui, now));

        ctx.request_repaint();
    }

    fn on_exit(&mut self, gl: Option<&glow::Context>) {
        if let Some(gl) = gl {
            if let Some(renderer) = &self.globe_renderer {
                renderer.lock().destroy(gl);
            }
            if let Some(renderer) = &self.satellite_renderer {
                renderer.lock().destroy(gl);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndc_maps_to_rect() {
        let rect = egui::Rect::from_min_size(egui::pos2(10.0, 20.0), egui::vec2(200.0, 100.0));
        assert_eq!(ndc_to_screen(rect, [0.0, 0.0]), rect.center());
        assert_eq!(ndc_to_screen(rect, [1.0, 1.0]), egui::pos2(210.0, 20.0));
        assert_eq!(ndc_to_screen(rect, [-1.0, -1.0]), egui::pos2(10.0, 120.0));
    }
}
