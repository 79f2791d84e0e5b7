//! Side-panel settings UI: pipeline status, source selection, display
//! options and the selected satellite.

use eframe::egui;

use crate::app::App;
use crate::pipeline::SatelliteMode;
use crate::propagation::scene_to_lat_lon;
use crate::tle::{HttpSource, TlePreset};

impl App {
    pub(crate) fn show_settings(&mut self, ui: &mut egui::Ui, now: f64) {
        self.show_pipeline_status(ui, now);
        ui.separator();
        self.show_source(ui);
        ui.separator();
        self.show_display(ui);
        ui.separator();
        self.show_selection(ui, now);

        ui.with_layout(egui::Layout::bottom_up(egui::Align::LEFT), |ui| {
            ui.label(
                egui::RichText::new(format!("build {}", env!("GIT_HASH")))
                    .small()
                    .weak(),
            );
        });
    }

    fn show_pipeline_status(&self, ui: &mut egui::Ui, now: f64) {
        ui.label(egui::RichText::new("Satellites").strong());
        let mode = self.system.mode();
        let stats = self.system.stats();
        let count = self.system.collection().map_or(0, |c| c.len());

        egui::Grid::new("pipeline_status").num_columns(2).show(ui, |ui| {
            ui.label("Mode:");
            ui.label(mode.label());
            ui.end_row();
            ui.label("Objects:");
            ui.label(count.to_string());
            ui.end_row();
            if let SatelliteMode::Live(_) = mode {
                ui.label("Blend:");
                ui.add(egui::ProgressBar::new(self.system.store().blend(now)).desired_width(120.0));
                ui.end_row();
                ui.label("Batches:");
                ui.label(stats.batches.to_string());
                ui.end_row();
                ui.label("Failed:");
                ui.label(stats.last_failures.to_string());
                ui.end_row();
                ui.label("Stale:");
                ui.label(stats.stale_replies.to_string());
                ui.end_row();
            }
        });

        if let Some(error) = &stats.last_fetch_error {
            ui.colored_label(ui.visuals().warn_fg_color, format!("Fetch failed: {error}"));
        }
    }

    fn show_source(&mut self, ui: &mut egui::Ui) {
        let previous = self.view.preset;
        let selected_text = previous.map_or("Custom URL", |p| p.label());
        egui::ComboBox::from_label("Source")
            .selected_text(selected_text)
            .show_ui(ui, |ui| {
                for preset in TlePreset::ALL {
                    ui.selectable_value(&mut self.view.preset, Some(preset), preset.label());
                }
            });
        if self.view.preset != previous {
            if let Some(preset) = self.view.preset {
                self.view.selected = None;
                self.system.set_source(Box::new(HttpSource::preset(preset)));
            }
        }

        ui.label(egui::RichText::new(self.system.source_description()).small().weak());
        let can_retry = matches!(self.system.mode(), SatelliteMode::Synthetic | SatelliteMode::Live(_));
        if ui.add_enabled(can_retry, egui::Button::new("Fetch again")).clicked() {
            self.view.selected = None;
            self.system.retry_fetch();
        }
    }

    fn show_display(&mut self, ui: &mut egui::Ui) {
        let view = &mut self.view;
        ui.label(egui::RichText::new("Display").strong());
        ui.checkbox(&mut view.satellites.visible, "Show satellites");
        ui.add(egui::Slider::new(&mut view.satellites.point_size, 1.0..=16.0).text("Point size"));
        ui.checkbox(&mut view.show_day_night, "Day/night");
        ui.checkbox(&mut view.show_grid, "Graticule");
        ui.checkbox(&mut view.show_stars, "Stars");
        ui.horizontal(|ui| {
            let mut zoom = view.camera.zoom;
            if ui.add(egui::Slider::new(&mut zoom, crate::math::MIN_ZOOM..=crate::math::MAX_ZOOM).logarithmic(true).text("Zoom")).changed() {
                view.camera.zoom_by(zoom / view.camera.zoom);
            }
        });
        if ui.button("Reset camera").clicked() {
            view.camera.reset();
        }
    }

    fn show_selection(&mut self, ui: &mut egui::Ui, now: f64) {
        let Some(index) = self.view.selected else {
            ui.label(egui::RichText::new("Click a satellite to select it").weak());
            return;
        };
        let Some(entry) = self.system.collection().and_then(|c| c.get(index)) else {
            self.view.selected = None;
            return;
        };
        ui.label(egui::RichText::new(&entry.name).strong());
        if let Some((lat, lon)) = self.system.position_of(index, now).and_then(scene_to_lat_lon) {
            ui.label(format!("{:.2}°, {:.2}°", lat.to_degrees(), lon.to_degrees()));
        }
        if let Some((line1, line2)) = entry.lines() {
            ui.label(egui::RichText::new(format!("{line1}\n{line2}")).monospace().small());
        }
        if ui.button("Clear selection").clicked() {
            self.view.selected = None;
        }
    }
}
