use egui::epaint::Shadow;

pub struct DebugStats {
    pub fps: u32,
    pub frame_time_avg_ms: f32,
    pub frame_time_min_ms: f32,
    pub frame_time_max_ms: f32,
    pub entity_count: usize,
    pub resolution: (u32, u32),
    pub camera_distance: f32,
    /// Sentries ticked this frame.
    pub sensors: usize,
    /// Grid resolution `n` of the first sensor.
    pub grid_resolution: u32,
    /// Degrees the first sensor still has to turn toward its aim target.
    pub aim_remaining_deg: f32,
    pub rays: usize,
    pub hits: usize,
    pub failed_queries: usize,
    pub triangles: usize,
    /// Time spent building visibility meshes this frame (ms).
    pub sensor_ms: f32,
}

/// One debug ray, already projected to egui screen points.
pub struct RayDraw {
    pub from: egui::Pos2,
    pub to: egui::Pos2,
}

pub struct DebugOverlay {
    pub visible: bool,
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl DebugOverlay {
    pub fn new(
        window: &winit::window::Window,
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let egui_ctx = egui::Context::default();

        // Style: dark, semi-transparent, small monospace white font
        let mut visuals = egui::Visuals::dark();
        visuals.window_fill = egui::Color32::from_rgba_premultiplied(0, 0, 0, 180);
        visuals.window_stroke = egui::Stroke::NONE;
        visuals.window_shadow = Shadow::NONE;
        visuals.override_text_color = Some(egui::Color32::WHITE);
        egui_ctx.set_visuals(visuals);

        let mut style = (*egui_ctx.style()).clone();
        style.override_font_id = Some(egui::FontId::monospace(13.0));
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(
            device,
            surface_format,
            None,  // no depth
            1,     // msaa samples
            false, // no dithering
        );

        Self {
            visible: false,
            egui_ctx,
            egui_state,
            egui_renderer,
        }
    }

    pub fn toggle(&mut self) {
        self.visible = !self.visible;
    }

    pub fn handle_window_event(
        &mut self,
        window: &winit::window::Window,
        event: &winit::event::WindowEvent,
    ) -> egui_winit::EventResponse {
        self.egui_state.on_window_event(window, event)
    }

    /// Points per physical pixel, for projecting world points to egui space.
    pub fn pixels_per_point(&self) -> f32 {
        self.egui_ctx.pixels_per_point()
    }

    /// Render one egui frame:
    ///
    /// - `rays`      : per-ray debug lines (`None` = hidden).
    /// - `discovered`: "Discovered" / "Hidden" banner, always shown.
    /// - `stats`     : F3 stats panel (`None` = hidden).
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        window: &winit::window::Window,
        view: &wgpu::TextureView,
        screen_descriptor: &egui_wgpu::ScreenDescriptor,
        discovered: bool,
        stats: Option<&DebugStats>,
        rays: Option<&[RayDraw]>,
    ) {
        let raw_input = self.egui_state.take_egui_input(window);

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            // ── debug rays on a background layer ─────────────────────────────
            if let Some(rays) = rays {
                if !rays.is_empty() {
                    let painter = ctx.layer_painter(egui::LayerId::new(
                        egui::Order::Background,
                        egui::Id::new("sensor_rays"),
                    ));
                    let ray_stroke = egui::Stroke::new(
                        1.0,
                        egui::Color32::from_rgba_unmultiplied(255, 255, 160, 60),
                    );
                    for ray in rays {
                        painter.line_segment([ray.from, ray.to], ray_stroke);
                    }
                }
            }

            // ── detection status (top centre) ───────────────────────────────
            let (text, color) = if discovered {
                ("Discovered", egui::Color32::from_rgb(255, 90, 70))
            } else {
                ("Hidden", egui::Color32::from_rgb(120, 230, 140))
            };
            egui::Area::new(egui::Id::new("detection_status"))
                .anchor(egui::Align2::CENTER_TOP, egui::vec2(0.0, 12.0))
                .show(ctx, |ui| {
                    egui::Frame::none()
                        .fill(egui::Color32::from_rgba_premultiplied(0, 0, 0, 180))
                        .inner_margin(egui::Margin::same(8.0))
                        .rounding(4.0)
                        .show(ui, |ui: &mut egui::Ui| {
                            ui.label(egui::RichText::new(text).color(color).size(22.0));
                        });
                });

            // ── F3: stats panel ──────────────────────────────────────────────
            if let Some(stats) = stats {
                egui::Area::new(egui::Id::new("debug_overlay"))
                    .fixed_pos(egui::pos2(10.0, 10.0))
                    .show(ctx, |ui| {
                        egui::Frame::none()
                            .fill(egui::Color32::from_rgba_premultiplied(0, 0, 0, 180))
                            .inner_margin(egui::Margin::same(8.0))
                            .rounding(4.0)
                            .show(ui, |ui: &mut egui::Ui| {
                                ui.label(format!("FPS: {}", stats.fps));
                                ui.label(format!(
                                    "Frame: {:.2} ms (min: {:.1} | max: {:.1})",
                                    stats.frame_time_avg_ms,
                                    stats.frame_time_min_ms,
                                    stats.frame_time_max_ms
                                ));
                                ui.label(format!("Entities: {}", stats.entity_count));
                                ui.label(format!(
                                    "Resolution: {} x {}",
                                    stats.resolution.0, stats.resolution.1
                                ));
                                ui.label(format!("Camera dist: {:.1}", stats.camera_distance));
                                let side = stats.grid_resolution + 1;
                                ui.label(format!("Sensors: {}  grid: {side}x{side}", stats.sensors));
                                ui.label(format!("Aim: {:.1} deg to target", stats.aim_remaining_deg));
                                ui.label(format!(
                                    "Rays: {}  hits: {}  failed: {}",
                                    stats.rays, stats.hits, stats.failed_queries,
                                ));
                                ui.label(format!(
                                    "Triangles: {}  sweep: {:.2} ms",
                                    stats.triangles, stats.sensor_ms,
                                ));
                            });
                    });
            }
        });

        self.egui_state
            .handle_platform_output(window, full_output.platform_output);

        let tris = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(device, queue, *id, image_delta);
        }

        self.egui_renderer
            .update_buffers(device, queue, encoder, &tris, screen_descriptor);

        {
            let render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            self.egui_renderer
                .render(&mut render_pass.forget_lifetime(), &tris, screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}
