//! Rendu GPU du shell : barre de progression, bandeau d'erreur et barre
//! de boutons.
//!
//! Utilise `glow` pour les appels OpenGL et `fontdue` pour la rastérisation
//! CPU des glyphes. Deux atlas sont pré-rendus au démarrage (libellés et
//! icônes), puis dessinés comme des quads texturés à chaque frame. La
//! géométrie vient entièrement de [`ShellLayout`].

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use glow::HasContext;
use tracing::debug;

use crate::config::{ToolbarColors, ToolbarConfig};
use crate::error::Error;
use crate::shell::{Icon, Rect, ShellLayout};

/// Vertex shader GLES 300 es.
const VERTEX_SHADER: &str = r#"#version 300 es
precision mediump float;
layout(location = 0) in vec2 a_position;
layout(location = 1) in vec2 a_uv;
uniform mat4 u_projection;
out vec2 v_uv;
void main() {
    gl_Position = u_projection * vec4(a_position, 0.0, 1.0);
    v_uv = a_uv;
}
"#;

/// Fragment shader GLES 300 es.
const FRAGMENT_SHADER: &str = r#"#version 300 es
precision mediump float;
in vec2 v_uv;
uniform sampler2D u_texture;
uniform vec4 u_color;
uniform bool u_use_texture;
out vec4 fragColor;
void main() {
    if (u_use_texture) {
        float alpha = texture(u_texture, v_uv).r;
        fragColor = vec4(u_color.rgb, u_color.a * alpha);
    } else {
        fragColor = u_color;
    }
}
"#;

const ATLAS_WIDTH: u32 = 512;
const ELLIPSIS: char = '\u{2026}';
const WARNING_GLYPH: &str = "!";
const DISMISS_GLYPH: &str = "\u{D7}";

/// ASCII imprimable et Latin-1 (umlauts, ß) pour les libellés et messages.
fn text_chars() -> Vec<char> {
    (32u8..=126)
        .chain(160u8..=255)
        .map(char::from)
        .chain([ELLIPSIS])
        .collect()
}

fn icon_chars() -> Vec<char> {
    let mut chars: Vec<char> = [
        Icon::ChevronLeft,
        Icon::ChevronRight,
        Icon::Reload,
        Icon::Stop,
        Icon::House,
    ]
    .iter()
    .flat_map(|icon| icon.glyph().chars())
    .chain(WARNING_GLYPH.chars())
    .chain(DISMISS_GLYPH.chars())
    .collect();
    chars.sort_unstable();
    chars.dedup();
    chars
}

struct GlyphInfo {
    atlas_x: u32,
    atlas_y: u32,
    width: u32,
    height: u32,
    advance_x: f32,
    offset_x: f32,
    /// Bord inférieur relatif à la ligne de base (positif = vers le haut).
    offset_y: f32,
}

struct GlyphAtlas {
    width: u32,
    height: u32,
    glyphs: HashMap<char, GlyphInfo>,
    pixels: Vec<u8>,
}

/// Range des rectangles par rangées de gauche à droite, 1 px d'écart.
/// Retourne la position de chacun et la hauteur (puissance de deux) de l'atlas.
fn pack(sizes: &[(u32, u32)], atlas_width: u32) -> (Vec<(u32, u32)>, u32) {
    let mut positions = Vec::with_capacity(sizes.len());
    let (mut x, mut y, mut row_height) = (0u32, 0u32, 0u32);

    for &(w, h) in sizes {
        if x + w > atlas_width {
            x = 0;
            y += row_height + 1;
            row_height = 0;
        }
        positions.push((x, y));
        row_height = row_height.max(h);
        x += w + 1;
    }

    let height = (y + row_height + 1).next_power_of_two().max(64);
    (positions, height)
}

impl GlyphAtlas {
    fn build(font: &fontdue::Font, font_size: f32, chars: &[char]) -> Self {
        let rasterized: Vec<(char, fontdue::Metrics, Vec<u8>)> = chars
            .iter()
            .map(|&c| {
                let (metrics, bitmap) = font.rasterize(c, font_size);
                (c, metrics, bitmap)
            })
            .collect();

        let sizes: Vec<(u32, u32)> = rasterized
            .iter()
            .map(|(_, m, _)| (m.width as u32, m.height as u32))
            .collect();
        let (positions, height) = pack(&sizes, ATLAS_WIDTH);

        let mut glyphs = HashMap::with_capacity(rasterized.len());
        let mut pixels = vec![0u8; (ATLAS_WIDTH * height) as usize];

        for ((c, metrics, bitmap), (atlas_x, atlas_y)) in rasterized.iter().zip(positions) {
            let info = GlyphInfo {
                atlas_x,
                atlas_y,
                width: metrics.width as u32,
                height: metrics.height as u32,
                advance_x: metrics.advance_width,
                offset_x: metrics.xmin as f32,
                offset_y: metrics.ymin as f32,
            };
            for row in 0..info.height {
                let src = (row * info.width) as usize;
                let dst = ((info.atlas_y + row) * ATLAS_WIDTH + info.atlas_x) as usize;
                let len = info.width as usize;
                if src + len <= bitmap.len() && dst + len <= pixels.len() {
                    pixels[dst..dst + len].copy_from_slice(&bitmap[src..src + len]);
                }
            }
            glyphs.insert(*c, info);
        }

        Self {
            width: ATLAS_WIDTH,
            height,
            glyphs,
            pixels,
        }
    }

    /// Avance d'un caractère absent de l'atlas : celle de l'espace.
    fn advance(&self, c: char, font_size: f32) -> f32 {
        self.glyphs
            .get(&c)
            .or_else(|| self.glyphs.get(&' '))
            .map_or(font_size * 0.5, |g| g.advance_x)
    }

    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().map(|c| self.advance(c, font_size)).sum()
    }
}

/// Tronque `text` avec une ellipse pour tenir dans `max_width`.
fn fit_text(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> String {
    if measure(text) <= max_width {
        return text.to_string();
    }
    let mut fitted = String::new();
    for c in text.chars() {
        let candidate = format!("{fitted}{c}{ELLIPSIS}");
        if measure(&candidate) > max_width {
            break;
        }
        fitted.push(c);
    }
    let fitted = fitted.trim_end();
    if fitted.is_empty() {
        String::new()
    } else {
        format!("{fitted}{ELLIPSIS}")
    }
}

/// Un atlas et sa texture GL.
struct Face {
    atlas: GlyphAtlas,
    texture: glow::Texture,
    size: f32,
}

impl Face {
    fn text_width(&self, text: &str) -> f32 {
        self.atlas.text_width(text, self.size)
    }
}

/// Renderer OpenGL du shell.
pub struct ChromeRenderer {
    gl: Arc<glow::Context>,
    program: glow::Program,
    vao: glow::VertexArray,
    vbo: glow::Buffer,
    u_projection: glow::UniformLocation,
    u_color: glow::UniformLocation,
    u_use_texture: glow::UniformLocation,
    u_texture: glow::UniformLocation,
    labels: Face,
    icons: Face,
    colors: ToolbarColors,
}

#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn compile_shader(
    gl: &glow::Context,
    kind: u32,
    source: &str,
) -> Result<glow::Shader, Error> {
    let shader = gl.create_shader(kind).map_err(Error::Gl)?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(Error::Gl(format!("shader: {log}")));
    }
    Ok(shader)
}

#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn upload_atlas(gl: &glow::Context, atlas: &GlyphAtlas) -> Result<glow::Texture, Error> {
    let texture = gl.create_texture().map_err(Error::Gl)?;
    gl.bind_texture(glow::TEXTURE_2D, Some(texture));
    for (param, value) in [
        (glow::TEXTURE_MIN_FILTER, glow::LINEAR),
        (glow::TEXTURE_MAG_FILTER, glow::LINEAR),
        (glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE),
        (glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE),
    ] {
        gl.tex_parameter_i32(glow::TEXTURE_2D, param, value as i32);
    }
    gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        glow::R8 as i32,
        atlas.width as i32,
        atlas.height as i32,
        0,
        glow::RED,
        glow::UNSIGNED_BYTE,
        glow::PixelUnpackData::Slice(Some(&atlas.pixels)),
    );
    Ok(texture)
}

fn uniform(
    gl: &glow::Context,
    program: glow::Program,
    name: &str,
) -> Result<glow::UniformLocation, Error> {
    unsafe { gl.get_uniform_location(program, name) }
        .ok_or_else(|| Error::Gl(format!("uniform {name} absent")))
}

#[allow(unsafe_op_in_unsafe_fn)]
impl ChromeRenderer {
    /// Crée le renderer. Doit être appelé avec un contexte GL actif.
    ///
    /// # Safety
    /// Appelle des fonctions OpenGL.
    pub unsafe fn new(
        gl: Arc<glow::Context>,
        config: &ToolbarConfig,
        font_path: &Path,
    ) -> Result<Self, Error> {
        let font_bytes = fs::read(font_path).map_err(|source| Error::FontRead {
            path: font_path.to_path_buf(),
            source,
        })?;
        let font = fontdue::Font::from_bytes(font_bytes, fontdue::FontSettings::default())
            .map_err(|e| Error::FontParse(e.to_string()))?;

        // ── Shaders ──────────────────────────────────────────────────────
        let vs = compile_shader(&gl, glow::VERTEX_SHADER, VERTEX_SHADER)?;
        let fs = compile_shader(&gl, glow::FRAGMENT_SHADER, FRAGMENT_SHADER)?;
        let program = gl.create_program().map_err(Error::Gl)?;
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
        if !gl.get_program_link_status(program) {
            return Err(Error::Gl(format!(
                "link: {}",
                gl.get_program_info_log(program)
            )));
        }

        let u_projection = uniform(&gl, program, "u_projection")?;
        let u_color = uniform(&gl, program, "u_color")?;
        let u_use_texture = uniform(&gl, program, "u_use_texture")?;
        let u_texture = uniform(&gl, program, "u_texture")?;

        // ── VAO / VBO : [x, y, u, v] x 6 sommets ────────────────────────
        let vao = gl.create_vertex_array().map_err(Error::Gl)?;
        gl.bind_vertex_array(Some(vao));
        let vbo = gl.create_buffer().map_err(Error::Gl)?;
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        let float = std::mem::size_of::<f32>() as i32;
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 4 * float, 0);
        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 4 * float, 2 * float);
        gl.enable_vertex_attrib_array(1);
        gl.bind_vertex_array(None);

        // ── Atlas ────────────────────────────────────────────────────────
        let label_atlas = GlyphAtlas::build(&font, config.font_size, &text_chars());
        let icon_atlas = GlyphAtlas::build(&font, config.icon_size, &icon_chars());
        let labels = Face {
            texture: upload_atlas(&gl, &label_atlas)?,
            atlas: label_atlas,
            size: config.font_size,
        };
        let icons = Face {
            texture: upload_atlas(&gl, &icon_atlas)?,
            atlas: icon_atlas,
            size: config.icon_size,
        };
        debug!(
            label_glyphs = labels.atlas.glyphs.len(),
            icon_glyphs = icons.atlas.glyphs.len(),
            "Atlas de glyphes prêts"
        );

        Ok(Self {
            gl,
            program,
            vao,
            vbo,
            u_projection,
            u_color,
            u_use_texture,
            u_texture,
            labels,
            icons,
            colors: config.colors.clone(),
        })
    }

    /// Dessine le shell par-dessus le contenu déjà blitté.
    ///
    /// # Safety
    /// Appelle des fonctions OpenGL.
    pub unsafe fn draw(&self, layout: &ShellLayout) {
        let gl = &self.gl;
        let (w, h) = (layout.width, layout.height);
        if w <= 0.0 || h <= 0.0 {
            return;
        }

        // ── Sauvegarder l'état GL ────────────────────────────────────────
        let prev_blend = gl.is_enabled(glow::BLEND);
        let prev_depth = gl.is_enabled(glow::DEPTH_TEST);
        let prev_scissor = gl.is_enabled(glow::SCISSOR_TEST);

        gl.viewport(0, 0, w as i32, h as i32);
        gl.disable(glow::DEPTH_TEST);
        gl.disable(glow::SCISSOR_TEST);
        gl.enable(glow::BLEND);
        gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
        gl.use_program(Some(self.program));

        // Projection orthographique, origine en haut à gauche.
        #[rustfmt::skip]
        let projection: [f32; 16] = [
            2.0 / w,  0.0,       0.0, 0.0,
            0.0,     -2.0 / h,   0.0, 0.0,
            0.0,      0.0,      -1.0, 0.0,
           -1.0,      1.0,       0.0, 1.0,
        ];
        gl.uniform_matrix_4_f32_slice(Some(&self.u_projection), false, &projection);
        gl.uniform_1_i32(Some(&self.u_texture), 0);
        gl.active_texture(glow::TEXTURE0);
        gl.bind_vertex_array(Some(self.vao));

        let colors = &self.colors;

        // ── 1. Progression ───────────────────────────────────────────────
        self.fill(layout.progress_track, colors.progress_track);
        if let Some(bar) = layout.progress_bar {
            self.fill(bar, colors.accent);
        }

        // ── 2. Barre de boutons ──────────────────────────────────────────
        let toolbar = layout.toolbar;
        self.fill(toolbar, colors.background);
        self.fill(Rect::new(toolbar.x, toolbar.y, toolbar.width, 1.0), colors.separator);

        let gap = ((toolbar.height - self.icons.size - self.labels.size) / 3.0).max(0.0);
        let icon_baseline = toolbar.y + gap + self.icons.size * 0.8;
        let label_baseline = toolbar.y + toolbar.height - gap - self.labels.size * 0.2;

        for button in &layout.buttons {
            let color = if button.enabled {
                colors.accent
            } else {
                colors.disabled
            };
            let center = button.rect.x + button.rect.width / 2.0;
            let icon = button.icon.glyph();
            self.text(&self.icons, icon, center - self.icons.text_width(icon) / 2.0, icon_baseline, color);
            let label = fit_text(button.label, button.rect.width - 4.0, |t| self.labels.text_width(t));
            self.text(
                &self.labels,
                &label,
                center - self.labels.text_width(&label) / 2.0,
                label_baseline,
                color,
            );
        }

        // ── 3. Bandeau d'erreur ──────────────────────────────────────────
        if let Some(banner) = &layout.banner {
            let rect = banner.rect;
            self.fill(rect, colors.banner_background);

            let pad = (rect.height - self.icons.size).max(0.0) / 2.0;
            let icon_baseline = rect.y + pad + self.icons.size * 0.8;
            let text_baseline = rect.y + rect.height / 2.0 + self.labels.size / 3.0;

            let warning_x = rect.x + pad;
            self.text(&self.icons, WARNING_GLYPH, warning_x, icon_baseline, colors.warning);

            let text_x = warning_x + self.icons.text_width(WARNING_GLYPH) + pad;
            let max_width = (banner.dismiss.x - text_x - pad).max(0.0);
            let message = fit_text(&banner.message, max_width, |t| self.labels.text_width(t));
            self.text(&self.labels, &message, text_x, text_baseline, colors.banner_text);

            let dismiss = banner.dismiss;
            let close_x = dismiss.x + (dismiss.width - self.icons.text_width(DISMISS_GLYPH)) / 2.0;
            self.text(&self.icons, DISMISS_GLYPH, close_x, icon_baseline, colors.banner_text);
        }

        // ── Restaurer l'état GL ──────────────────────────────────────────
        gl.bind_vertex_array(None);
        gl.use_program(None);
        if prev_depth {
            gl.enable(glow::DEPTH_TEST);
        }
        if !prev_blend {
            gl.disable(glow::BLEND);
        }
        if prev_scissor {
            gl.enable(glow::SCISSOR_TEST);
        }
    }

    unsafe fn text(&self, face: &Face, text: &str, x: f32, baseline: f32, color: [f32; 4]) {
        let gl = &self.gl;
        gl.bind_texture(glow::TEXTURE_2D, Some(face.texture));
        gl.uniform_1_i32(Some(&self.u_use_texture), 1);
        gl.uniform_4_f32_slice(Some(&self.u_color), &color);

        let mut pen_x = x;
        for c in text.chars() {
            if let Some(glyph) = face.atlas.glyphs.get(&c)
                && glyph.width > 0
                && glyph.height > 0
            {
                let gx = pen_x + glyph.offset_x;
                let gy = baseline - glyph.offset_y - glyph.height as f32;
                self.quad(gx, gy, glyph.width as f32, glyph.height as f32, uv(&face.atlas, glyph));
            }
            pen_x += face.atlas.advance(c, face.size);
        }
    }

    unsafe fn fill(&self, rect: Rect, color: [f32; 4]) {
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return;
        }
        self.gl.uniform_1_i32(Some(&self.u_use_texture), 0);
        self.gl.uniform_4_f32_slice(Some(&self.u_color), &color);
        self.quad(rect.x, rect.y, rect.width, rect.height, [0.0; 4]);
    }

    /// Deux triangles ; `uv` = [u0, v0, u1, v1].
    unsafe fn quad(&self, x: f32, y: f32, w: f32, h: f32, uv: [f32; 4]) {
        let [u0, v0, u1, v1] = uv;
        #[rustfmt::skip]
        let vertices: [f32; 24] = [
            x,     y,     u0, v0,
            x + w, y,     u1, v0,
            x + w, y + h, u1, v1,
            x,     y,     u0, v0,
            x + w, y + h, u1, v1,
            x,     y + h, u0, v1,
        ];
        let gl = &self.gl;
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
        gl.buffer_data_u8_slice(
            glow::ARRAY_BUFFER,
            bytemuck_cast_slice(&vertices),
            glow::DYNAMIC_DRAW,
        );
        gl.draw_arrays(glow::TRIANGLES, 0, 6);
    }
}

fn uv(atlas: &GlyphAtlas, glyph: &GlyphInfo) -> [f32; 4] {
    let (aw, ah) = (atlas.width as f32, atlas.height as f32);
    [
        glyph.atlas_x as f32 / aw,
        glyph.atlas_y as f32 / ah,
        (glyph.atlas_x + glyph.width) as f32 / aw,
        (glyph.atlas_y + glyph.height) as f32 / ah,
    ]
}

/// Cast d'un slice `[f32]` vers `[u8]` pour l'upload GL.
fn bytemuck_cast_slice(data: &[f32]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data)) }
}
