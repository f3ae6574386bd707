use crate::error::{Error, Result};
use crate::svg::Element;

pub trait RenderOracle: Send + Sync {
    fn render(&self, document: &Element) -> Result<Vec<u8>>;
}

pub struct ResvgRenderer {
    scale: f32,
}

impl ResvgRenderer {
    pub fn new(scale: f32) -> Self {
        Self { scale }
    }
}

impl Default for ResvgRenderer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RenderOracle for ResvgRenderer {
    fn render(&self, document: &Element) -> Result<Vec<u8>> {
        let opt = usvg::Options::default();
        let tree = usvg::Tree::from_str(&document.to_xml(), &opt)
            .map_err(|e| Error::Render(format!("SVG parse error: {e:?}")))?;

        let size = tree.size();
        let w_px = (size.width() * self.scale).ceil().max(1.0) as u32;
        let h_px = (size.height() * self.scale).ceil().max(1.0) as u32;
        let mut pixmap = tiny_skia::Pixmap::new(w_px, h_px)
            .ok_or_else(|| Error::Render("pixmap alloc failed".to_string()))?;
        pixmap.fill(tiny_skia::Color::WHITE);

        let mut pm = pixmap.as_mut();
        resvg::render(
            &tree,
            tiny_skia::Transform::from_scale(self.scale, self.scale),
            &mut pm,
        );
        pixmap
            .encode_png()
            .map_err(|e| Error::Render(format!("PNG encode error: {e}")))
    }
}
