//! Contextes de rendu GPU.
//!
//! Deux contextes : celui de la fenêtre (shell + blit) et un contexte
//! offscreen (FBO) dans lequel Servo peint la zone de contenu.

use std::rc::Rc;

use servo::{OffscreenRenderingContext, RenderingContext, WindowRenderingContext};
use winit::dpi::PhysicalSize;
use winit::raw_window_handle::{DisplayHandle, WindowHandle};

use crate::error::Error;

/// Crée le contexte OpenGL lié à la fenêtre et le rend courant.
pub fn create_window_context(
    display_handle: DisplayHandle<'_>,
    window_handle: WindowHandle<'_>,
    size: PhysicalSize<u32>,
) -> Result<Rc<WindowRenderingContext>, Error> {
    let context = WindowRenderingContext::new(display_handle, window_handle, size)
        .map_err(|e| Error::RenderingContext(format!("{e:?}")))?;
    context
        .make_current()
        .map_err(|e| Error::RenderingContext(format!("make_current: {e:?}")))?;
    Ok(Rc::new(context))
}

/// Crée le FBO de la zone de contenu, partageant le contexte de la fenêtre.
pub fn create_content_context(
    window_context: &WindowRenderingContext,
    size: PhysicalSize<u32>,
) -> Rc<OffscreenRenderingContext> {
    Rc::new(window_context.offscreen_context(content_size(size)))
}

/// Servo refuse les surfaces vides.
pub fn content_size(size: PhysicalSize<u32>) -> PhysicalSize<u32> {
    PhysicalSize::new(size.width.max(1), size.height.max(1))
}
