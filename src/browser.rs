//! Boucle d'événements Winit et cycle de vie de l'écran.
//!
//! ## Pattern "Two-Phase App"
//!
//! Winit 0.30 impose que la fenêtre soit créée dans `resumed()`. Servo a
//! besoin de son handle pour le contexte de rendu, d'où deux phases :
//!
//! ```text
//! Phase::Initial  →  [resumed()]  →  Phase::Running(Rc<AppState>)
//! ```
//!
//! Le [`RuleCompiler`] appartient à [`App`], pas à l'écran : il est lancé
//! dès [`App::new`] et sa compilation survit à la disparition de la fenêtre.
//!
//! ## Flux
//!
//! ```text
//! Threads Servo ──wake()──────────────┐
//! Thread filter-compiler ─────────────┤ EventLoopProxy<AppEvent>
//!                                      ▼
//!   user_event() ─ Wake ───────────▶ servo.spin_event_loop() ─▶ WebViewDelegate
//!                └ FiltersCompiled ─▶ RuleCompiler::resolve ─▶ apply_filter_if_ready
//! ```
//!
//! ## Écran
//!
//! ```text
//! ┌──────────────────────────┐ progression
//! │ Servo (FBO offscreen),   │
//! │ blitté dans la zone de   │ bandeau d'erreur superposé
//! │ contenu                  │
//! ├──────────────────────────┤
//! │ < Zurück  > Vor  …       │ barre de boutons
//! └──────────────────────────┘
//! ```

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;

use euclid::Scale;
use servo::{InputEvent, WheelDelta, WheelEvent, WheelMode};
use servo::{MouseButton as ServoMouseButton, MouseButtonAction, MouseButtonEvent};
use servo::{MouseLeftViewportEvent, MouseMoveEvent};
use servo::{
    OffscreenRenderingContext, RenderingContext, Servo, ServoBuilder, WebView, WebViewBuilder,
    WindowRenderingContext,
};
use tracing::{error, info, warn};
use url::Url;
use webrender_api::units::DevicePoint;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, MouseButton as WinitMouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, ModifiersState, NamedKey};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::{Window, WindowId};

use crate::appearance::DarkMode;
use crate::chrome::ChromeRenderer;
use crate::config::Config;
use crate::controller::ContentViewController;
use crate::error::Error;
use crate::navigation::{NavigationState, NavigationStateMirror, NavigationStore, SurfaceProperties};
use crate::observe::{Observable, Observation};
use crate::preferences::build_servo_preferences;
use crate::rendering;
use crate::resources;
use crate::rules::{BUILTIN_RULES, RuleCompiler};
use crate::servo_glue::{AppEvent, ServoSurface, Waker};
use crate::shell::{ShellAction, ShellLayout, ShellMetrics};

/// Pixels par ligne pour `MouseScrollDelta::LineDelta`.
const LINE_HEIGHT: f32 = 76.0;

// ─────────────────────────────────────────────────────────────────────────────
// AppState : état de l'écran, partagé entre Winit et Servo
// ─────────────────────────────────────────────────────────────────────────────

/// Créé dans `resumed()`. Encapsulé dans `Rc` car Servo attend un
/// `Rc<dyn WebViewDelegate>` ; tout vit sur le thread principal.
pub struct AppState {
    pub window: Window,
    pub servo: Servo,
    pub window_rendering_context: Rc<WindowRenderingContext>,
    pub offscreen_context: Rc<OffscreenRenderingContext>,

    pub store: Rc<NavigationStore>,
    pub properties: Rc<SurfaceProperties>,
    pub mirror: NavigationStateMirror,
    pub controller: RefCell<ContentViewController<ServoSurface>>,

    pub chrome: ChromeRenderer,
    pub metrics: ShellMetrics,

    /// Position du curseur en pixels physiques, fenêtre entière.
    pub cursor_position: Cell<DevicePoint>,
    pub modifiers: Cell<ModifiersState>,
    /// URL de la page, source des requêtes pour le filtrage.
    pub current_url: RefCell<Option<Url>>,

    title: RefCell<String>,
    store_observation: RefCell<Option<Observation>>,
}

impl AppState {
    /// Disposition courante, recalculée depuis l'état publié.
    pub fn layout(&self) -> ShellLayout {
        let size = self.window.inner_size();
        ShellLayout::compute(
            &self.store.get(),
            &self.metrics,
            size.width as f32,
            size.height as f32,
        )
    }

    /// Handle de la vue, cloné pour ne pas garder d'emprunt pendant un appel Servo.
    fn webview(&self) -> Option<WebView> {
        self.controller
            .borrow()
            .surface()
            .map(|surface| surface.webview().clone())
    }

    fn perform(&self, action: ShellAction) {
        info!(?action, "Action du shell");
        match action {
            ShellAction::Back => self.controller.borrow().go_back(),
            ShellAction::Forward => self.controller.borrow().go_forward(),
            ShellAction::ReloadOrStop => self.controller.borrow().reload(),
            ShellAction::Home => self.controller.borrow().load_home(),
            ShellAction::DismissError => self.mirror.dismiss_error(),
        }
        self.window.request_redraw();
    }

    fn on_state_changed(&self, state: &NavigationState) {
        if *self.title.borrow() != state.title {
            self.window.set_title(&state.title);
            *self.title.borrow_mut() = state.title.clone();
        }
        self.window.request_redraw();
    }

    fn redraw(&self) {
        let layout = self.layout();
        let content = layout.content;

        if let Some(webview) = self.webview() {
            webview.paint();
        }

        self.window_rendering_context.prepare_for_rendering();

        if let Some(blit) = self.offscreen_context.render_to_parent_callback() {
            let gl = self.window_rendering_context.glow_gl_api();
            // GL : origine en bas à gauche, le contenu repose sur la barre de boutons.
            let bottom = layout.height - (content.y + content.height);
            let target_rect = euclid::default::Rect::new(
                euclid::default::Point2D::new(content.x as i32, bottom as i32),
                euclid::default::Size2D::new(content.width as i32, content.height as i32),
            );
            blit(&gl, target_rect);
        }

        unsafe {
            self.chrome.draw(&layout);
        }

        self.window_rendering_context.present();
    }

    fn resize(&self, new_size: PhysicalSize<u32>) {
        self.window_rendering_context.resize(new_size);
        self.offscreen_context.resize(content_size(&self.metrics, new_size));
        self.window.request_redraw();
    }

    /// Point relatif à la zone de contenu, `None` hors contenu.
    fn content_point(&self, position: DevicePoint) -> Option<DevicePoint> {
        let layout = self.layout();
        layout
            .is_content(position.x, position.y)
            .then(|| DevicePoint::new(position.x - layout.content.x, position.y - layout.content.y))
    }

    fn on_cursor_moved(&self, position: DevicePoint) {
        self.cursor_position.set(position);
        if let Some(point) = self.content_point(position)
            && let Some(webview) = self.webview()
        {
            webview.notify_input_event(InputEvent::MouseMove(MouseMoveEvent::new(point.into())));
        }
    }

    fn on_mouse_input(&self, state: ElementState, button: WinitMouseButton) {
        let position = self.cursor_position.get();

        if let Some(point) = self.content_point(position) {
            let Some(webview) = self.webview() else { return };
            let action = match state {
                ElementState::Pressed => MouseButtonAction::Down,
                ElementState::Released => MouseButtonAction::Up,
            };
            webview.notify_input_event(InputEvent::MouseButton(MouseButtonEvent::new(
                action,
                servo_mouse_button(button),
                point.into(),
            )));
            return;
        }

        if state == ElementState::Pressed
            && button == WinitMouseButton::Left
            && let Some(action) = self.layout().hit_test(position.x, position.y)
        {
            self.perform(action);
        }
    }

    fn on_mouse_wheel(&self, delta: MouseScrollDelta) {
        let Some(point) = self.content_point(self.cursor_position.get()) else {
            return;
        };
        let Some(webview) = self.webview() else { return };
        let (x, y, mode) = match delta {
            MouseScrollDelta::LineDelta(dx, dy) => (
                (dx * LINE_HEIGHT) as f64,
                (dy * LINE_HEIGHT) as f64,
                WheelMode::DeltaLine,
            ),
            MouseScrollDelta::PixelDelta(delta) => (delta.x, delta.y, WheelMode::DeltaPixel),
        };
        webview.notify_input_event(InputEvent::Wheel(WheelEvent::new(
            WheelDelta { x, y, z: 0.0, mode },
            point.into(),
        )));
    }

    fn on_keyboard_input(&self, event: &winit::event::KeyEvent) {
        let mods = self.modifiers.get();
        if event.state == ElementState::Pressed
            && let Some(action) = shortcut_for(&event.logical_key, mods, &self.store.get())
        {
            self.perform(action);
            return;
        }
        if let Some(webview) = self.webview() {
            let keyboard_event = crate::keyutils::keyboard_event_from_winit(event, mods);
            webview.notify_input_event(InputEvent::Keyboard(keyboard_event));
        }
    }

    /// Destruction de l'écran : la surface et les abonnements sont libérés.
    fn teardown(&self) {
        self.store_observation.borrow_mut().take();
        if self.controller.borrow_mut().detach_surface().is_some() {
            info!("Surface de contenu détachée");
        }
    }
}

/// Raccourcis clavier du shell.
///
/// Échap interrompt un chargement, sinon ferme le bandeau ; sans l'un ni
/// l'autre, la touche va à la page.
pub fn shortcut_for(key: &Key, mods: ModifiersState, state: &NavigationState) -> Option<ShellAction> {
    match key {
        Key::Named(NamedKey::ArrowLeft) if mods.alt_key() => Some(ShellAction::Back),
        Key::Named(NamedKey::ArrowRight) if mods.alt_key() => Some(ShellAction::Forward),
        Key::Named(NamedKey::Home) if mods.alt_key() => Some(ShellAction::Home),
        Key::Named(NamedKey::F5) => Some(ShellAction::ReloadOrStop),
        Key::Character(c) if mods.control_key() && c.eq_ignore_ascii_case("r") => {
            Some(ShellAction::ReloadOrStop)
        }
        Key::Named(NamedKey::Escape) if state.is_loading => Some(ShellAction::ReloadOrStop),
        Key::Named(NamedKey::Escape) if state.error_message.is_some() => {
            Some(ShellAction::DismissError)
        }
        _ => None,
    }
}

fn servo_mouse_button(button: WinitMouseButton) -> ServoMouseButton {
    match button {
        WinitMouseButton::Left => ServoMouseButton::Left,
        WinitMouseButton::Right => ServoMouseButton::Right,
        WinitMouseButton::Middle => ServoMouseButton::Middle,
        WinitMouseButton::Back => ServoMouseButton::Back,
        WinitMouseButton::Forward => ServoMouseButton::Forward,
        WinitMouseButton::Other(id) => ServoMouseButton::Other(id),
    }
}

/// Taille du FBO : la zone de contenu, jamais vide.
fn content_size(metrics: &ShellMetrics, window_size: PhysicalSize<u32>) -> PhysicalSize<u32> {
    let rect = metrics.content_rect(window_size.width as f32, window_size.height as f32);
    rendering::content_size(PhysicalSize::new(rect.width as u32, rect.height as u32))
}

// ─────────────────────────────────────────────────────────────────────────────
// App
// ─────────────────────────────────────────────────────────────────────────────

enum Phase {
    /// En attente de `resumed()`.
    Initial,
    Running(Rc<AppState>),
    /// Écran détruit, la boucle va s'arrêter.
    Closed,
}

pub struct App {
    waker: Waker,
    config: Config,
    resources_dir: PathBuf,
    dark_mode: DarkMode,
    compiler: RuleCompiler,
    phase: Phase,
    /// Échec de démarrage, rendu à `main` après la boucle.
    fatal: Option<Error>,
}

impl App {
    /// Crée l'application et lance la compilation des règles de blocage.
    pub fn new(
        event_loop: &EventLoop<AppEvent>,
        config: Config,
        resources_dir: PathBuf,
        dark_mode: DarkMode,
    ) -> Self {
        let mut compiler = RuleCompiler::new();
        if config.adblock.enabled {
            let proxy = event_loop.create_proxy();
            compiler.request(BUILTIN_RULES, move |result| {
                if let Err(error) = proxy.send_event(AppEvent::FiltersCompiled(result)) {
                    warn!(?error, "Boucle d'événements fermée, filtre perdu");
                }
            });
        } else {
            info!("Bloqueur de publicités désactivé par la configuration");
        }

        Self {
            waker: Waker::new(event_loop),
            config,
            resources_dir,
            dark_mode,
            compiler,
            phase: Phase::Initial,
            fatal: None,
        }
    }

    pub fn take_fatal_error(&mut self) -> Option<Error> {
        self.fatal.take()
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<Rc<AppState>, Error> {
        // ── 1. Fenêtre ───────────────────────────────────────────────────
        let window_attributes = Window::default_attributes()
            .with_title(&self.config.general.window_title)
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.config.window.width as f64,
                self.config.window.height as f64,
            ));
        let window = event_loop
            .create_window(window_attributes)
            .map_err(|e| Error::Window(e.to_string()))?;
        let display_handle = event_loop
            .display_handle()
            .map_err(|e| Error::Window(e.to_string()))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| Error::Window(e.to_string()))?;

        // ── 2. Contextes de rendu et shell ───────────────────────────────
        let metrics = self.config.toolbar.metrics();
        let inner_size = window.inner_size();
        let window_rendering_context =
            rendering::create_window_context(display_handle, window_handle, inner_size)?;
        let offscreen_context = rendering::create_content_context(
            &window_rendering_context,
            content_size(&metrics, inner_size),
        );
        let chrome = unsafe {
            ChromeRenderer::new(
                window_rendering_context.glow_gl_api(),
                &self.config.toolbar,
                &resources::font_path(&self.resources_dir),
            )?
        };

        // ── 3. Servo ─────────────────────────────────────────────────────
        let servo = ServoBuilder::default()
            .preferences(build_servo_preferences(&self.config.servo))
            .event_loop_waker(Box::new(self.waker.clone()))
            .build();

        // ── 4. État publié ───────────────────────────────────────────────
        let store = Rc::new(Observable::new(NavigationState::default()));
        let properties = Rc::new(SurfaceProperties::default());
        let mirror = NavigationStateMirror::attach(&properties, store.clone());
        let controller = ContentViewController::new(store.clone(), self.dark_mode);

        let scale_factor = window.scale_factor() as f32;
        let state = Rc::new(AppState {
            window,
            servo,
            window_rendering_context,
            offscreen_context: offscreen_context.clone(),
            store,
            properties: properties.clone(),
            mirror,
            controller: RefCell::new(controller),
            chrome,
            metrics,
            cursor_position: Cell::new(DevicePoint::zero()),
            modifiers: Cell::new(ModifiersState::default()),
            current_url: RefCell::new(None),
            title: RefCell::new(self.config.general.window_title.clone()),
            store_observation: RefCell::new(None),
        });

        let weak = Rc::downgrade(&state);
        let observation = state.store.observe(move |published| {
            if let Some(state) = weak.upgrade() {
                state.on_state_changed(published);
            }
        });
        *state.store_observation.borrow_mut() = Some(observation);

        // ── 5. Surface de contenu ────────────────────────────────────────
        let webview = WebViewBuilder::new(
            &state.servo,
            offscreen_context as Rc<dyn RenderingContext>,
        )
        .hidpi_scale_factor(Scale::new(scale_factor))
        .delegate(state.clone())
        .build();

        {
            let mut controller = state.controller.borrow_mut();
            controller.attach_surface(ServoSurface::new(webview, properties));
            controller.apply_filter_if_ready(self.compiler.filter());
        }
        if let Some(notice) = self.compiler.take_failure_notice() {
            state.mirror.report(notice);
        }
        if self.compiler.is_pending() {
            info!("Filtre en cours de compilation, rattachement différé");
        }

        state.controller.borrow().load_home();
        Ok(state)
    }

    fn on_filters_compiled(&mut self, result: crate::rules::CompileResult) {
        let filter = self.compiler.resolve(result);
        // Sans écran, le filtre ou le message attend le prochain `resumed()`.
        let Phase::Running(state) = &self.phase else { return };
        state.controller.borrow_mut().apply_filter_if_ready(filter);
        if let Some(notice) = self.compiler.take_failure_notice() {
            state.mirror.report(notice);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ApplicationHandler : dispatch des événements Winit
// ─────────────────────────────────────────────────────────────────────────────

impl ApplicationHandler<AppEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !matches!(self.phase, Phase::Initial) {
            return;
        }
        match self.start(event_loop) {
            Ok(state) => self.phase = Phase::Running(state),
            Err(e) => {
                error!(error = %e, "Démarrage impossible");
                self.fatal = Some(e);
                self.phase = Phase::Closed;
                event_loop.exit();
            }
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: AppEvent) {
        match event {
            AppEvent::Wake => {
                if let Phase::Running(state) = &self.phase {
                    state.servo.spin_event_loop();
                }
            }
            AppEvent::FiltersCompiled(result) => self.on_filters_compiled(result),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let Phase::Running(state) = &self.phase else { return };
        let state = state.clone();

        // Toujours faire tourner la boucle Servo en premier.
        state.servo.spin_event_loop();

        match event {
            WindowEvent::CloseRequested => {
                state.teardown();
                self.phase = Phase::Closed;
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => state.redraw(),
            WindowEvent::Resized(new_size) => state.resize(new_size),
            WindowEvent::ModifiersChanged(modifiers) => state.modifiers.set(modifiers.state()),
            WindowEvent::CursorMoved { position, .. } => {
                state.on_cursor_moved(DevicePoint::new(position.x as f32, position.y as f32));
            }
            WindowEvent::CursorLeft { .. } => {
                if let Some(webview) = state.webview() {
                    webview.notify_input_event(InputEvent::MouseLeftViewport(
                        MouseLeftViewportEvent::default(),
                    ));
                }
            }
            WindowEvent::MouseInput {
                state: button_state,
                button,
                ..
            } => state.on_mouse_input(button_state, button),
            WindowEvent::MouseWheel { delta, .. } => state.on_mouse_wheel(delta),
            WindowEvent::KeyboardInput { event, .. } => state.on_keyboard_input(&event),
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> NavigationState {
        NavigationState::default()
    }

    #[test]
    fn test_alt_arrows_navigate_history() {
        let key = Key::Named(NamedKey::ArrowLeft);
        assert_eq!(shortcut_for(&key, ModifiersState::ALT, &idle()), Some(ShellAction::Back));
        assert_eq!(shortcut_for(&key, ModifiersState::empty(), &idle()), None);

        let key = Key::Named(NamedKey::ArrowRight);
        assert_eq!(shortcut_for(&key, ModifiersState::ALT, &idle()), Some(ShellAction::Forward));
    }

    #[test]
    fn test_reload_shortcuts() {
        let f5 = Key::Named(NamedKey::F5);
        assert_eq!(shortcut_for(&f5, ModifiersState::empty(), &idle()), Some(ShellAction::ReloadOrStop));

        let r = Key::Character("R".into());
        assert_eq!(shortcut_for(&r, ModifiersState::CONTROL, &idle()), Some(ShellAction::ReloadOrStop));
        // Sans Ctrl, « r » est une saisie pour la page.
        assert_eq!(shortcut_for(&r, ModifiersState::empty(), &idle()), None);
    }

    #[test]
    fn test_alt_home_goes_home() {
        let key = Key::Named(NamedKey::Home);
        assert_eq!(shortcut_for(&key, ModifiersState::ALT, &idle()), Some(ShellAction::Home));
        assert_eq!(shortcut_for(&key, ModifiersState::empty(), &idle()), None);
    }

    #[test]
    fn test_escape_stops_then_dismisses() {
        let escape = Key::Named(NamedKey::Escape);
        let loading = NavigationState {
            is_loading: true,
            error_message: Some("Ladefehler: x".into()),
            ..idle()
        };
        assert_eq!(
            shortcut_for(&escape, ModifiersState::empty(), &loading),
            Some(ShellAction::ReloadOrStop)
        );

        let failed = NavigationState {
            error_message: Some("Ladefehler: x".into()),
            ..idle()
        };
        assert_eq!(
            shortcut_for(&escape, ModifiersState::empty(), &failed),
            Some(ShellAction::DismissError)
        );

        assert_eq!(shortcut_for(&escape, ModifiersState::empty(), &idle()), None);
    }

    #[test]
    fn test_content_size_excludes_shell() {
        let metrics = crate::config::ToolbarConfig::default().metrics();
        let size = content_size(&metrics, PhysicalSize::new(480, 860));
        assert_eq!(size, PhysicalSize::new(480, 860 - 3 - 56));
    }

    #[test]
    fn test_content_size_tiny_window_never_empty() {
        let metrics = crate::config::ToolbarConfig::default().metrics();
        assert_eq!(content_size(&metrics, PhysicalSize::new(0, 10)), PhysicalSize::new(1, 1));
    }

    #[test]
    fn test_mouse_buttons_map() {
        assert_eq!(servo_mouse_button(WinitMouseButton::Left), ServoMouseButton::Left);
        assert_eq!(servo_mouse_button(WinitMouseButton::Other(7)), ServoMouseButton::Other(7));
    }
}
