//! Couche d'intégration entre Servo et LimoT.
//!
//! 1. **[`Waker`] / [`AppEvent`]** : pont `Send + Sync` entre les threads
//!    (Servo, compilation des règles) et la boucle Winit du thread principal.
//!
//! 2. **[`ServoSurface`]** : la `WebView` vue comme [`RenderingSurface`],
//!    avec ses propriétés observables et sa configuration de contenu.
//!
//! 3. **[`WebViewDelegate`] pour [`AppState`]** : traduit les notifications
//!    Servo en écritures sur [`SurfaceProperties`] et en [`NavigationEvent`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use servo::{LoadStatus, WebResourceLoad, WebResourceResponse, WebView, WebViewDelegate};
use tracing::{debug, warn};
use url::Url;
use winit::event_loop::{EventLoop, EventLoopProxy};

use crate::browser::AppState;
use crate::controller::{ContentConfiguration, RenderingSurface};
use crate::navigation::{LoadError, LoadStage, NavigationEvent, SurfaceProperties};
use crate::rules::{self, CompileResult};

// ─────────────────────────────────────────────────────────────────────────────
// Waker : pont threads → Winit
// ─────────────────────────────────────────────────────────────────────────────

/// Événement envoyé à travers le `EventLoopProxy` de Winit.
#[derive(Debug)]
pub enum AppEvent {
    /// Servo a du travail pour le thread principal (`spin_event_loop`).
    Wake,
    /// Le thread `filter-compiler` a terminé.
    FiltersCompiled(CompileResult),
}

/// `Clone + Send + Sync` car `EventLoopProxy` l'est, comme l'exige
/// `EventLoopWaker`.
#[derive(Clone)]
pub struct Waker(EventLoopProxy<AppEvent>);

impl Waker {
    pub fn new(event_loop: &EventLoop<AppEvent>) -> Self {
        Self(event_loop.create_proxy())
    }
}

impl embedder_traits::EventLoopWaker for Waker {
    fn clone_box(&self) -> Box<dyn embedder_traits::EventLoopWaker> {
        Box::new(Self(self.0.clone()))
    }

    fn wake(&self) {
        if let Err(error) = self.0.send_event(AppEvent::Wake) {
            warn!(?error, "Échec du réveil de la boucle d'événements Winit");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ServoSurface
// ─────────────────────────────────────────────────────────────────────────────

/// Script d'interruption : Servo n'expose pas d'arrêt de chargement.
/// Il agit sur le document engagé ; une navigation pas encore engagée
/// continue, seul l'affichage repasse au repos.
const STOP_SCRIPT: &str = "window.stop()";

pub struct ServoSurface {
    webview: WebView,
    properties: Rc<SurfaceProperties>,
    configuration: ContentConfiguration,
}

impl ServoSurface {
    pub fn new(webview: WebView, properties: Rc<SurfaceProperties>) -> Self {
        Self {
            webview,
            properties,
            configuration: ContentConfiguration::default(),
        }
    }

    pub fn webview(&self) -> &WebView {
        &self.webview
    }
}

impl RenderingSurface for ServoSurface {
    fn load(&self, url: Url) {
        self.webview.load(url);
    }

    fn reload(&self) {
        self.webview.reload();
    }

    fn stop(&self) {
        self.evaluate_script(STOP_SCRIPT.to_string());
        self.properties.loading.set(false);
        self.properties.progress.set(0.0);
    }

    fn go_back(&self) {
        self.webview.go_back(1);
    }

    fn go_forward(&self) {
        self.webview.go_forward(1);
    }

    fn evaluate_script(&self, script: String) {
        self.webview.evaluate_javascript(script, |result| {
            if let Err(error) = result {
                debug!(?error, "Échec d'évaluation du script");
            }
        });
    }

    fn configuration(&self) -> &ContentConfiguration {
        &self.configuration
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Traduction des notifications Servo
// ─────────────────────────────────────────────────────────────────────────────

pub fn load_stage(status: &LoadStatus) -> LoadStage {
    match status {
        LoadStatus::Started => LoadStage::Started,
        LoadStatus::HeadParsed => LoadStage::HeadParsed,
        LoadStatus::Complete => LoadStage::Complete,
    }
}

/// `(can_go_back, can_go_forward)` pour un historique de `len` entrées.
pub fn history_capabilities(len: usize, current: usize) -> (bool, bool) {
    (current > 0 && len > 0, current + 1 < len)
}

impl AppState {
    /// Consulte le filtre rattaché. Retourne `true` si la requête a été annulée.
    fn filter_request(&self, load: WebResourceLoad) -> bool {
        let request = load.request();
        let url = request.url.clone();
        let is_main_frame = request.is_for_main_frame;
        let source_url = self
            .current_url
            .borrow()
            .as_ref()
            .map(Url::to_string)
            .unwrap_or_default();
        let request_type = rules::request_type_for(&url, is_main_frame);

        let blocked = self.controller.borrow().surface().is_some_and(|surface| {
            surface
                .configuration()
                .should_block(url.as_str(), &source_url, request_type)
        });
        if !blocked {
            return false;
        }

        debug!(url = url.as_str(), request_type, "Requête bloquée");
        load.intercept(WebResourceResponse::new(url.clone())).cancel();

        if is_main_frame {
            self.controller.borrow().main_frame_blocked(
                url.host_str().unwrap_or(url.as_str()),
                &self.properties,
                &self.mirror,
            );
        }
        true
    }
}

/// Chaque callback est protégé par `catch_unwind` : une panique (double
/// emprunt d'un `RefCell`…) ne doit pas traverser Servo.
impl WebViewDelegate for AppState {
    fn notify_new_frame_ready(&self, _webview: WebView) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.window.request_redraw();
        }));
    }

    fn notify_load_status_changed(&self, _webview: WebView, status: LoadStatus) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            debug!(?status, "Statut de chargement");
            self.controller
                .borrow()
                .track_load(load_stage(&status), &self.properties, &self.mirror);
        }));
    }

    fn notify_history_changed(&self, _webview: WebView, entries: Vec<Url>, current: usize) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let (back, forward) = history_capabilities(entries.len(), current);
            self.properties.can_go_back.set(back);
            self.properties.can_go_forward.set(forward);
        }));
    }

    fn notify_url_changed(&self, _webview: WebView, url: Url) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            *self.current_url.borrow_mut() = Some(url);
            if let Some(surface) = self.controller.borrow().surface() {
                surface.configuration().clear_memo();
            }
        }));
    }

    fn notify_page_title_changed(&self, _webview: WebView, title: Option<String>) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.properties.title.set(title);
        }));
    }

    fn notify_crashed(&self, _webview: WebView, reason: String, backtrace: Option<String>) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            warn!(%reason, "Le contenu a planté");
            if let Some(backtrace) = backtrace {
                debug!(%backtrace, "Trace du plantage");
            }
            self.properties.loading.set(false);
            self.properties.progress.set(0.0);
            self.mirror
                .handle(NavigationEvent::Failed(LoadError::Crashed(reason)));
        }));
    }

    /// En cas de panique, la requête continue sans filtrage.
    fn load_web_resource(&self, _webview: WebView, load: WebResourceLoad) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.filter_request(load);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_status_maps_to_stage() {
        assert_eq!(load_stage(&LoadStatus::Started), LoadStage::Started);
        assert_eq!(load_stage(&LoadStatus::HeadParsed), LoadStage::HeadParsed);
        assert_eq!(load_stage(&LoadStatus::Complete), LoadStage::Complete);
    }

    #[test]
    fn test_history_single_entry() {
        assert_eq!(history_capabilities(1, 0), (false, false));
    }

    #[test]
    fn test_history_middle_entry() {
        assert_eq!(history_capabilities(3, 1), (true, true));
    }

    #[test]
    fn test_history_at_ends() {
        assert_eq!(history_capabilities(3, 2), (true, false));
        assert_eq!(history_capabilities(3, 0), (false, true));
    }

    #[test]
    fn test_history_empty() {
        assert_eq!(history_capabilities(0, 0), (false, false));
    }
}
