//! Contrôleur de la vue de contenu.
//!
//! Possède l'unique surface de rendu et expose les actions de navigation.
//! Toutes les actions sont « fire-and-forget » : leurs effets reviennent
//! plus tard par le [`crate::navigation::NavigationStateMirror`].
//!
//! La surface est abstraite derrière [`RenderingSurface`] ; l'implémentation
//! Servo vit dans [`crate::servo_glue`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

use tracing::{debug, info};
use url::Url;

use crate::appearance::{self, DarkMode};
use crate::navigation::{
    LoadError, LoadStage, NavigationEvent, NavigationStateMirror, NavigationStore,
    SurfaceProperties,
};
use crate::rules::CompiledFilterSet;

/// Adresse fixe du dictionnaire.
pub const HOME_URL: &str = "https://loghatnameh.de/";

static HOME: LazyLock<Url> =
    LazyLock::new(|| Url::parse(HOME_URL).expect("HOME_URL doit être une URL valide"));

pub fn home_url() -> Url {
    HOME.clone()
}

/// Contrat attendu du moteur de rendu.
pub trait RenderingSurface {
    fn load(&self, url: Url);
    fn reload(&self);
    /// Interrompt le chargement en cours.
    fn stop(&self);
    fn go_back(&self);
    fn go_forward(&self);
    fn evaluate_script(&self, script: String);
    /// Configuration de contenu à laquelle les filtres sont rattachés.
    fn configuration(&self) -> &ContentConfiguration;
}

struct AttachedFilter {
    set: Arc<CompiledFilterSet>,
    /// (url, source_url, type de requête) → bloqué ?
    memo: RefCell<HashMap<(String, String, String), bool>>,
}

/// Filtres rattachés à une surface, consultés pour chaque ressource chargée.
#[derive(Default)]
pub struct ContentConfiguration {
    filters: RefCell<Vec<AttachedFilter>>,
}

impl ContentConfiguration {
    pub fn add_filter(&self, set: Arc<CompiledFilterSet>) {
        self.filters.borrow_mut().push(AttachedFilter {
            set,
            memo: RefCell::new(HashMap::new()),
        });
    }

    pub fn filter_count(&self) -> usize {
        self.filters.borrow().len()
    }

    pub fn should_block(&self, url: &str, source_url: &str, request_type: &str) -> bool {
        self.filters.borrow().iter().any(|filter| {
            let key = (url.to_owned(), source_url.to_owned(), request_type.to_owned());
            if let Some(&cached) = filter.memo.borrow().get(&key) {
                return cached;
            }
            let blocked = filter.set.should_block(url, source_url, request_type);
            filter.memo.borrow_mut().insert(key, blocked);
            blocked
        })
    }

    /// Vide les décisions mémorisées. À appeler à chaque changement d'URL.
    pub fn clear_memo(&self) {
        for filter in self.filters.borrow().iter() {
            filter.memo.borrow_mut().clear();
        }
    }
}

pub struct ContentViewController<S> {
    surface: Option<S>,
    store: Rc<NavigationStore>,
    home: Url,
    dark_mode: DarkMode,
    /// Vrai quand le filtre est rattaché à la configuration de `surface`.
    filter_attached: bool,
}

impl<S: RenderingSurface> ContentViewController<S> {
    pub fn new(store: Rc<NavigationStore>, dark_mode: DarkMode) -> Self {
        Self {
            surface: None,
            store,
            home: home_url(),
            dark_mode,
            filter_attached: false,
        }
    }

    /// Prend possession de la surface nouvellement créée.
    pub fn attach_surface(&mut self, surface: S) {
        self.surface = Some(surface);
        self.filter_attached = false;
    }

    /// Rend la surface (destruction de l'écran).
    pub fn detach_surface(&mut self) -> Option<S> {
        self.filter_attached = false;
        self.surface.take()
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn filter_attached(&self) -> bool {
        self.filter_attached
    }

    pub fn load_home(&self) {
        if let Some(surface) = &self.surface {
            debug!(url = %self.home, "Chargement de la page d'accueil");
            surface.load(self.home.clone());
        }
    }

    pub fn go_back(&self) {
        if !self.store.get().can_go_back {
            return;
        }
        if let Some(surface) = &self.surface {
            surface.go_back();
        }
    }

    pub fn go_forward(&self) {
        if !self.store.get().can_go_forward {
            return;
        }
        if let Some(surface) = &self.surface {
            surface.go_forward();
        }
    }

    /// Recharge, ou interrompt le chargement s'il est en cours.
    pub fn reload(&self) {
        let Some(surface) = &self.surface else { return };
        if self.store.get().is_loading {
            debug!("Interruption du chargement");
            surface.stop();
        } else {
            surface.reload();
        }
    }

    /// Rattache le filtre si la surface et le filtre existent et qu'il ne
    /// l'est pas déjà. Retourne `true` si le rattachement a eu lieu.
    pub fn apply_filter_if_ready(&mut self, filter: Option<Arc<CompiledFilterSet>>) -> bool {
        if self.filter_attached {
            return false;
        }
        let (Some(surface), Some(filter)) = (&self.surface, filter) else {
            return false;
        };
        surface.configuration().add_filter(filter);
        self.filter_attached = true;
        info!("Filtre publicitaire rattaché à la vue");
        true
    }

    /// Traduit une étape de chargement du moteur en propriétés et événements.
    ///
    /// Un `Started` pendant un chargement remplace l'ancien : il est d'abord
    /// signalé comme annulation provisoire, sans message.
    pub fn track_load(
        &self,
        stage: LoadStage,
        properties: &SurfaceProperties,
        mirror: &NavigationStateMirror,
    ) {
        match stage {
            LoadStage::Started => {
                if properties.loading.get() {
                    mirror.handle(NavigationEvent::ProvisionalFailed(LoadError::Cancelled));
                }
                mirror.handle(NavigationEvent::Started);
                properties.loading.set(true);
                properties.progress.set(stage.progress());
            }
            LoadStage::HeadParsed => properties.progress.set(stage.progress()),
            LoadStage::Complete => {
                properties.progress.set(stage.progress());
                properties.loading.set(false);
                mirror.handle(NavigationEvent::Finished);
                self.on_navigation_finished();
            }
        }
    }

    /// Le document principal a été refusé par le filtre.
    pub fn main_frame_blocked(
        &self,
        host: &str,
        properties: &SurfaceProperties,
        mirror: &NavigationStateMirror,
    ) {
        properties.loading.set(false);
        properties.progress.set(0.0);
        mirror.handle(NavigationEvent::ProvisionalFailed(LoadError::Blocked(
            host.to_string(),
        )));
    }

    /// Appelé après chaque chargement réussi.
    pub fn on_navigation_finished(&self) {
        let (Some(surface), Some(script)) = (&self.surface, appearance::injection_script(self.dark_mode))
        else {
            return;
        };
        surface.evaluate_script(script);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::navigation::NavigationState;
    use crate::rules::{self, BUILTIN_RULES, BlockRule, ResourceType, RuleCompiler};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Load(String),
        Reload,
        Stop,
        Back,
        Forward,
        Script,
    }

    #[derive(Default)]
    struct RecordingSurface {
        calls: RefCell<Vec<Call>>,
        configuration: ContentConfiguration,
    }

    impl RenderingSurface for RecordingSurface {
        fn load(&self, url: Url) {
            self.calls.borrow_mut().push(Call::Load(url.to_string()));
        }
        fn reload(&self) {
            self.calls.borrow_mut().push(Call::Reload);
        }
        fn stop(&self) {
            self.calls.borrow_mut().push(Call::Stop);
        }
        fn go_back(&self) {
            self.calls.borrow_mut().push(Call::Back);
        }
        fn go_forward(&self) {
            self.calls.borrow_mut().push(Call::Forward);
        }
        fn evaluate_script(&self, _script: String) {
            self.calls.borrow_mut().push(Call::Script);
        }
        fn configuration(&self) -> &ContentConfiguration {
            &self.configuration
        }
    }

    struct Fixture {
        properties: SurfaceProperties,
        mirror: NavigationStateMirror,
        controller: ContentViewController<RecordingSurface>,
    }

    fn fixture(dark_mode: DarkMode) -> Fixture {
        let store = Rc::new(NavigationStore::new(NavigationState::default()));
        let properties = SurfaceProperties::default();
        let mirror = NavigationStateMirror::attach(&properties, store.clone());
        let mut controller = ContentViewController::new(store, dark_mode);
        controller.attach_surface(RecordingSurface::default());
        Fixture {
            properties,
            mirror,
            controller,
        }
    }

    fn calls(controller: &ContentViewController<RecordingSurface>) -> Vec<Call> {
        controller.surface().unwrap().calls.borrow().clone()
    }

    fn compiled() -> Arc<CompiledFilterSet> {
        Arc::new(rules::compile(BUILTIN_RULES).unwrap())
    }

    #[test]
    fn test_load_home_requests_fixed_address() {
        let f = fixture(DarkMode::Auto);
        f.controller.load_home();
        assert_eq!(calls(&f.controller), vec![Call::Load(HOME_URL.to_string())]);
    }

    #[test]
    fn test_go_back_without_history_is_noop() {
        let f = fixture(DarkMode::Auto);
        let before = f.mirror.state();
        f.controller.go_back();
        f.controller.go_forward();
        assert!(calls(&f.controller).is_empty());
        assert_eq!(f.mirror.state(), before);
    }

    #[test]
    fn test_history_navigation_follows_capabilities() {
        let f = fixture(DarkMode::Auto);
        f.properties.can_go_back.set(true);
        f.controller.go_back();
        f.controller.go_forward();
        f.properties.can_go_forward.set(true);
        f.controller.go_forward();
        assert_eq!(calls(&f.controller), vec![Call::Back, Call::Forward]);
    }

    #[test]
    fn test_reload_toggles_to_stop_while_loading() {
        let f = fixture(DarkMode::Auto);
        f.controller.reload();
        f.mirror.handle(NavigationEvent::Started);
        f.controller.reload();
        f.mirror.handle(NavigationEvent::ProvisionalFailed(LoadError::Cancelled));
        f.controller.reload();
        assert_eq!(calls(&f.controller), vec![Call::Reload, Call::Stop, Call::Reload]);
        assert!(f.mirror.state().error_message.is_none());
    }

    #[test]
    fn test_apply_filter_is_idempotent() {
        let mut f = fixture(DarkMode::Auto);
        let filter = compiled();
        assert!(f.controller.apply_filter_if_ready(Some(filter.clone())));
        for _ in 0..4 {
            assert!(!f.controller.apply_filter_if_ready(Some(filter.clone())));
        }
        assert_eq!(f.controller.surface().unwrap().configuration.filter_count(), 1);
    }

    #[test]
    fn test_apply_filter_waits_for_both_sides() {
        let store = Rc::new(NavigationStore::new(NavigationState::default()));
        let mut controller: ContentViewController<RecordingSurface> =
            ContentViewController::new(store, DarkMode::Never);

        // Filtre prêt, pas de surface.
        assert!(!controller.apply_filter_if_ready(Some(compiled())));
        // Surface prête, pas de filtre.
        controller.attach_surface(RecordingSurface::default());
        assert!(!controller.apply_filter_if_ready(None));
        assert!(!controller.filter_attached());
        assert!(controller.apply_filter_if_ready(Some(compiled())));
    }

    #[test]
    fn test_filter_compiled_before_surface_attaches_on_creation() {
        let mut compiler = RuleCompiler::new();
        let (tx, rx) = mpsc::channel();
        compiler.request(BUILTIN_RULES, move |r| {
            let _ = tx.send(r);
        });
        compiler.resolve(rx.recv_timeout(Duration::from_secs(30)).unwrap());

        let store = Rc::new(NavigationStore::new(NavigationState::default()));
        let mut controller = ContentViewController::new(store, DarkMode::Auto);
        controller.attach_surface(RecordingSurface::default());
        assert!(controller.apply_filter_if_ready(compiler.filter()));
        assert_eq!(controller.surface().unwrap().configuration.filter_count(), 1);
    }

    #[test]
    fn test_filter_compiled_after_surface_attaches_on_completion() {
        let mut compiler = RuleCompiler::new();
        let (tx, rx) = mpsc::channel();
        compiler.request(BUILTIN_RULES, move |r| {
            let _ = tx.send(r);
        });

        let mut f = fixture(DarkMode::Auto);
        // Compilation encore en attente : rien à rattacher.
        assert!(!f.controller.apply_filter_if_ready(compiler.filter()));
        assert_eq!(f.controller.surface().unwrap().configuration.filter_count(), 0);

        let filter = compiler.resolve(rx.recv_timeout(Duration::from_secs(30)).unwrap());
        assert!(f.controller.apply_filter_if_ready(filter));
        assert_eq!(f.controller.surface().unwrap().configuration.filter_count(), 1);
    }

    #[test]
    fn test_new_surface_gets_filter_again() {
        let mut f = fixture(DarkMode::Auto);
        let filter = compiled();
        f.controller.apply_filter_if_ready(Some(filter.clone()));
        f.controller.detach_surface();
        f.controller.attach_surface(RecordingSurface::default());
        assert!(f.controller.apply_filter_if_ready(Some(filter)));
    }

    #[test]
    fn test_configuration_blocks_after_attach() {
        let mut f = fixture(DarkMode::Auto);
        let ad = "https://pagead2.googlesyndication.com/pagead/show_ads.js";
        assert!(
            !f.controller
                .surface()
                .unwrap()
                .configuration
                .should_block(ad, HOME_URL, "script")
        );

        f.controller.apply_filter_if_ready(Some(compiled()));
        let config = &f.controller.surface().unwrap().configuration;
        assert!(config.should_block(ad, HOME_URL, "script"));
        assert!(config.should_block(ad, HOME_URL, "script"));
        config.clear_memo();
        assert!(!config.should_block("https://loghatnameh.de/a.css", HOME_URL, "stylesheet"));
    }

    #[test]
    fn test_memo_distinguishes_request_types() {
        static SCRIPTS_ONLY: &[BlockRule] =
            &[BlockRule::pattern("adsense").only(&[ResourceType::Script])];
        let set = Arc::new(rules::compile(SCRIPTS_ONLY).unwrap());
        let config = ContentConfiguration::default();
        config.add_filter(set.clone());

        let url = "https://cdn.example.net/adsense/unit";
        assert!(!config.should_block(url, HOME_URL, "other"));
        assert!(config.should_block(url, HOME_URL, "script"));
        assert!(!config.should_block(url, HOME_URL, "other"));
        for request_type in ["other", "script", "image"] {
            assert_eq!(
                config.should_block(url, HOME_URL, request_type),
                set.should_block(url, HOME_URL, request_type),
                "{request_type}"
            );
        }
    }

    #[test]
    fn test_finished_injects_dark_mode() {
        let f = fixture(DarkMode::Auto);
        f.controller.on_navigation_finished();
        assert_eq!(calls(&f.controller), vec![Call::Script]);

        let f = fixture(DarkMode::Never);
        f.controller.on_navigation_finished();
        assert!(calls(&f.controller).is_empty());
    }

    #[test]
    fn test_load_stages_drive_progress_and_state() {
        let f = fixture(DarkMode::Never);
        f.controller.track_load(LoadStage::Started, &f.properties, &f.mirror);
        let state = f.mirror.state();
        assert!(state.is_loading);
        assert_eq!(state.progress, LoadStage::Started.progress());

        f.controller.track_load(LoadStage::HeadParsed, &f.properties, &f.mirror);
        assert_eq!(f.mirror.state().progress, LoadStage::HeadParsed.progress());
        assert!(f.mirror.state().is_loading);
    }

    #[test]
    fn test_second_start_cancels_without_banner() {
        let f = fixture(DarkMode::Never);
        f.controller.track_load(LoadStage::Started, &f.properties, &f.mirror);
        f.controller.track_load(LoadStage::Started, &f.properties, &f.mirror);
        let state = f.mirror.state();
        assert!(state.is_loading);
        assert!(f.properties.loading.get());
        assert_eq!(state.error_message, None);
    }

    #[test]
    fn test_complete_finishes_and_injects_dark_mode() {
        let f = fixture(DarkMode::Always);
        f.controller.track_load(LoadStage::Started, &f.properties, &f.mirror);
        f.controller.track_load(LoadStage::Complete, &f.properties, &f.mirror);
        let state = f.mirror.state();
        assert!(!state.is_loading);
        assert_eq!(state.progress, 1.0);
        assert_eq!(calls(&f.controller), vec![Call::Script]);
    }

    #[test]
    fn test_late_completion_after_stop_finishes_normally() {
        let f = fixture(DarkMode::Always);
        f.controller.track_load(LoadStage::Started, &f.properties, &f.mirror);
        f.controller.reload();
        // L'arrêt ne fait que remettre l'affichage au repos.
        f.properties.loading.set(false);
        f.properties.progress.set(0.0);
        assert!(!f.mirror.state().is_loading);

        f.controller.track_load(LoadStage::Complete, &f.properties, &f.mirror);
        let state = f.mirror.state();
        assert!(!state.is_loading);
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.error_message, None);
        assert_eq!(calls(&f.controller), vec![Call::Stop, Call::Script]);
    }

    #[test]
    fn test_blocked_main_frame_reports_provisional_failure() {
        let f = fixture(DarkMode::Auto);
        f.controller.track_load(LoadStage::Started, &f.properties, &f.mirror);
        f.controller.main_frame_blocked("ads.example.net", &f.properties, &f.mirror);
        let state = f.mirror.state();
        assert!(!state.is_loading);
        assert_eq!(state.progress, 0.0);
        assert_eq!(
            state.error_message.as_deref(),
            Some("Verbindungsfehler: vom Werbeblocker gesperrt: ads.example.net")
        );
        assert!(calls(&f.controller).is_empty());
    }

    #[test]
    fn test_actions_without_surface_do_nothing() {
        let store = Rc::new(NavigationStore::new(NavigationState::default()));
        let controller: ContentViewController<RecordingSurface> =
            ContentViewController::new(store, DarkMode::Always);
        controller.load_home();
        controller.reload();
        controller.on_navigation_finished();
        assert!(controller.surface().is_none());
    }
}
