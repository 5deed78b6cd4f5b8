//! État de navigation publié et miroir des propriétés de la surface.
//!
//! La surface de rendu expose ses propres propriétés observables
//! ([`SurfaceProperties`]) et émet des [`NavigationEvent`]. Le
//! [`NavigationStateMirror`] s'abonne à chaque propriété séparément et
//! republie le tout dans un [`NavigationStore`] que le shell observe.
//!
//! ```text
//! WebViewDelegate ──set()──▶ SurfaceProperties ──observe()──▶ Mirror ──update()──▶ NavigationStore
//!        └──────────── NavigationEvent ──────────▶ Mirror::handle()                    │
//!                                                                          observe() ─▶ redraw
//! ```

use std::cell::Cell;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, info};

use crate::observe::{Observable, Observation};

/// Nom affiché quand la page n'a pas de titre.
pub const APP_NAME: &str = "LimoT";

/// État publié, lu par le shell.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationState {
    pub is_loading: bool,
    pub can_go_back: bool,
    pub can_go_forward: bool,
    /// Entre 0.0 et 1.0.
    pub progress: f64,
    pub title: String,
    pub error_message: Option<String>,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self {
            is_loading: false,
            can_go_back: false,
            can_go_forward: false,
            progress: 0.0,
            title: APP_NAME.to_string(),
            error_message: None,
        }
    }
}

pub type NavigationStore = Observable<NavigationState>;

/// Cause d'échec d'une navigation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Chargement remplacé ou interrompu : pas une erreur pour l'utilisateur.
    #[error("Navigation abgebrochen")]
    Cancelled,

    #[error("vom Werbeblocker gesperrt: {0}")]
    Blocked(String),

    #[error("Seite abgestürzt: {0}")]
    Crashed(String),

    #[error("{0}")]
    Network(String),
}

impl LoadError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Signal de cycle de vie d'un chargement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    Started,
    Finished,
    /// Échec après que du contenu a été engagé.
    Failed(LoadError),
    /// Échec avant tout contenu engagé.
    ProvisionalFailed(LoadError),
}

/// Étape de chargement publiée par le moteur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Started,
    HeadParsed,
    Complete,
}

impl LoadStage {
    /// Le moteur ne publie pas de progression chiffrée : on la déduit de l'étape.
    pub fn progress(self) -> f64 {
        match self {
            Self::Started => 0.1,
            Self::HeadParsed => 0.5,
            Self::Complete => 1.0,
        }
    }
}

/// Propriétés intrinsèques de la surface, écrites par la glue moteur.
pub struct SurfaceProperties {
    pub loading: Observable<bool>,
    pub progress: Observable<f64>,
    pub can_go_back: Observable<bool>,
    pub can_go_forward: Observable<bool>,
    pub title: Observable<Option<String>>,
}

impl Default for SurfaceProperties {
    fn default() -> Self {
        Self {
            loading: Observable::new(false),
            progress: Observable::new(0.0),
            can_go_back: Observable::new(false),
            can_go_forward: Observable::new(false),
            title: Observable::new(None),
        }
    }
}

fn display_title(title: Option<&str>) -> String {
    match title.map(str::trim) {
        Some(title) if !title.is_empty() => title.to_string(),
        _ => APP_NAME.to_string(),
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

/// Republie l'état de la surface dans le [`NavigationStore`].
///
/// Seul écrivain du store. Les abonnements aux propriétés sont libérés
/// quand le miroir est supprimé.
pub struct NavigationStateMirror {
    store: Rc<NavigationStore>,
    /// Le message affiché vient de `report` : il survit aux démarrages.
    reported: Cell<bool>,
    _observations: Vec<Observation>,
}

impl NavigationStateMirror {
    pub fn attach(properties: &SurfaceProperties, store: Rc<NavigationStore>) -> Self {
        let mut observations = Vec::with_capacity(5);

        let s = store.clone();
        observations.push(properties.loading.observe(move |&loading| {
            s.update(|state| state.is_loading = loading);
        }));

        let s = store.clone();
        observations.push(properties.progress.observe(move |&progress| {
            s.update(|state| state.progress = clamp_progress(progress));
        }));

        let s = store.clone();
        observations.push(properties.can_go_back.observe(move |&can_go_back| {
            s.update(|state| state.can_go_back = can_go_back);
        }));

        let s = store.clone();
        observations.push(properties.can_go_forward.observe(move |&can_go_forward| {
            s.update(|state| state.can_go_forward = can_go_forward);
        }));

        let s = store.clone();
        observations.push(properties.title.observe(move |title: &Option<String>| {
            s.update(|state| state.title = display_title(title.as_deref()));
        }));

        store.update(|state| {
            state.is_loading = properties.loading.get();
            state.progress = clamp_progress(properties.progress.get());
            state.can_go_back = properties.can_go_back.get();
            state.can_go_forward = properties.can_go_forward.get();
            state.title = display_title(properties.title.get().as_deref());
        });

        Self {
            store,
            reported: Cell::new(false),
            _observations: observations,
        }
    }

    pub fn handle(&self, event: NavigationEvent) {
        debug!(?event, "Événement de navigation");
        match event {
            NavigationEvent::Started => {
                let keep = self.reported.get();
                self.store.update(|state| {
                    state.is_loading = true;
                    if !keep {
                        state.error_message = None;
                    }
                })
            }
            NavigationEvent::Finished => self.store.update(|state| state.is_loading = false),
            NavigationEvent::Failed(error) => self.fail("Ladefehler", error),
            NavigationEvent::ProvisionalFailed(error) => self.fail("Verbindungsfehler", error),
        };
    }

    fn fail(&self, prefix: &str, error: LoadError) -> bool {
        let message = (!error.is_cancellation()).then(|| format!("{prefix}: {error}"));
        if let Some(ref message) = message {
            info!(%message, "Échec de navigation");
        }
        if message.is_some() {
            self.reported.set(false);
        }
        self.store.update(|state| {
            state.is_loading = false;
            if message.is_some() {
                state.error_message = message;
            }
        })
    }

    /// Affiche un message hors navigation (échec du bloqueur), conservé
    /// jusqu'à sa fermeture ou jusqu'à une erreur de navigation.
    pub fn report(&self, message: String) {
        self.reported.set(true);
        self.store.update(|state| state.error_message = Some(message));
    }

    /// Ferme le bandeau d'erreur.
    pub fn dismiss_error(&self) {
        self.reported.set(false);
        self.store.update(|state| state.error_message = None);
    }

    pub fn state(&self) -> NavigationState {
        self.store.get()
    }
}
