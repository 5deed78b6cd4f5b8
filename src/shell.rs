//! Mise en page du shell : barre de progression, bandeau d'erreur, zone de
//! contenu et barre de quatre boutons.
//!
//! Purement logique : [`ShellLayout::compute`] produit une description
//! géométrique à partir de [`NavigationState`], que
//! [`crate::chrome::ChromeRenderer`] dessine ensuite. Aucun état propre.
//!
//! ```text
//! ┌──────────────────────────────────────┐ ← progression (progress_height)
//! │ ⚠ Bandeau d'erreur              [×]  │ ← superposé au contenu
//! │                                      │
//! │            Contenu Servo             │
//! │                                      │
//! ├──────────┬──────────┬────────┬───────┤
//! │ < Zurück │  > Vor   │ Laden  │ Start │ ← barre de boutons (toolbar_height)
//! └──────────┴──────────┴────────┴───────┘
//! ```

use crate::navigation::NavigationState;

/// Rectangle en pixels physiques, origine en haut à gauche.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Action déclenchée par un clic dans le shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellAction {
    Back,
    Forward,
    ReloadOrStop,
    Home,
    DismissError,
}

/// Glyphe affiché au-dessus du libellé d'un bouton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    ChevronLeft,
    ChevronRight,
    Reload,
    Stop,
    House,
}

impl Icon {
    pub fn glyph(self) -> &'static str {
        match self {
            Self::ChevronLeft => "<",
            Self::ChevronRight => ">",
            Self::Reload => "\u{21BB}",
            Self::Stop => "\u{D7}",
            Self::House => "\u{2302}",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolbarButton {
    pub action: ShellAction,
    pub icon: Icon,
    pub label: &'static str,
    pub enabled: bool,
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBanner {
    pub message: String,
    pub rect: Rect,
    pub dismiss: Rect,
}

/// Dimensions fixes du shell, issues de la configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShellMetrics {
    pub progress_height: f32,
    pub banner_height: f32,
    pub banner_margin: f32,
    pub toolbar_height: f32,
}

impl ShellMetrics {
    /// Zone de contenu pour une fenêtre donnée. Ne dépend pas de l'état :
    /// le bandeau se superpose au contenu.
    pub fn content_rect(&self, width: f32, height: f32) -> Rect {
        let top = self.progress_height.min(height);
        let bottom = (height - self.toolbar_height).max(top);
        Rect::new(0.0, top, width, bottom - top)
    }
}

/// Résultat du rendu logique d'un [`NavigationState`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShellLayout {
    pub width: f32,
    pub height: f32,
    pub progress_track: Rect,
    /// `None` hors chargement.
    pub progress_bar: Option<Rect>,
    pub banner: Option<ErrorBanner>,
    pub content: Rect,
    pub toolbar: Rect,
    pub buttons: [ToolbarButton; 4],
}

impl ShellLayout {
    pub fn compute(state: &NavigationState, metrics: &ShellMetrics, width: f32, height: f32) -> Self {
        let content = metrics.content_rect(width, height);
        let progress_track = Rect::new(0.0, 0.0, width, content.y);

        let progress_bar = state.is_loading.then(|| {
            let fraction = state.progress.clamp(0.0, 1.0) as f32;
            Rect::new(0.0, 0.0, width * fraction, progress_track.height)
        });

        let banner = state
            .error_message
            .as_deref()
            .filter(|message| !message.is_empty())
            .map(|message| {
                let m = metrics.banner_margin;
                let rect = Rect::new(
                    content.x + m,
                    content.y + m,
                    (content.width - 2.0 * m).max(0.0),
                    metrics.banner_height,
                );
                let side = metrics.banner_height;
                ErrorBanner {
                    message: message.to_string(),
                    dismiss: Rect::new(rect.x + rect.width - side, rect.y, side, side),
                    rect,
                }
            });

        let toolbar = Rect::new(0.0, content.y + content.height, width, height - (content.y + content.height));
        let slot = toolbar.width / 4.0;
        let button = |index: usize, action, icon, label, enabled| ToolbarButton {
            action,
            icon,
            label,
            enabled,
            rect: Rect::new(slot * index as f32, toolbar.y, slot, toolbar.height),
        };

        let (reload_icon, reload_label) = if state.is_loading {
            (Icon::Stop, "Stopp")
        } else {
            (Icon::Reload, "Laden")
        };

        let buttons = [
            button(0, ShellAction::Back, Icon::ChevronLeft, "Zurück", state.can_go_back),
            button(1, ShellAction::Forward, Icon::ChevronRight, "Vor", state.can_go_forward),
            button(2, ShellAction::ReloadOrStop, reload_icon, reload_label, true),
            button(3, ShellAction::Home, Icon::House, "Start", true),
        ];

        Self {
            width,
            height,
            progress_track,
            progress_bar,
            banner,
            content,
            toolbar,
            buttons,
        }
    }

    /// Action associée à un clic, `None` s'il tombe sur le contenu ou sur
    /// un bouton désactivé.
    pub fn hit_test(&self, x: f32, y: f32) -> Option<ShellAction> {
        if let Some(banner) = &self.banner {
            if banner.dismiss.contains(x, y) {
                return Some(ShellAction::DismissError);
            }
        }
        self.buttons
            .iter()
            .find(|b| b.rect.contains(x, y))
            .filter(|b| b.enabled)
            .map(|b| b.action)
    }

    /// Vrai si le point appartient au contenu web (hors bandeau).
    pub fn is_content(&self, x: f32, y: f32) -> bool {
        self.content.contains(x, y) && !self.banner.as_ref().is_some_and(|b| b.rect.contains(x, y))
    }
}
