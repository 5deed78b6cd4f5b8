//! Feuille de style sombre injectée après chaque chargement.

use serde::{Deserialize, Serialize};

/// Quand appliquer le thème sombre au site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DarkMode {
    /// Suit `prefers-color-scheme` de la page.
    #[default]
    Auto,
    Always,
    Never,
}

impl std::str::FromStr for DarkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!("mode sombre inconnu : {other}")),
        }
    }
}

/// Identifiant de l'élément `<style>` injecté ; évite les doublons.
const STYLE_ELEMENT_ID: &str = "limot-dark-mode";

const DARK_MODE_CSS: &str = "\
body { background-color: #1c1c1e !important; color: #ffffff !important; }
a { color: #0a84ff !important; }
input, textarea, select { background-color: #2c2c2e !important; color: #ffffff !important; border-color: #48484a !important; }
table, th, td { border-color: #48484a !important; background-color: #2c2c2e !important; }
div, p, span, li { color: #ffffff !important; }";

/// Script JavaScript qui ajoute la feuille de style au document.
/// `None` si le mode est [`DarkMode::Never`].
pub fn injection_script(mode: DarkMode) -> Option<String> {
    let css = match mode {
        DarkMode::Never => return None,
        DarkMode::Auto => format!("@media (prefers-color-scheme: dark) {{\n{DARK_MODE_CSS}\n}}"),
        DarkMode::Always => DARK_MODE_CSS.to_string(),
    };

    Some(format!(
        r#"(function() {{
    if (document.getElementById('{STYLE_ELEMENT_ID}')) {{ return; }}
    var style = document.createElement('style');
    style.id = '{STYLE_ELEMENT_ID}';
    style.textContent = `{css}`;
    (document.head || document.documentElement).appendChild(style);
}})();"#
    ))
}
