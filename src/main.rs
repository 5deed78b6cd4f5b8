//! Point d'entrée de LimoT.
//!
//! Usage :
//!   limot [--dark-mode=auto|always|never]
//!
//! L'option remplace `appearance.dark_mode` du fichier de configuration.

use std::env;
use std::error::Error;

use limot::appearance::DarkMode;
use limot::browser::App;
use limot::config::Config;
use winit::event_loop::EventLoop;

fn main() -> Result<(), Box<dyn Error>> {
    // ── 1. Provider crypto TLS ─────────────────────────────────────────
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| "provider crypto rustls déjà installé")?;

    // ── 2. Logging / Tracing ───────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    #[cfg(debug_assertions)]
    tracing::warn!("Build DEBUG : le chargement des pages sera lent, préférez --release");

    // ── 3. Configuration ───────────────────────────────────────────────
    let config = Config::load();
    let dark_mode = match dark_mode_from_args(env::args().skip(1))? {
        Some(mode) => mode,
        None => config.appearance.dark_mode,
    };
    tracing::info!(?dark_mode, "Mode sombre");

    // ── 4. Lecteur de ressources Servo ─────────────────────────────────
    let resources_dir = limot::resources::init()?;

    // ── 5. Boucle d'événements Winit ───────────────────────────────────
    let event_loop = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, config, resources_dir, dark_mode);
    event_loop.run_app(&mut app)?;

    match app.take_fatal_error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Lit `--dark-mode=<mode>` ; les autres arguments sont ignorés.
fn dark_mode_from_args(
    args: impl Iterator<Item = String>,
) -> Result<Option<DarkMode>, Box<dyn Error>> {
    let mut mode = None;
    for arg in args {
        if let Some(value) = arg.strip_prefix("--dark-mode=") {
            mode = Some(value.parse::<DarkMode>()?);
        }
    }
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_no_flag_keeps_config() {
        assert_eq!(dark_mode_from_args(args(&[])).unwrap(), None);
        assert_eq!(dark_mode_from_args(args(&["--verbose"])).unwrap(), None);
    }

    #[test]
    fn test_flag_overrides() {
        let mode = dark_mode_from_args(args(&["--dark-mode=never"])).unwrap();
        assert_eq!(mode, Some(DarkMode::Never));
    }

    #[test]
    fn test_invalid_flag_is_an_error() {
        assert!(dark_mode_from_args(args(&["--dark-mode=sepia"])).is_err());
    }
}
