//! Lecteur de ressources Servo et localisation du dossier `resources/`.
//!
//! Servo a besoin de ses fichiers de ressources (préférences, certificats,
//! domaines publics…). L'embedder fournit un `ResourceReaderMethods` et
//! l'enregistre via `servo::resources::set()`. Le même dossier contient la
//! police du shell (`fonts/Inter-Regular.ttf`).
//!
//! Ordre de recherche :
//! 1. Variable d'environnement `SERVO_RESOURCES_PATH`
//! 2. À côté de l'exécutable (`<exe_dir>/resources/`)
//! 3. Racine du projet si l'exécutable est dans `target/{debug,release}/`
//! 4. Répertoire courant (`./resources/`)

use std::path::{Path, PathBuf};
use std::{env, fs};

use servo::resources::{self, Resource};
use tracing::{info, warn};

use crate::error::Error;

/// Localise `resources/` et enregistre le lecteur auprès de Servo.
///
/// **Doit être appelé avant `ServoBuilder::build()`.** Retourne le chemin
/// canonique du dossier.
pub fn init() -> Result<PathBuf, Error> {
    let dir = first_existing_dir(candidate_dirs())
        .and_then(|dir| dir.canonicalize().ok())
        .ok_or(Error::ResourcesNotFound)?;
    info!(path = %dir.display(), "Ressources Servo");
    resources::set(Box::new(ResourceReader { dir: dir.clone() }));
    Ok(dir)
}

/// Chemin de la police utilisée par le shell.
pub fn font_path(resources_dir: &Path) -> PathBuf {
    resources_dir.join("fonts").join("Inter-Regular.ttf")
}

struct ResourceReader {
    dir: PathBuf,
}

impl resources::ResourceReaderMethods for ResourceReader {
    fn read(&self, file: Resource) -> Vec<u8> {
        // Le trait n'a pas de canal d'erreur : une ressource manquante est fatale.
        let path = resolve_within(&self.dir, file.filename()).unwrap_or_else(|| {
            panic!(
                "Ressource Servo {:?} introuvable ou hors de {}",
                file.filename(),
                self.dir.display()
            )
        });
        fs::read(&path).unwrap_or_else(|e| {
            panic!("Impossible de lire la ressource Servo {}: {e}", path.display())
        })
    }

    fn sandbox_access_files_dirs(&self) -> Vec<PathBuf> {
        vec![self.dir.clone()]
    }

    fn sandbox_access_files(&self) -> Vec<PathBuf> {
        vec![]
    }
}

/// Résout `name` sous `base` en refusant tout chemin qui en sort
/// (`..`, liens symboliques).
fn resolve_within(base: &Path, name: &str) -> Option<PathBuf> {
    let base = base.canonicalize().ok()?;
    let candidate = base.join(name).canonicalize().ok()?;
    if candidate.starts_with(&base) {
        Some(candidate)
    } else {
        warn!(name, "Tentative de sortie du dossier resources/ bloquée");
        None
    }
}

fn candidate_dirs() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(path) = env::var("SERVO_RESOURCES_PATH") {
        candidates.push(PathBuf::from(path));
    }

    if let Ok(exe_path) = env::current_exe()
        && let Ok(canonical) = exe_path.canonicalize()
        && let Some(exe_dir) = canonical.parent()
    {
        candidates.push(exe_dir.join("resources"));

        if let Some(target_dir) = exe_dir.parent()
            && target_dir.file_name().is_some_and(|n| n == "target")
            && let Some(project_root) = target_dir.parent()
        {
            candidates.push(project_root.join("resources"));
        }
    }

    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd.join("resources"));
    }

    candidates
}

fn first_existing_dir(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|path| path.is_dir())
}
