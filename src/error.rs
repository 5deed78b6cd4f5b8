//! Erreurs fatales au démarrage.
//!
//! Les erreurs de navigation et de compilation des règles ne sont jamais
//! fatales : elles finissent en message dans le bandeau (voir
//! [`crate::navigation::LoadError`] et [`crate::rules::CompilationError`]).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("dossier 'resources/' introuvable ; définissez SERVO_RESOURCES_PATH")]
    ResourcesNotFound,

    #[error("impossible de lire la police {path}: {source}")]
    FontRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("police invalide : {0}")]
    FontParse(String),

    #[error("contexte de rendu indisponible : {0}")]
    RenderingContext(String),

    #[error("ressource GL indisponible : {0}")]
    Gl(String),

    #[error("fenêtre : {0}")]
    Window(String),
}
