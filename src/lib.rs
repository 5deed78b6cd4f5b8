//! # LimoT : dictionnaire allemand-persan
//!
//! Une fenêtre unique qui affiche loghatnameh.de dans Servo, sans barre
//! d'adresse : progression, bandeau d'erreur et quatre boutons
//! (Zurück, Vor, Laden/Stopp, Start).
//!
//! ## Architecture des modules
//!
//! - [`rules`] : règles de blocage statiques et leur compilation en filtre
//!   `adblock` sur un thread de travail (`RuleCompiler`).
//!
//! - [`controller`] : `ContentViewController`, propriétaire de la surface de
//!   rendu, actions de navigation et rattachement du filtre.
//!
//! - [`navigation`] : `NavigationState` publié et `NavigationStateMirror`,
//!   qui recopie les propriétés observables de la surface.
//!
//! - [`shell`] + [`chrome`] : disposition pure du shell et son rendu GL.
//!
//! - [`observe`] : valeurs observables et abonnements libérés au `Drop`.
//!
//! - [`browser`] : boucle Winit « Two-Phase App » et routage des entrées.
//!
//! - [`servo_glue`] : `Waker`, surface Servo et `WebViewDelegate`.
//!
//! - [`appearance`], [`config`], [`preferences`], [`resources`],
//!   [`rendering`], [`keyutils`], [`error`] : thème sombre, configuration
//!   TOML, réglages et démarrage du moteur.

pub mod appearance;
pub mod browser;
pub mod chrome;
pub mod config;
pub mod controller;
pub mod error;
pub mod keyutils;
pub mod navigation;
pub mod observe;
pub mod preferences;
pub mod rendering;
pub mod resources;
pub mod rules;
pub mod servo_glue;
pub mod shell;
