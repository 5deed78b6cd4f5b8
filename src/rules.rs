//! Règles de blocage publicitaire et leur compilation.
//!
//! Les règles sont décrites de façon structurée ([`BlockRule`]) puis
//! traduites en syntaxe Adblock Plus et compilées par le moteur `adblock`
//! de Brave en un [`CompiledFilterSet`] opaque.
//!
//! ## Cycle de vie
//!
//! ```text
//! RuleCompiler::Idle ─request()─▶ Pending ─resolve(Ok)──▶ Ready(Arc<CompiledFilterSet>)
//!                                         └─resolve(Err)─▶ Failed(CompilationError)
//! ```
//!
//! La compilation tourne sur un thread dédié ; son résultat revient sur le
//! thread principal par le callback `deliver` (en pratique un
//! `EventLoopProxy`), où [`RuleCompiler::resolve`] le met en cache. Une
//! seule compilation par processus : ni relance, ni recompilation.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use adblock::Engine;
use adblock::lists::{FilterSet, ParseOptions};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Type de ressource auquel une règle se restreint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Document,
    Subdocument,
    Script,
    Image,
    Stylesheet,
    Font,
    Media,
    Xhr,
}

impl ResourceType {
    /// Nom de l'option Adblock Plus correspondante.
    fn filter_option(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Subdocument => "subdocument",
            Self::Script => "script",
            Self::Image => "image",
            Self::Stylesheet => "stylesheet",
            Self::Font => "font",
            Self::Media => "media",
            Self::Xhr => "xmlhttprequest",
        }
    }
}

/// Seule action supportée.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Block,
}

/// Une règle de blocage : motif d'URL et/ou liste de domaines, éventuellement
/// restreinte à certains types de ressources.
#[derive(Debug, Clone, Copy)]
pub struct BlockRule {
    /// Sous-chaîne (jokers `*` acceptés) cherchée dans l'URL de la requête.
    pub url_pattern: Option<&'static str>,
    /// Domaines dont toutes les requêtes sont bloquées (sous-domaines inclus).
    /// Un préfixe `*` ou `*.` est toléré.
    pub domains: &'static [&'static str],
    /// Vide = tous les types.
    pub resource_types: &'static [ResourceType],
    pub action: RuleAction,
}

impl BlockRule {
    pub const fn domains(domains: &'static [&'static str]) -> Self {
        Self {
            url_pattern: None,
            domains,
            resource_types: &[],
            action: RuleAction::Block,
        }
    }

    pub const fn pattern(pattern: &'static str) -> Self {
        Self {
            url_pattern: Some(pattern),
            domains: &[],
            resource_types: &[],
            action: RuleAction::Block,
        }
    }

    pub const fn only(mut self, resource_types: &'static [ResourceType]) -> Self {
        self.resource_types = resource_types;
        self
    }

    /// Traduit la règle en lignes de filtre Adblock Plus.
    fn filter_lines(&self, index: usize) -> Result<Vec<String>, CompilationError> {
        let invalid = |reason: String| CompilationError::InvalidRule { index, reason };

        if self.url_pattern.is_none() && self.domains.is_empty() {
            return Err(invalid("ni motif ni domaine".into()));
        }

        let options = if self.resource_types.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = self
                .resource_types
                .iter()
                .map(|t| t.filter_option())
                .collect();
            format!("${}", names.join(","))
        };

        let mut lines = Vec::with_capacity(self.domains.len() + 1);
        for raw in self.domains {
            let domain = raw.trim_start_matches('*').trim_start_matches('.');
            if domain.is_empty()
                || domain
                    .chars()
                    .any(|c| c.is_whitespace() || matches!(c, '/' | '^' | '$' | '*'))
            {
                return Err(invalid(format!("domaine invalide « {raw} »")));
            }
            lines.push(format!("||{domain}^{options}"));
        }

        if let Some(pattern) = self.url_pattern {
            if pattern.is_empty() || pattern.chars().any(|c| c.is_whitespace() || c == '$') {
                return Err(invalid(format!("motif invalide « {pattern} »")));
            }
            lines.push(format!("{pattern}{options}"));
        }

        Ok(lines)
    }
}

/// Règles intégrées : régies publicitaires et traceurs Google.
pub static BUILTIN_RULES: &[BlockRule] = &[
    BlockRule::domains(&[
        "*googlesyndication.com",
        "*doubleclick.net",
        "*googleadservices.com",
        "*google-analytics.com",
        "*googletagmanager.com",
        "*googletagservices.com",
    ]),
    BlockRule::pattern("pagead"),
    BlockRule::pattern("adservice"),
    BlockRule::pattern("adsense"),
    BlockRule::pattern("adsbygoogle"),
];

/// Échec de compilation des règles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    #[error("aucune règle à compiler")]
    Empty,

    #[error("règle n°{index} invalide : {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("thread de compilation indisponible : {0}")]
    Worker(String),
}

pub type CompileResult = Result<CompiledFilterSet, CompilationError>;

/// Jeu de filtres compilé, immuable, partagé en lecture seule (`Arc`).
pub struct CompiledFilterSet {
    engine: Engine,
    filter_count: usize,
}

impl std::fmt::Debug for CompiledFilterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilterSet")
            .field("filter_count", &self.filter_count)
            .finish_non_exhaustive()
    }
}

impl CompiledFilterSet {
    /// Nombre de filtres Adblock Plus générés.
    pub fn filter_count(&self) -> usize {
        self.filter_count
    }

    /// Vérifie si une requête doit être bloquée.
    ///
    /// - `url` : URL de la ressource demandée
    /// - `source_url` : URL de la page qui a initié la requête
    /// - `request_type` : voir [`request_type_for`]
    pub fn should_block(&self, url: &str, source_url: &str, request_type: &str) -> bool {
        let request = match adblock::request::Request::new(url, source_url, request_type)
            .or_else(|_| adblock::request::Request::new(url, "", request_type))
        {
            Ok(request) => request,
            // data:, blob:… : jamais bloqué.
            Err(_) => return false,
        };
        self.engine.check_network_request(&request).matched
    }
}

/// Compile les règles. Appel bloquant : à exécuter hors du thread principal.
pub fn compile(rules: &[BlockRule]) -> CompileResult {
    if rules.is_empty() {
        return Err(CompilationError::Empty);
    }

    let mut filter_set = FilterSet::new(false);
    let mut filter_count = 0;

    for (index, rule) in rules.iter().enumerate() {
        for line in rule.filter_lines(index)? {
            filter_set
                .add_filter(&line, ParseOptions::default())
                .map_err(|e| CompilationError::InvalidRule {
                    index,
                    reason: format!("« {line} » refusé par le parseur : {e:?}"),
                })?;
            filter_count += 1;
        }
    }

    let engine = Engine::from_filter_set(filter_set, true);
    Ok(CompiledFilterSet {
        engine,
        filter_count,
    })
}

/// Déduit le type de requête `adblock` depuis l'URL.
///
/// Servo ne fournit que `is_for_main_frame` ; pour les sous-ressources on
/// se rabat sur l'extension du chemin.
pub fn request_type_for(url: &Url, is_main_frame: bool) -> &'static str {
    if is_main_frame {
        return "document";
    }
    let extension = url
        .path()
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("js" | "mjs") => "script",
        Some("css") => "stylesheet",
        Some("png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" | "avif") => "image",
        Some("woff" | "woff2" | "ttf" | "otf") => "font",
        Some("mp3" | "mp4" | "webm" | "ogg") => "media",
        _ => "other",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RuleCompiler : cache à portée processus
// ─────────────────────────────────────────────────────────────────────────────

/// État de la compilation.
#[derive(Debug)]
pub enum FilterStatus {
    Idle,
    Pending,
    Ready(Arc<CompiledFilterSet>),
    Failed(CompilationError),
}

/// Compile les règles au plus une fois et garde le résultat.
///
/// Possédé par `App` et non par l'écran : une compilation en cours survit
/// à la destruction de la fenêtre.
pub struct RuleCompiler {
    status: FilterStatus,
    failure_notice: Option<String>,
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self {
            status: FilterStatus::Idle,
            failure_notice: None,
        }
    }

    /// Lance la compilation sur un thread dédié si elle n'a jamais été lancée.
    ///
    /// `deliver` est appelé depuis le thread de travail ; il doit renvoyer le
    /// résultat vers le thread principal, qui appellera [`Self::resolve`].
    /// Retourne `false` si une compilation est déjà en cours ou terminée.
    pub fn request<F>(&mut self, rules: &'static [BlockRule], deliver: F) -> bool
    where
        F: FnOnce(CompileResult) + Send + 'static,
    {
        if !matches!(self.status, FilterStatus::Idle) {
            debug!(status = ?self.status, "Compilation des règles déjà demandée");
            return false;
        }
        self.status = FilterStatus::Pending;

        let spawned = thread::Builder::new()
            .name("filter-compiler".into())
            .spawn(move || {
                let started = Instant::now();
                let result = compile(rules);
                debug!(elapsed = ?started.elapsed(), ok = result.is_ok(), "Règles compilées");
                deliver(result);
            });

        if let Err(e) = spawned {
            self.resolve(Err(CompilationError::Worker(e.to_string())));
        }
        true
    }

    /// Met en cache le résultat livré par le thread de travail.
    ///
    /// Retourne le filtre s'il est disponible. Un résultat reçu hors de
    /// l'état `Pending` est ignoré.
    pub fn resolve(&mut self, result: CompileResult) -> Option<Arc<CompiledFilterSet>> {
        if !matches!(self.status, FilterStatus::Pending) {
            warn!(status = ?self.status, "Résultat de compilation inattendu, ignoré");
            return self.filter();
        }

        match result {
            Ok(set) => {
                info!(filters = set.filter_count(), "Bloqueur de publicités prêt");
                self.status = FilterStatus::Ready(Arc::new(set));
            }
            Err(e) => {
                warn!(error = %e, "Échec de compilation des règles de blocage");
                self.failure_notice = Some(format!("Werbeblocker-Fehler: {e}"));
                self.status = FilterStatus::Failed(e);
            }
        }
        self.filter()
    }

    pub fn filter(&self) -> Option<Arc<CompiledFilterSet>> {
        match &self.status {
            FilterStatus::Ready(set) => Some(set.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, FilterStatus::Pending)
    }

    pub fn status(&self) -> &FilterStatus {
        &self.status
    }

    /// Message d'échec à afficher, rendu une seule fois.
    pub fn take_failure_notice(&mut self) -> Option<String> {
        self.failure_notice.take()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    const PAGE: &str = "https://loghatnameh.de/";

    fn builtin() -> CompiledFilterSet {
        compile(BUILTIN_RULES).expect("built-in rules must compile")
    }

    #[test]
    fn test_builtin_rules_compile() {
        let set = builtin();
        // 6 domaines + 4 motifs
        assert_eq!(set.filter_count(), 10);
    }

    #[test]
    fn test_blocks_ad_domains() {
        let set = builtin();
        assert!(set.should_block(
            "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js",
            PAGE,
            "script"
        ));
        assert!(set.should_block(
            "https://www.google-analytics.com/analytics.js",
            PAGE,
            "script"
        ));
        assert!(set.should_block("https://ad.doubleclick.net/pixel.gif", PAGE, "image"));
    }

    #[test]
    fn test_ad_patterns_block_every_request_type() {
        let set = builtin();
        for url in [
            "https://cdn.example.net/pagead/conversion/123",
            "https://cdn.example.net/adsense/loader",
            "https://adservice.example.org/ddm/fls",
            "https://cdn.example.net/adsbygoogle",
        ] {
            let request_type = request_type_for(&Url::parse(url).unwrap(), false);
            assert_eq!(request_type, "other");
            assert!(set.should_block(url, PAGE, request_type), "{url}");
            assert!(set.should_block(url, PAGE, "subdocument"), "{url}");
        }
    }

    #[test]
    fn test_allows_dictionary_content() {
        let set = builtin();
        assert!(!set.should_block("https://loghatnameh.de/style.css", PAGE, "stylesheet"));
        assert!(!set.should_block(
            "https://loghatnameh.de/suche?q=Haus",
            PAGE,
            "xmlhttprequest"
        ));
    }

    #[test]
    fn test_unparseable_url_is_allowed() {
        let set = builtin();
        assert!(!set.should_block("data:image/png;base64,AAAA", PAGE, "image"));
    }

    #[test]
    fn test_empty_rule_set_fails() {
        assert_eq!(compile(&[]).unwrap_err(), CompilationError::Empty);
    }

    #[test]
    fn test_rule_without_trigger_fails() {
        static RULES: &[BlockRule] = &[BlockRule::domains(&[])];
        assert!(matches!(
            compile(RULES).unwrap_err(),
            CompilationError::InvalidRule { index: 0, .. }
        ));
    }

    #[test]
    fn test_invalid_domain_and_pattern_fail() {
        static DOMAIN: &[BlockRule] = &[
            BlockRule::pattern("pagead"),
            BlockRule::domains(&["bad domain.com"]),
        ];
        assert!(matches!(
            compile(DOMAIN).unwrap_err(),
            CompilationError::InvalidRule { index: 1, .. }
        ));

        static PATTERN: &[BlockRule] = &[BlockRule::pattern("ads$script")];
        assert!(matches!(
            compile(PATTERN).unwrap_err(),
            CompilationError::InvalidRule { index: 0, .. }
        ));
    }

    #[test]
    fn test_filter_lines_translation() {
        let rule = BlockRule::domains(&["*.example.com"]).only(&[ResourceType::Script, ResourceType::Xhr]);
        assert_eq!(
            rule.filter_lines(0).unwrap(),
            vec!["||example.com^$script,xmlhttprequest".to_string()]
        );
        assert_eq!(
            BlockRule::pattern("pagead").filter_lines(0).unwrap(),
            vec!["pagead".to_string()]
        );
    }

    #[test]
    fn test_request_type_inference() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert_eq!(request_type_for(&url("https://a.de/x.js"), false), "script");
        assert_eq!(request_type_for(&url("https://a.de/x.JS?v=1"), false), "script");
        assert_eq!(request_type_for(&url("https://a.de/img/a.png"), false), "image");
        assert_eq!(request_type_for(&url("https://a.de/a.css"), false), "stylesheet");
        assert_eq!(request_type_for(&url("https://a.de/api/q"), false), "other");
        assert_eq!(request_type_for(&url("https://a.de/x.js"), true), "document");
    }

    #[test]
    fn test_compilation_requested_at_most_once() {
        let mut compiler = RuleCompiler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let mut started = 0;
        for _ in 0..5 {
            let runs = runs.clone();
            let tx = tx.clone();
            if compiler.request(BUILTIN_RULES, move |result| {
                runs.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(result);
            }) {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert!(compiler.is_pending());
        assert!(compiler.filter().is_none());

        let result = rx.recv_timeout(Duration::from_secs(30)).unwrap();
        assert!(compiler.resolve(result).is_some());
        assert!(!compiler.request(BUILTIN_RULES, |_| {}));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(compiler.filter().is_some());
    }

    #[test]
    fn test_failure_is_cached_and_reported_once() {
        static BAD: &[BlockRule] = &[BlockRule::pattern("with space")];
        let mut compiler = RuleCompiler::new();
        let (tx, rx) = mpsc::channel();
        assert!(compiler.request(BAD, move |result| {
            let _ = tx.send(result);
        }));

        let result = rx.recv_timeout(Duration::from_secs(30)).unwrap();
        assert!(compiler.resolve(result).is_none());
        assert!(matches!(compiler.status(), FilterStatus::Failed(_)));

        let notice = compiler.take_failure_notice().unwrap();
        assert!(notice.starts_with("Werbeblocker-Fehler: "));
        assert!(compiler.take_failure_notice().is_none());

        // Pas de relance.
        assert!(!compiler.request(BUILTIN_RULES, |_| {}));
        assert!(compiler.filter().is_none());
    }

    #[test]
    fn test_resolve_without_request_is_ignored() {
        let mut compiler = RuleCompiler::new();
        assert!(compiler.resolve(compile(BUILTIN_RULES)).is_none());
        assert!(matches!(compiler.status(), FilterStatus::Idle));
    }
}
