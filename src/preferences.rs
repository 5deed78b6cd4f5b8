//! Préférences du moteur Servo.
//!
//! Un dictionnaire en ligne n'a besoin ni de géolocalisation, ni de
//! Bluetooth, ni de notifications, ni de WebRTC : tout est désactivé.
//! Les pools de threads sont dimensionnés sur le nombre de CPU, bornés.

use tracing::info;

use crate::config::ServoConfig;

/// UA mobile : la fenêtre est étroite, le site sert sa mise en page mobile.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

#[allow(clippy::field_reassign_with_default)]
pub fn build_servo_preferences(config: &ServoConfig) -> servo::Preferences {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as i64)
        .unwrap_or(4);

    let mut prefs = servo::Preferences::default();

    // ── Threads et cache ──────────────────────────────────────────────────
    prefs.layout_threads = if config.layout_threads > 0 {
        config.layout_threads
    } else {
        cpus.min(4)
    };
    prefs.threadpools_async_runtime_workers_max = (cpus * 2).min(8);
    prefs.threadpools_image_cache_workers_max = cpus.min(4);
    prefs.threadpools_webrender_workers_max = (cpus / 2).clamp(2, 4);
    prefs.threadpools_resource_workers_max = cpus.min(4);
    prefs.network_http_cache_size = config.cache_size;

    prefs.user_agent = if config.user_agent.is_empty() {
        DEFAULT_USER_AGENT.to_string()
    } else {
        config.user_agent.clone()
    };

    // ── Réseau ────────────────────────────────────────────────────────────
    prefs.network_enforce_tls_enabled = true;
    prefs.network_mime_sniff = false;

    // ── APIs inutiles pour un dictionnaire ────────────────────────────────
    prefs.dom_geolocation_enabled = false;
    prefs.dom_bluetooth_enabled = false;
    prefs.dom_notification_enabled = false;
    prefs.dom_webrtc_enabled = false;

    info!(
        cpus,
        layout_threads = prefs.layout_threads,
        cache_size = prefs.network_http_cache_size,
        "Préférences Servo configurées"
    );

    prefs
}
