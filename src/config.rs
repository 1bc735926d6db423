use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants::{phase, sessions, tick};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Maximum concurrent sessions in the match
    pub max_sessions: usize,
    /// Sessions needed to start, and below which a started match ends
    pub min_sessions: usize,
    /// Port for the Prometheus/JSON metrics endpoint (0 = disabled)
    pub metrics_port: u16,
    /// Generate an in-memory self-signed certificate instead of loading PEM files
    pub tls_self_signed: bool,
    /// Path to TLS certificate file (if not using self-signed)
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file (if not using self-signed)
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            max_sessions: sessions::MAX_SESSIONS,
            min_sessions: sessions::MIN_SESSIONS,
            metrics_port: 9090,
            tls_self_signed: false,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        env_override("PORT", &mut config.port, |p| *p > 0, "must be > 0");
        env_override("MAX_SESSIONS", &mut config.max_sessions, |n| (1..=64).contains(n), "must be 1-64");
        env_override("MIN_SESSIONS", &mut config.min_sessions, |n| *n <= 64, "must be 0-64");
        env_override("METRICS_PORT", &mut config.metrics_port, |_| true, "");

        if let Ok(flag) = std::env::var("TLS_SELF_SIGNED") {
            config.tls_self_signed = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(cert_path) = std::env::var("TLS_CERT_PATH") {
            config.tls_cert_path = Some(cert_path);
        }
        if let Ok(key_path) = std::env::var("TLS_KEY_PATH") {
            config.tls_key_path = Some(key_path);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be at least 1".to_string());
        }
        if self.min_sessions > self.max_sessions {
            return Err("min_sessions cannot exceed max_sessions".to_string());
        }
        if self.metrics_port != 0 && self.metrics_port == self.port {
            return Err("metrics_port must differ from port".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }
}

/// Match timing and gameplay tuning
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Server ticks per second
    pub tick_rate: u32,
    pub first_prompt_secs: f32,
    pub second_prompt_secs: f32,
    /// How far prompt timers may overrun before the phase flips
    pub timer_grace_secs: f32,
    pub countdown_secs: f32,
    pub gameplay_secs: f32,
    /// Upper bound on waiting for the map generator before the fallback map
    pub map_generation_timeout_secs: u64,
    /// Extra clearance added around placed boats and structures
    pub placement_margin: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tick_rate: tick::TICK_RATE,
            first_prompt_secs: phase::FIRST_PROMPT_SECS,
            second_prompt_secs: phase::SECOND_PROMPT_SECS,
            timer_grace_secs: phase::TIMER_GRACE_SECS,
            countdown_secs: phase::COUNTDOWN_SECS,
            gameplay_secs: phase::GAMEPLAY_SECS,
            map_generation_timeout_secs: phase::MAP_GENERATION_TIMEOUT_SECS,
            placement_margin: 0.0,
        }
    }
}

impl MatchConfig {
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        env_override("TICK_RATE", &mut config.tick_rate, |r| (1..=240).contains(r), "must be 1-240");
        env_override("FIRST_PROMPT_SECS", &mut config.first_prompt_secs, positive, "must be > 0");
        env_override("SECOND_PROMPT_SECS", &mut config.second_prompt_secs, positive, "must be > 0");
        env_override("TIMER_GRACE_SECS", &mut config.timer_grace_secs, non_negative, "must be >= 0");
        env_override("COUNTDOWN_SECS", &mut config.countdown_secs, non_negative, "must be >= 0");
        env_override("GAMEPLAY_SECS", &mut config.gameplay_secs, positive, "must be > 0");
        env_override(
            "MAP_GENERATION_TIMEOUT_SECS",
            &mut config.map_generation_timeout_secs,
            |s| *s > 0,
            "must be > 0",
        );
        env_override("PLACEMENT_MARGIN", &mut config.placement_margin, non_negative, "must be >= 0");

        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if !positive(&self.first_prompt_secs) || !positive(&self.second_prompt_secs) {
            return Err("prompt durations must be positive".to_string());
        }
        if !positive(&self.gameplay_secs) {
            return Err("gameplay_secs must be positive".to_string());
        }
        if !non_negative(&self.timer_grace_secs) || !non_negative(&self.countdown_secs) {
            return Err("grace and countdown cannot be negative".to_string());
        }
        if !non_negative(&self.placement_margin) {
            return Err("placement_margin cannot be negative".to_string());
        }
        Ok(())
    }

    /// Fixed timestep in seconds
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate.max(1) as u64)
    }

    pub fn map_generation_timeout(&self) -> Duration {
        Duration::from_secs(self.map_generation_timeout_secs)
    }
}

fn positive(v: &f32) -> bool {
    v.is_finite() && *v > 0.0
}

fn non_negative(v: &f32) -> bool {
    v.is_finite() && *v >= 0.0
}

/// Overwrite `target` from `key` if set, parseable and accepted by `valid`
fn env_override<T: FromStr>(key: &str, target: &mut T, valid: impl Fn(&T) -> bool, hint: &str) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(parsed) if valid(&parsed) => *target = parsed,
        Ok(_) => tracing::warn!("{} {}, using default", key, hint),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", key, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4433);
        assert_eq!(config.max_sessions, 8);
        assert_eq!(config.min_sessions, 1);
        assert!(!config.tls_self_signed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.port > 0);
        let match_config = MatchConfig::load_or_default();
        assert!(match_config.tick_rate > 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.min_sessions = 10;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.tls_cert_path = Some("cert.pem".into());
        assert!(config.validate().is_err());

        let mut match_config = MatchConfig::default();
        match_config.gameplay_secs = 0.0;
        assert!(match_config.validate().is_err());

        let mut match_config = MatchConfig::default();
        match_config.timer_grace_secs = f32::NAN;
        assert!(match_config.validate().is_err());
    }

    #[test]
    fn test_match_config_timing() {
        let config = MatchConfig::default();
        assert!((config.dt() - tick::DT).abs() < 1e-6);
        assert_eq!(config.tick_interval(), Duration::from_millis(tick::TICK_DURATION_MS));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("SISYPHI_TEST_OVERRIDE_OK", "42");
        std::env::set_var("SISYPHI_TEST_OVERRIDE_BAD", "abc");
        std::env::set_var("SISYPHI_TEST_OVERRIDE_RANGE", "0");

        let mut value: u32 = 7;
        env_override("SISYPHI_TEST_OVERRIDE_OK", &mut value, |_| true, "");
        assert_eq!(value, 42);
        env_override("SISYPHI_TEST_OVERRIDE_BAD", &mut value, |_| true, "");
        assert_eq!(value, 42);
        env_override("SISYPHI_TEST_OVERRIDE_RANGE", &mut value, |v| *v > 0, "must be > 0");
        assert_eq!(value, 42);
        env_override("SISYPHI_TEST_OVERRIDE_MISSING", &mut value, |_| true, "");
        assert_eq!(value, 42);
    }
}
