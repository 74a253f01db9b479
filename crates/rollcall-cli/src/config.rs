use rollcall_client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use rollcall_core::{LiveSettings, RegistrationSettings};
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Base URL of the recognition service (default: http://localhost:5000).
    pub api_url: String,
    /// Per-request HTTP timeout in seconds.
    pub http_timeout_secs: u64,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Class section used when a command does not name one.
    pub class_section: String,
    /// Progress tick interval of the live loop, in milliseconds.
    pub scan_tick_ms: u64,
    /// Progress added per tick.
    pub scan_step: u8,
    /// Delay before the camera stops after a successful registration.
    pub success_delay_ms: u64,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("ROLLCALL_API_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            http_timeout_secs: env_u64("ROLLCALL_HTTP_TIMEOUT_SECS", DEFAULT_TIMEOUT.as_secs()),
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            class_section: std::env::var("ROLLCALL_CLASS_SECTION")
                .unwrap_or_else(|_| "Default".to_string()),
            scan_tick_ms: env_u64("ROLLCALL_SCAN_TICK_MS", 30),
            scan_step: env_u8("ROLLCALL_SCAN_STEP", 2).clamp(1, 100),
            success_delay_ms: env_u64("ROLLCALL_SUCCESS_DELAY_MS", 2000),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn live_settings(&self, class_section: Option<String>) -> LiveSettings {
        LiveSettings {
            class_section: class_section.unwrap_or_else(|| self.class_section.clone()),
            tick: Duration::from_millis(self.scan_tick_ms.max(1)),
            step: self.scan_step,
            ..LiveSettings::default()
        }
    }

    pub fn registration_settings(&self) -> RegistrationSettings {
        RegistrationSettings {
            success_delay: Duration::from_millis(self.success_delay_ms),
            ..RegistrationSettings::default()
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u8(key: &str, default: u8) -> u8 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_helpers_fall_back() {
        std::env::set_var("ROLLCALL_TEST_GOOD_U64", "45");
        std::env::set_var("ROLLCALL_TEST_BAD_U8", "999");
        assert_eq!(env_u64("ROLLCALL_TEST_GOOD_U64", 1), 45);
        assert_eq!(env_u64("ROLLCALL_TEST_UNSET_U64", 7), 7);
        assert_eq!(env_u8("ROLLCALL_TEST_BAD_U8", 2), 2);
    }

    #[test]
    fn test_live_settings_override_class_section() {
        let config = Config {
            api_url: DEFAULT_BASE_URL.to_string(),
            http_timeout_secs: 0,
            camera_device: "/dev/video0".into(),
            class_section: "Default".into(),
            scan_tick_ms: 50,
            scan_step: 5,
            success_delay_ms: 0,
        };
        let live = config.live_settings(Some("CS-101".into()));
        assert_eq!(live.class_section, "CS-101");
        assert_eq!(live.tick, Duration::from_millis(50));
        assert_eq!(live.step, 5);
        assert_eq!(config.live_settings(None).class_section, "Default");
        assert_eq!(config.http_timeout(), Duration::from_secs(1));
        assert!(config.registration_settings().success_delay.is_zero());
    }
}
