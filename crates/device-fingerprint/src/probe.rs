//! Environment characteristic collection.

use crate::FingerprintResult;
use serde::{Deserialize, Serialize};

/// The collected environment characteristics a fingerprint is built
/// from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Client agent string.
    pub agent: String,
    /// Preferred language/locale.
    pub language: String,
    /// Host platform identifier.
    pub platform: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub color_depth: u32,
    pub pixel_ratio: f64,
    /// Timezone name or UTC offset.
    pub timezone: String,
    pub touch_support: bool,
    pub webgl_support: bool,
    pub local_storage: bool,
    pub session_storage: bool,
    pub hardware_concurrency: u32,
}

impl EnvironmentSnapshot {
    /// Canonical pipe-joined serialization of every component.
    ///
    /// This exact string is what gets hashed, so the field order here is
    /// part of the fingerprint format.
    pub fn canonical_components(&self) -> String {
        format!(
            "{}|{}|{}|{}x{}x{}|{}|{}|{}|{}|{}|{}|{}",
            self.agent,
            self.language,
            self.platform,
            self.screen_width,
            self.screen_height,
            self.color_depth,
            self.pixel_ratio,
            self.timezone,
            self.touch_support,
            self.webgl_support,
            self.local_storage,
            self.session_storage,
            self.hardware_concurrency,
        )
    }
}

impl Default for EnvironmentSnapshot {
    /// A representative desktop profile. Tests start from this and
    /// change the fields under test.
    fn default() -> Self {
        Self {
            agent: "Driftline/0.3 (linux; x86_64)".to_string(),
            language: "en-US".to_string(),
            platform: "linux".to_string(),
            screen_width: 1920,
            screen_height: 1080,
            color_depth: 24,
            pixel_ratio: 1.0,
            timezone: "UTC".to_string(),
            touch_support: false,
            webgl_support: true,
            local_storage: true,
            session_storage: true,
            hardware_concurrency: 8,
        }
    }
}

/// Source of environment snapshots.
pub trait EnvironmentProbe: Send + Sync {
    fn probe(&self) -> FingerprintResult<EnvironmentSnapshot>;
}

/// Probes what the host process can observe directly.
///
/// Display geometry and webview capabilities are not visible from here;
/// embedders that know them should pass a full snapshot through
/// [`FixedProbe`] instead. Individual lookups that fail degrade to a
/// default value rather than failing the snapshot.
#[derive(Debug, Clone, Default)]
pub struct HostProbe;

impl HostProbe {
    pub fn new() -> Self {
        Self
    }

    fn language() -> String {
        std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LANG"))
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|lang| !lang.is_empty())
            .unwrap_or_else(|| "en-US".to_string())
    }

    fn timezone() -> String {
        std::env::var("TZ")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| chrono::Local::now().offset().to_string())
    }

    fn hardware_concurrency() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    }
}

impl EnvironmentProbe for HostProbe {
    fn probe(&self) -> FingerprintResult<EnvironmentSnapshot> {
        Ok(EnvironmentSnapshot {
            agent: format!(
                "Driftline/{} ({}; {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH,
            ),
            language: Self::language(),
            platform: std::env::consts::OS.to_string(),
            screen_width: 0,
            screen_height: 0,
            color_depth: 0,
            pixel_ratio: 1.0,
            timezone: Self::timezone(),
            touch_support: false,
            webgl_support: false,
            local_storage: true,
            session_storage: true,
            hardware_concurrency: Self::hardware_concurrency(),
        })
    }
}

/// Probe returning a configured snapshot. Test double, also the entry
/// point for embedders that collect the real characteristics
/// themselves.
#[derive(Debug, Clone)]
pub struct FixedProbe {
    snapshot: EnvironmentSnapshot,
}

impl FixedProbe {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self { snapshot }
    }
}

impl EnvironmentProbe for FixedProbe {
    fn probe(&self) -> FingerprintResult<EnvironmentSnapshot> {
        Ok(self.snapshot.clone())
    }
}
