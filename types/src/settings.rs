//! Resolved settings shared across crates.
//!
//! Raw TOML deserialization structs (with `Option` fields and defaults)
//! stay private here. Loading resolves them into validated types at the
//! parse boundary, so the rest of the system never sees an empty candidate
//! list or a zero timeout.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to parse settings: {0}")]
    Parse(String),
    #[error("engine.candidates must not be empty")]
    NoEngineCandidates,
    #[error("fallback.compilers must not be empty")]
    NoFallbackCompilers,
    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
}

fn default_engine_candidates() -> Vec<String> {
    ["clangd", "clangd-18", "clangd-17", "clangd-16"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_engine_timeout_ms() -> u64 {
    8_000
}

fn default_init_timeout_ms() -> u64 {
    30_000
}

fn default_idle_shutdown_secs() -> u64 {
    300
}

fn default_compilers() -> Vec<String> {
    vec!["clang++".to_string(), "g++".to_string()]
}

fn default_compile_flags() -> Vec<String> {
    vec!["-std=c++11".to_string()]
}

fn default_fallback_timeout_ms() -> u64 {
    15_000
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    engine: RawEngineSettings,
    #[serde(default)]
    fallback: RawFallbackSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawEngineSettings {
    candidates: Vec<String>,
    args: Vec<String>,
    timeout_ms: u64,
    init_timeout_ms: u64,
    idle_shutdown_secs: u64,
}

impl Default for RawEngineSettings {
    fn default() -> Self {
        Self {
            candidates: default_engine_candidates(),
            args: Vec::new(),
            timeout_ms: default_engine_timeout_ms(),
            init_timeout_ms: default_init_timeout_ms(),
            idle_shutdown_secs: default_idle_shutdown_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawFallbackSettings {
    compilers: Vec<String>,
    flags: Vec<String>,
    timeout_ms: u64,
}

impl Default for RawFallbackSettings {
    fn default() -> Self {
        Self {
            compilers: default_compilers(),
            flags: default_compile_flags(),
            timeout_ms: default_fallback_timeout_ms(),
        }
    }
}

/// Validated engine (diagnostics session) settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    candidates: Vec<String>,
    args: Vec<String>,
    timeout: Duration,
    init_timeout: Duration,
    idle_shutdown: Duration,
}

impl EngineSettings {
    /// Engine binary names probed in order.
    #[must_use]
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Extra arguments passed to the engine on spawn.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Deadline for one diagnostics wait.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deadline for the startup handshake.
    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        self.init_timeout
    }

    /// Sessions idle longer than this are shut down on the next registry pass.
    #[must_use]
    pub fn idle_shutdown(&self) -> Duration {
        self.idle_shutdown
    }
}

/// Validated compiler-fallback settings.
#[derive(Debug, Clone)]
pub struct FallbackSettings {
    compilers: Vec<String>,
    flags: Vec<String>,
    timeout: Duration,
}

impl FallbackSettings {
    /// Compiler binary names probed in order.
    #[must_use]
    pub fn compilers(&self) -> &[String] {
        &self.compilers
    }

    /// Compilation flags appended after the syntax-only flag.
    #[must_use]
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    engine: EngineSettings,
    fallback: FallbackSettings,
}

impl Settings {
    /// Parse and validate settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let raw: RawSettings =
            toml::from_str(text).map_err(|e| SettingsError::Parse(e.to_string()))?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawSettings) -> Result<Self, SettingsError> {
        if raw.engine.candidates.is_empty() {
            return Err(SettingsError::NoEngineCandidates);
        }
        if raw.fallback.compilers.is_empty() {
            return Err(SettingsError::NoFallbackCompilers);
        }
        if raw.engine.timeout_ms == 0 {
            return Err(SettingsError::ZeroTimeout {
                field: "engine.timeout_ms",
            });
        }
        if raw.engine.init_timeout_ms == 0 {
            return Err(SettingsError::ZeroTimeout {
                field: "engine.init_timeout_ms",
            });
        }
        if raw.fallback.timeout_ms == 0 {
            return Err(SettingsError::ZeroTimeout {
                field: "fallback.timeout_ms",
            });
        }
        Ok(Self {
            engine: EngineSettings {
                candidates: raw.engine.candidates,
                args: raw.engine.args,
                timeout: Duration::from_millis(raw.engine.timeout_ms),
                init_timeout: Duration::from_millis(raw.engine.init_timeout_ms),
                idle_shutdown: Duration::from_secs(raw.engine.idle_shutdown_secs),
            },
            fallback: FallbackSettings {
                compilers: raw.fallback.compilers,
                flags: raw.fallback.flags,
                timeout: Duration::from_millis(raw.fallback.timeout_ms),
            },
        })
    }

    #[must_use]
    pub fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    #[must_use]
    pub fn fallback(&self) -> &FallbackSettings {
        &self.fallback
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(RawSettings::default()).expect("built-in defaults are valid")
    }
}
