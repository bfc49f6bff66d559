//! Bridge configuration
//!
//! Controls conversion limits and the choices the host/guest mapping leaves
//! open: where sequences start, how strictly integers are widened, and how
//! guest numbers come back.
//!
//! Configuration is built in code with the builder methods, or loaded from
//! TOML:
//!
//! ```toml
//! max_depth = 64
//! sequence_base = "zero"
//! integers = "exact"
//! numbers = "float"
//! arena_limit = 1048576
//! max_nodes = 65536
//! cycle_guard = true
//! ```
//!
//! Missing keys take their defaults; unknown keys are rejected.

use serde::Deserialize;
use std::path::Path;

/// Default maximum nesting depth for one conversion
pub const DEFAULT_MAX_DEPTH: usize = 200;

/// Default node budget for one conversion
pub const DEFAULT_MAX_NODES: usize = 1 << 20;

/// First guest index used when pushing a host sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceBase {
    /// `[a, b]` becomes `{[1]=a, [2]=b}` (guest convention)
    #[default]
    One,
    /// `[a, b]` becomes `{[0]=a, [1]=b}`
    Zero,
}

impl SequenceBase {
    pub fn first_index(self) -> i64 {
        match self {
            SequenceBase::One => 1,
            SequenceBase::Zero => 0,
        }
    }
}

/// How host integers are turned into guest numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegerPolicy {
    /// Widen to a double; magnitudes above 2^53 round to the nearest double
    #[default]
    Widen,
    /// Fail with `InexactInteger` unless the double holds the exact value
    Exact,
}

/// How guest numbers come back to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NumberMode {
    /// Integral numbers with magnitude at most 2^53 become `Int`
    #[default]
    IntegralAsInt,
    /// Every number becomes `Float`
    Float,
}

/// Error loading or validating a configuration
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Configuration for one bridge
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Maximum nesting depth of a single conversion
    pub max_depth: usize,

    pub sequence_base: SequenceBase,

    pub integers: IntegerPolicy,

    pub numbers: NumberMode,

    /// Byte budget for the intermediate representation built while
    /// extracting one value (`None` = unlimited)
    pub arena_limit: Option<usize>,

    /// Node budget for one conversion: ITR nodes when extracting, tables
    /// plus entries when pushing. Tables reachable by several paths are
    /// converted once per path, so shared subtables count every time.
    pub max_nodes: usize,

    /// Detect values that contain themselves and fail with
    /// `CyclicStructure` instead of running into the depth limit
    pub cycle_guard: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            max_depth: DEFAULT_MAX_DEPTH,
            sequence_base: SequenceBase::default(),
            integers: IntegerPolicy::default(),
            numbers: NumberMode::default(),
            arena_limit: None,
            max_nodes: DEFAULT_MAX_NODES,
            cycle_guard: true,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        BridgeConfig::default()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.arena_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "arena_limit must be positive when set".to_string(),
            ));
        }
        if self.max_nodes == 0 {
            return Err(ConfigError::Invalid(
                "max_nodes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the maximum nesting depth (builder pattern)
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_sequence_base(mut self, base: SequenceBase) -> Self {
        self.sequence_base = base;
        self
    }

    pub fn with_integer_policy(mut self, policy: IntegerPolicy) -> Self {
        self.integers = policy;
        self
    }

    pub fn with_number_mode(mut self, mode: NumberMode) -> Self {
        self.numbers = mode;
        self
    }

    /// Cap the bytes one extraction may allocate for its intermediate representation
    pub fn with_arena_limit(mut self, limit: usize) -> Self {
        self.arena_limit = Some(limit);
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_cycle_guard(mut self, enabled: bool) -> Self {
        self.cycle_guard = enabled;
        self
    }
}
