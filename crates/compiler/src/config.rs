//! Compiler configuration.
//!
//! The backend has exactly two knobs: the target word size, which decides
//! how the `uint`/`int`/`float` aliases and struct tags resolve, and the
//! tick interval the generated main loop sleeps between cycles. Both can be
//! set programmatically with the builder methods or loaded from TOML.

use serde::Deserialize;

/// Target word size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum WordSize {
    #[serde(rename = "4")]
    FourBytes,
    #[serde(rename = "8")]
    EightBytes,
}

impl WordSize {
    pub fn bytes(self) -> usize {
        match self {
            WordSize::FourBytes => 4,
            WordSize::EightBytes => 8,
        }
    }
}

impl Default for WordSize {
    fn default() -> Self {
        WordSize::EightBytes
    }
}

/// Configuration for a compilation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Word size of the compilation target.
    pub word_size: WordSize,
    /// Milliseconds the generated main loop sleeps per tick.
    pub tick_ms: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            word_size: WordSize::default(),
            tick_ms: 10,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_word_size(mut self, word_size: WordSize) -> Self {
        self.word_size = word_size;
        self
    }

    pub fn with_tick_ms(mut self, tick_ms: u32) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    /// Load a configuration from TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self, String> {
        toml::from_str(s).map_err(|e| format!("Failed to parse compiler config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert_eq!(config.word_size, WordSize::EightBytes);
        assert_eq!(config.tick_ms, 10);
    }

    #[test]
    fn test_builder() {
        let config = CompilerConfig::new()
            .with_word_size(WordSize::FourBytes)
            .with_tick_ms(1);
        assert_eq!(config.word_size.bytes(), 4);
        assert_eq!(config.tick_ms, 1);
    }

    #[test]
    fn test_from_toml() {
        let config = CompilerConfig::from_toml_str("word_size = \"4\"\ntick_ms = 20\n").unwrap();
        assert_eq!(config.word_size, WordSize::FourBytes);
        assert_eq!(config.tick_ms, 20);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CompilerConfig::from_toml_str("tick_ms = 5\n").unwrap();
        assert_eq!(config.word_size, WordSize::EightBytes);
        assert_eq!(config.tick_ms, 5);
    }
}
