// Options controlling how quantized tensors are unpacked and registered.

use serde::{Deserialize, Serialize};

/// Which 16 bytes of a Q4_1 block feed the nibble unpacker.
///
/// A Q4_1 block is `|d: f16|m: f16|qs: [u8; 16]|`. Existing converted
/// artifacts were produced by a routine that always skipped exactly two
/// header bytes, so it read `block[2..18]`: the bias bytes become the first
/// two code bytes and the final two code bytes are dropped. `Legacy` keeps
/// bit compatibility with those artifacts; `Documented` reads `block[4..20]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Q4_1CodeOffset {
    #[default]
    Legacy,
    Documented,
}

impl Q4_1CodeOffset {
    /// Offset of the first code byte within a block.
    pub const fn code_start(self) -> usize {
        match self {
            Self::Legacy => 2,
            Self::Documented => 4,
        }
    }
}

/// How the three outputs of one tensor are committed to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// Insert weights, scales, biases in order. A collision on a later key
    /// leaves the earlier entries in the map.
    #[default]
    Sequential,
    /// Check all three keys first and insert nothing if any is taken.
    Staged,
}

/// Configuration for [`load_quantized_with`](super::tensor::load_quantized_with).
///
/// Every field has a default, so a host loader can embed this in its own
/// config file and only spell out what it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpackConfig {
    pub q4_1_code_offset: Q4_1CodeOffset,
    pub insert_mode: InsertMode,
}

impl UnpackConfig {
    pub fn with_q4_1_code_offset(mut self, offset: Q4_1CodeOffset) -> Self {
        self.q4_1_code_offset = offset;
        self
    }

    pub fn with_insert_mode(mut self, mode: InsertMode) -> Self {
        self.insert_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UnpackConfig::default();
        assert_eq!(config.q4_1_code_offset, Q4_1CodeOffset::Legacy);
        assert_eq!(config.insert_mode, InsertMode::Sequential);
    }

    #[test]
    fn test_code_start() {
        assert_eq!(Q4_1CodeOffset::Legacy.code_start(), 2);
        assert_eq!(Q4_1CodeOffset::Documented.code_start(), 4);
    }

    #[test]
    fn test_builder() {
        let config = UnpackConfig::default()
            .with_q4_1_code_offset(Q4_1CodeOffset::Documented)
            .with_insert_mode(InsertMode::Staged);
        assert_eq!(config.q4_1_code_offset, Q4_1CodeOffset::Documented);
        assert_eq!(config.insert_mode, InsertMode::Staged);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: UnpackConfig =
            serde_json::from_str(r#"{"q4_1_code_offset": "documented"}"#).unwrap();
        assert_eq!(config.q4_1_code_offset, Q4_1CodeOffset::Documented);
        assert_eq!(config.insert_mode, InsertMode::Sequential);

        let config: UnpackConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, UnpackConfig::default());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = UnpackConfig::default().with_insert_mode(InsertMode::Staged);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""insert_mode":"staged""#), "got {}", json);
        assert!(json.contains(r#""q4_1_code_offset":"legacy""#), "got {}", json);
        let back: UnpackConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_deserialize_unknown_variant_fails() {
        let result: Result<UnpackConfig, _> =
            serde_json::from_str(r#"{"insert_mode": "atomic"}"#);
        assert!(result.is_err());
    }
}
