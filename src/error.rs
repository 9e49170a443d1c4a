use thiserror::Error;

use crate::gguf::quant::GgmlType;

#[derive(Error, Debug)]
pub enum UnpackError {
    #[error("Unknown tensor type: {0}")]
    UnknownTensorType(u32),

    #[error("tensor '{name}' has unsupported type {dtype} (expected Q4_0, Q4_1 or Q8_0)")]
    UnsupportedType { name: String, dtype: GgmlType },

    #[error("tensor '{name}' has incompatible last dim shape: {shape:?}")]
    IncompatibleShape { name: String, shape: Vec<usize> },

    #[error("tensor '{name}' does not end in \".weight\"")]
    MissingWeightSuffix { name: String },

    #[error("tensor '{name}': expected {expected} bytes, got {actual} bytes")]
    DataSize {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate parameter name '{key}' while loading quantized tensor '{tensor}'")]
    DuplicateKey { key: String, tensor: String },
}
