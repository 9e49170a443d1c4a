//! GGUF quantized tensor unpacking.
//!
//! [`quant`] holds the block layouts and the per-scheme extractors,
//! [`tensor`] validates a directory entry, runs the extractor, and registers
//! the results, and [`config`] carries the knobs that change either step.

pub mod config;
pub mod quant;
pub mod tensor;

pub use config::{InsertMode, Q4_1CodeOffset, UnpackConfig};
pub use quant::{GgmlType, QuantType};
pub use tensor::{
    derived_keys, load_quantized, load_quantized_with, strip_weight_suffix, unpack_quantized,
    DerivedKeys, QuantizedTensors, RawTensorView,
};
