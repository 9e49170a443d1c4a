pub mod error;
pub mod gguf;
pub mod tensor;

pub use error::UnpackError;
pub use gguf::{
    load_quantized, load_quantized_with, unpack_quantized, GgmlType, InsertMode, Q4_1CodeOffset,
    QuantType, QuantizedTensors, RawTensorView, UnpackConfig,
};
pub use tensor::{Tensor, TensorMap};
