//! Dense host tensors produced by unpacking, and the name map they land in.
//!
//! Unpacking only ever produces two element types: packed codes in 32-bit
//! words and half-float scales/biases. [`Tensor`] holds one of those with
//! its shape; [`TensorMap`] is the caller-owned name map.

use std::collections::HashMap;

use half::f16;
use tracing::debug;

/// Name-to-tensor map owned by the caller and shared across conversions.
pub type TensorMap = HashMap<String, Tensor>;

/// Data type of tensor elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorDtype {
    U32,
    F16,
}

impl TensorDtype {
    /// Size in bytes of one element.
    pub fn element_size(&self) -> usize {
        match self {
            TensorDtype::U32 => 4,
            TensorDtype::F16 => 2,
        }
    }
}

/// Storage for tensor data, varying by dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorStorage {
    /// 32-bit words, each holding several packed codes.
    U32(Vec<u32>),
    /// Half-precision values, stored with their exact bit patterns.
    F16(Vec<f16>),
}

/// N-dimensional tensor with dtype and storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    storage: TensorStorage,
}

impl Tensor {
    /// Create a U32 tensor from shape and data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the product of `shape`.
    pub fn from_u32(shape: Vec<usize>, data: Vec<u32>) -> Self {
        let n_elements: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            n_elements,
            "U32 data length {} does not match shape {:?} (expected {})",
            data.len(),
            shape,
            n_elements
        );
        debug!(dtype = ?TensorDtype::U32, ?shape, "Created tensor");
        Self {
            shape,
            storage: TensorStorage::U32(data),
        }
    }

    /// Create an F16 tensor from shape and data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the product of `shape`.
    pub fn from_f16(shape: Vec<usize>, data: Vec<f16>) -> Self {
        let n_elements: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            n_elements,
            "F16 data length {} does not match shape {:?} (expected {})",
            data.len(),
            shape,
            n_elements
        );
        debug!(dtype = ?TensorDtype::F16, ?shape, "Created tensor");
        Self {
            shape,
            storage: TensorStorage::F16(data),
        }
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the data type of the tensor.
    pub fn dtype(&self) -> TensorDtype {
        match self.storage {
            TensorStorage::U32(_) => TensorDtype::U32,
            TensorStorage::F16(_) => TensorDtype::F16,
        }
    }

    /// Returns the storage of the tensor.
    pub fn storage(&self) -> &TensorStorage {
        &self.storage
    }

    /// Returns the total number of elements in the tensor.
    pub fn n_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the storage in bytes.
    pub fn byte_size(&self) -> usize {
        self.n_elements() * self.dtype().element_size()
    }

    /// The U32 words, or `None` for an F16 tensor.
    pub fn as_u32(&self) -> Option<&[u32]> {
        match &self.storage {
            TensorStorage::U32(data) => Some(data),
            TensorStorage::F16(_) => None,
        }
    }

    /// The F16 values, or `None` for a U32 tensor.
    pub fn as_f16(&self) -> Option<&[f16]> {
        match &self.storage {
            TensorStorage::F16(data) => Some(data),
            TensorStorage::U32(_) => None,
        }
    }

    /// Serialize the storage as little-endian bytes, e.g. to hand it to a
    /// runtime that takes raw buffers.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match &self.storage {
            TensorStorage::U32(data) => data.iter().flat_map(|w| w.to_le_bytes()).collect(),
            TensorStorage::F16(data) => {
                data.iter().flat_map(|h| h.to_bits().to_le_bytes()).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_tensor() {
        let t = Tensor::from_u32(vec![2, 3], vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.dtype(), TensorDtype::U32);
        assert_eq!(t.n_elements(), 6);
        assert_eq!(t.byte_size(), 24);
        assert_eq!(t.as_u32(), Some(&[1u32, 2, 3, 4, 5, 6][..]));
        assert!(t.as_f16().is_none());
    }

    #[test]
    fn test_f16_tensor() {
        let data = vec![f16::from_bits(0x3C00), f16::from_bits(0xC000)];
        let t = Tensor::from_f16(vec![2], data.clone());
        assert_eq!(t.dtype(), TensorDtype::F16);
        assert_eq!(t.byte_size(), 4);
        assert_eq!(t.as_f16(), Some(&data[..]));
        assert!(t.as_u32().is_none());
    }

    #[test]
    #[should_panic(expected = "does not match shape")]
    fn test_u32_shape_mismatch_panics() {
        Tensor::from_u32(vec![4], vec![0; 3]);
    }

    #[test]
    #[should_panic(expected = "does not match shape")]
    fn test_f16_shape_mismatch_panics() {
        Tensor::from_f16(vec![2, 2], vec![f16::ZERO; 5]);
    }

    #[test]
    fn test_to_le_bytes() {
        let t = Tensor::from_u32(vec![1], vec![0x8382_8180]);
        assert_eq!(t.to_le_bytes(), vec![0x80, 0x81, 0x82, 0x83]);

        let t = Tensor::from_f16(vec![2], vec![f16::from_bits(0x3C00), f16::from_bits(0x7E01)]);
        assert_eq!(t.to_le_bytes(), vec![0x00, 0x3C, 0x01, 0x7E]);
    }

    #[test]
    fn test_empty_tensor() {
        let t = Tensor::from_u32(vec![0, 8], Vec::new());
        assert_eq!(t.n_elements(), 0);
        assert!(t.to_le_bytes().is_empty());
    }
}
