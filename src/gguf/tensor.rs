// Quantized tensor assembly: validate, unpack, and register under derived names

use std::collections::hash_map::Entry;

use half::f16;
use tracing::debug;

use crate::error::UnpackError;
use crate::tensor::{Tensor, TensorMap};
use super::config::{InsertMode, UnpackConfig};
use super::quant::{self, GgmlType, QuantType, QK};

/// Suffix every quantized weight name must carry.
pub const WEIGHT_SUFFIX: &str = ".weight";

// ---------------------------------------------------------------------------
// RawTensorView: input from the tensor directory
// ---------------------------------------------------------------------------

/// A quantized tensor as described by a GGUF tensor directory entry.
///
/// The data slice is borrowed (typically from a memory-mapped file). The
/// shape is outermost-first, so the last entry is the contiguous dimension
/// that blocks run along.
#[derive(Debug, Clone)]
pub struct RawTensorView<'a> {
    /// Tensor name (e.g. "blk.0.attn_q.weight").
    pub name: String,
    /// Data type from the directory.
    pub dtype: GgmlType,
    /// Dimension sizes, outermost first.
    pub shape: Vec<usize>,
    /// Raw block data.
    pub data: &'a [u8],
}

impl<'a> RawTensorView<'a> {
    pub fn new(name: impl Into<String>, dtype: GgmlType, shape: Vec<usize>, data: &'a [u8]) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
            data,
        }
    }

    /// Total number of logical elements, or `None` if the product overflows.
    pub fn n_elements(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

// ---------------------------------------------------------------------------
// QuantizedTensors: the unpacked (weights, scales, biases) triplet
// ---------------------------------------------------------------------------

/// Codes, scales and biases unpacked from one quantized tensor.
///
/// `weights` holds the packed codes of each block in logical order, as 16
/// (4-bit) or 32 (8-bit) bytes per block, grouped little-endian into u32
/// words. Element `k` of a block dequantizes to `code[k] * scale + bias`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensors {
    quant: QuantType,
    weights: Vec<u32>,
    weights_shape: Vec<usize>,
    scales: Vec<f16>,
    biases: Vec<f16>,
    params_shape: Vec<usize>,
}

impl QuantizedTensors {
    pub fn quant(&self) -> QuantType {
        self.quant
    }

    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    /// Input shape with the last dim divided by the codes per word.
    pub fn weights_shape(&self) -> &[usize] {
        &self.weights_shape
    }

    pub fn scales(&self) -> &[f16] {
        &self.scales
    }

    pub fn biases(&self) -> &[f16] {
        &self.biases
    }

    /// Shape shared by scales and biases: input shape with the last dim
    /// divided by the block width.
    pub fn params_shape(&self) -> &[usize] {
        &self.params_shape
    }

    pub fn n_blocks(&self) -> usize {
        self.scales.len()
    }

    /// Reference dequantization to f32: `code * scale + bias` per element,
    /// computed in f32 from the stored f16 parameters.
    pub fn dequantize(&self) -> Vec<f32> {
        let packed: Vec<u8> = self.weights.iter().flat_map(|w| w.to_le_bytes()).collect();
        let mut output = Vec::with_capacity(self.n_blocks() * QK);
        for ((block, scale), bias) in packed
            .chunks_exact(self.quant.packed_block_bytes())
            .zip(&self.scales)
            .zip(&self.biases)
        {
            let d = scale.to_f32();
            let m = bias.to_f32();
            for k in 0..QK {
                output.push(self.quant.code_at(block, k) as f32 * d + m);
            }
        }
        output
    }

    /// Split into (weights, scales, biases) tensors.
    pub fn into_tensors(self) -> (Tensor, Tensor, Tensor) {
        (
            Tensor::from_u32(self.weights_shape, self.weights),
            Tensor::from_f16(self.params_shape.clone(), self.scales),
            Tensor::from_f16(self.params_shape, self.biases),
        )
    }
}

// ---------------------------------------------------------------------------
// Derived names
// ---------------------------------------------------------------------------

/// Map keys for the three outputs of one tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    pub weights: String,
    pub scales: String,
    pub biases: String,
}

impl DerivedKeys {
    /// Keys in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [self.weights.as_str(), self.scales.as_str(), self.biases.as_str()].into_iter()
    }
}

/// Strip the trailing ".weight", if present.
pub fn strip_weight_suffix(name: &str) -> Option<&str> {
    name.strip_suffix(WEIGHT_SUFFIX)
}

/// Compute the keys for `name`: the name itself for the weights, and
/// `base.scales` / `base.biases` where `base` is the name without ".weight".
pub fn derived_keys(name: &str) -> Result<DerivedKeys, UnpackError> {
    let base = strip_weight_suffix(name).ok_or_else(|| UnpackError::MissingWeightSuffix {
        name: name.to_string(),
    })?;
    Ok(DerivedKeys {
        weights: name.to_string(),
        scales: format!("{}.scales", base),
        biases: format!("{}.biases", base),
    })
}

// ---------------------------------------------------------------------------
// Unpacking
// ---------------------------------------------------------------------------

/// Output geometry of a validated tensor.
struct Layout {
    quant: QuantType,
    n_blocks: usize,
    weights_shape: Vec<usize>,
    params_shape: Vec<usize>,
}

/// Check type, shape and data length, and compute the output shapes.
/// Nothing is allocated for the outputs until this succeeds.
fn plan(view: &RawTensorView<'_>) -> Result<Layout, UnpackError> {
    let quant = QuantType::try_from(view.dtype).map_err(|dtype| UnpackError::UnsupportedType {
        name: view.name.clone(),
        dtype,
    })?;

    let incompatible = || UnpackError::IncompatibleShape {
        name: view.name.clone(),
        shape: view.shape.clone(),
    };
    let last = *view.shape.last().ok_or_else(incompatible)?;
    if last % QK != 0 {
        return Err(incompatible());
    }
    let n_elements = view.n_elements().ok_or_else(incompatible)?;
    let expected = quant.data_size(n_elements).ok_or_else(incompatible)?;
    if view.data.len() != expected {
        return Err(UnpackError::DataSize {
            name: view.name.clone(),
            expected,
            actual: view.data.len(),
        });
    }

    let dim = view.shape.len() - 1;
    let mut weights_shape = view.shape.clone();
    weights_shape[dim] = last / quant.codes_per_word();
    let mut params_shape = view.shape.clone();
    params_shape[dim] = last / QK;

    Ok(Layout {
        quant,
        n_blocks: n_elements / QK,
        weights_shape,
        params_shape,
    })
}

fn extract(view: &RawTensorView<'_>, layout: Layout, config: &UnpackConfig) -> QuantizedTensors {
    let Layout {
        quant,
        n_blocks,
        weights_shape,
        params_shape,
    } = layout;

    let mut packed = vec![0u8; n_blocks * quant.packed_block_bytes()];
    let mut scales = vec![f16::ZERO; n_blocks];
    let mut biases = vec![f16::ZERO; n_blocks];

    match quant {
        QuantType::Q4_0 => quant::extract_q4_0(view.data, &mut packed, &mut scales, &mut biases),
        QuantType::Q4_1 => {
            debug!(
                name = %view.name,
                code_offset = ?config.q4_1_code_offset,
                "unpacking Q4_1 codes"
            );
            quant::extract_q4_1(
                view.data,
                &mut packed,
                &mut scales,
                &mut biases,
                config.q4_1_code_offset,
            )
        }
        QuantType::Q8_0 => quant::extract_q8_0(view.data, &mut packed, &mut scales, &mut biases),
    }

    let weights = packed
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();

    QuantizedTensors {
        quant,
        weights,
        weights_shape,
        scales,
        biases,
        params_shape,
    }
}

/// Unpack a quantized tensor without registering it anywhere.
pub fn unpack_quantized(
    view: &RawTensorView<'_>,
    config: &UnpackConfig,
) -> Result<QuantizedTensors, UnpackError> {
    let layout = plan(view)?;
    Ok(extract(view, layout, config))
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

fn insert_unique(
    map: &mut TensorMap,
    key: String,
    tensor: Tensor,
    owner: &str,
) -> Result<(), UnpackError> {
    match map.entry(key) {
        Entry::Occupied(e) => Err(UnpackError::DuplicateKey {
            key: e.key().clone(),
            tensor: owner.to_string(),
        }),
        Entry::Vacant(e) => {
            e.insert(tensor);
            Ok(())
        }
    }
}

/// Unpack `view` and insert weights, scales and biases into `map` using the
/// default [`UnpackConfig`].
pub fn load_quantized(
    map: &mut TensorMap,
    view: &RawTensorView<'_>,
) -> Result<DerivedKeys, UnpackError> {
    load_quantized_with(map, view, &UnpackConfig::default())
}

/// Unpack `view` and insert its three outputs into `map`.
///
/// Keys are the tensor name (weights), `base.scales` and `base.biases`,
/// inserted in that order. No key is ever overwritten. With
/// [`InsertMode::Sequential`] a collision on scales or biases returns an error
/// after the earlier entries were already inserted; with
/// [`InsertMode::Staged`] the map is left untouched on any collision.
///
/// Type, shape, name and data length are all checked before anything is
/// allocated.
pub fn load_quantized_with(
    map: &mut TensorMap,
    view: &RawTensorView<'_>,
    config: &UnpackConfig,
) -> Result<DerivedKeys, UnpackError> {
    let layout = plan(view)?;
    let keys = derived_keys(&view.name)?;

    if config.insert_mode == InsertMode::Staged {
        if let Some(key) = keys.iter().find(|k| map.contains_key(*k)) {
            return Err(UnpackError::DuplicateKey {
                key: key.to_string(),
                tensor: view.name.clone(),
            });
        }
    }

    let unpacked = extract(view, layout, config);
    debug!(
        name = %view.name,
        dtype = %unpacked.quant(),
        shape = ?view.shape,
        weights_shape = ?unpacked.weights_shape(),
        n_blocks = unpacked.n_blocks(),
        "unpacked quantized tensor"
    );

    let (weights, scales, biases) = unpacked.into_tensors();
    insert_unique(map, keys.weights.clone(), weights, &view.name)?;
    insert_unique(map, keys.scales.clone(), scales, &view.name)?;
    insert_unique(map, keys.biases.clone(), biases, &view.name)?;
    Ok(keys)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
