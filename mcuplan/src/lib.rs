//! Welcome to `mcuplan`!
//!
//! `mcuplan` is the static memory planner of an ahead-of-time compiler
//! for quantized convolutional networks targeting microcontrollers. The
//! generated program owns a single statically-sized byte arena; this
//! crate decides, at compile time, the byte offset of every intermediate
//! activation tensor and every convolution staging buffer inside that
//! arena, and searches for the operator configuration (in-place
//! input/output overlap, pre-padded inputs) that minimizes the arena's
//! peak size.

mod model;
mod footprint;
mod visual;

pub mod algo;
pub mod geometry;
pub mod helpe;

pub use crate::footprint::MemoryFootprint;
pub use crate::helpe::*;
pub use crate::visual::render_footprint;

/// Data layout of an activation tensor in the arena.
///
/// `HWC` keeps the channels of one pixel contiguous; `CHW` stores one
/// full channel plane after another. Layouts are assigned by the
/// resolver (see [`algo::layout`]) from the operators' overlap flags,
/// never by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLayout {
    HWC,
    CHW,
}

/// An intermediate activation of the network.
///
/// > ***ATTENTION:*** lifetimes here are *operator-index columns*, not
/// > wall-clock time. A tensor born by operator `i` occupies its bytes
/// > in every column from `i` up to (and including) its last consumer's
/// > column--unless an in-place consumer cuts the occupancy short, in
/// > which case the bytes are reinterpreted as that consumer's output
/// > from its column onward.
///
/// The shape stored here is the shape as kept in memory. When padding
/// has been folded into the tensor ([`prepad_h`](Tensor::prepad_h),
/// [`prepad_w`](Tensor::prepad_w) nonzero) the stored plane is larger
/// than the nominal one, and [`Tensor::byte_size`] reflects that.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub id:         TensorId,
    pub dim_n:      usize,
    pub dim_h:      usize,
    pub dim_w:      usize,
    pub dim_c:      usize,
    pub elem_size:  usize,
    pub layout:     DataLayout,
    /// Producing operator index. `None` marks an external input.
    pub src_op:     Option<OpIdx>,
    /// Consuming operator indices, ascending.
    pub dst_ops:    Vec<OpIdx>,
    /// Byte offset into the arena. Meaningful only after scheduling.
    pub addr:       Option<ByteSteps>,
    pub prepad_h:   usize,
    pub prepad_w:   usize,
}

/// Kernel geometry of a (depthwise) convolution. Weights and biases
/// live in flash and never enter the arena; the planner only needs the
/// kernel's spatial extent and the padding/stride it applies.
#[derive(Debug, Clone, Copy)]
pub struct ConvParams {
    pub kernel_h:   usize,
    pub kernel_w:   usize,
    pub pad_h:      usize,
    pub pad_w:      usize,
    pub stride_h:   usize,
    pub stride_w:   usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolParams {
    pub filter_h:   usize,
    pub filter_w:   usize,
    pub stride_h:   usize,
    pub stride_w:   usize,
}

/// The closed set of operator kinds the planner understands.
#[derive(Debug, Clone, Copy)]
pub enum OpKind {
    Conv2D(ConvParams),
    DepthwiseConv2D(ConvParams),
    Add,
    Mul,
    AvgPool2D(PoolParams),
    Pad,
    Reshape,
}

/// One node of the operator graph. Identity is the node's position in
/// [`Model::operators`]: the loader hands us a trimmed, topologically
/// ordered list, so indices are dense and index 0 is the entry.
#[derive(Debug, Clone)]
pub struct Operator {
    pub kind:           OpKind,
    /// Ordered input tensor ids. `inputs[0]` is the data input.
    pub inputs:         Vec<TensorId>,
    pub output:         TensorId,
    /// Whether the output may alias the data input's memory.
    pub io_overlap:     bool,
    /// Staging buffer granted by the scheduler. Zero until scheduled,
    /// and zero for operators that need no buffer.
    pub buffer_addr:    ByteSteps,
    pub buffer_size:    ByteSteps,
}

/// The operator graph consumed and produced by the planner. Built once
/// by the loader; the optimizer mutates flags (and pre-pad amounts) in
/// place, while shapes and ids stay frozen after construction.
#[derive(Debug, Clone)]
pub struct Model {
    pub operators:  Vec<Operator>,
    pub tensors:    IndexMap<TensorId, Tensor>,
}
