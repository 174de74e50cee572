pub use std::{
    collections::{HashMap, HashSet},
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Instant,
};
pub use thiserror::Error;
pub use itertools::Itertools;
pub use indexmap::IndexMap;
pub use clap::Parser;

pub use crate::{
    ConvParams, DataLayout, Model, OpKind, Operator, PoolParams, Tensor,
};

/// The unit for measuring arena offsets and sizes. We keep one type
/// for both, since a rectangle's height *is* a byte count.
pub type ByteSteps = usize;

/// Stable tensor identity, assigned by the loader.
pub type TensorId = u32;

/// Dense operator index, `0..N-1` in topological order.
pub type OpIdx = usize;

/// Sentinel for the open upper end of the last free gap in a column.
/// No real model comes anywhere near it.
pub const OPEN_END: ByteSteps = ByteSteps::MAX;

/// An ordered list of disjoint, non-touching `(start, end)` byte
/// intervals--either the used blocks of a footprint column, or the
/// free slots returned by a query. Half-open: `end` is excluded.
pub type Blocks = Vec<(ByteSteps, ByteSteps)>;

#[derive(Error, Debug)]
/// Everything that can go fatally wrong while planning. There is no
/// partial-success mode: either the whole model gets a consistent
/// memory plan, or planning fails with one of these.
pub enum PlanError {
    #[error("model has no operators")]
    EmptyGraph,
    #[error("operator {op} references missing tensor {tensor}")]
    MissingTensor { op: OpIdx, tensor: TensorId },
    #[error("duplicate tensor id {0}")]
    DuplicateTensor(TensorId),
    #[error("tensor {0} has zero byte size")]
    ZeroSizeTensor(TensorId),
    #[error("tensor {tensor} is produced by both operator {first} and operator {second}")]
    DualProducer { tensor: TensorId, first: OpIdx, second: OpIdx },
    #[error("entry operator consumes tensor {0}, which is not an external input")]
    BadEntry(TensorId),
    #[error("tensor {0} is referenced by no operator")]
    OrphanTensor(TensorId),
    #[error("no slot fits a rectangle of height {height} for tensor {tensor}")]
    NoSlot { tensor: TensorId, height: ByteSteps },
    #[error("slack factor {0} is below 1.0")]
    BadSlack(f64),
}

//---START PLACEMENT PRIMITIVES
/// A pure geometric proxy for one arena resident: `height` bytes that
/// must stay reserved across `width` consecutive operator columns
/// starting at column `start`. For activations `id` is the tensor id;
/// for staging buffers it is the owning operator's index.
///
/// Rectangles exist only inside a scheduling pass and are discarded
/// once the peak has been read back.
#[derive(Debug, Clone)]
pub struct Rect {
    pub id:     u32,
    pub start:  OpIdx,
    pub width:  usize,
    pub height: ByteSteps,
    pub addr:   ByteSteps,
}

impl Rect {
    #[inline(always)]
    pub fn area(&self) -> ByteSteps {
        self.height * self.width
    }
}

/// Tensors chained through in-place depthwise convolutions in `HWC`
/// layout. Every member's address must differ from `base` by a
/// multiple of `stride` (the per-pixel byte stride), or the in-place
/// kernel would read a pixel it has already clobbered.
///
/// `base` is fixed by whichever member the scheduler places first,
/// and dies with the scheduling pass.
#[derive(Debug, Clone)]
pub struct AlignGroup {
    pub members:    HashSet<TensorId>,
    pub stride:     ByteSteps,
    pub base:       Option<ByteSteps>,
}
//---END PLACEMENT PRIMITIVES

//---START EXTERNAL INTERFACES
// The planner itself is an in-process library call; the types below
// exist so the CLI driver (and tests) can read a model description
// from disk without dragging in a full `.tflite` parser.
//
// To write your own loader, simply make sure it satisfies `ModelGen`.

pub trait ModelGen {
    fn new(path: PathBuf) -> Self;
    /// Either a wired, validated [Model] is returned, or some
    /// arbitrary type that implements [std::error::Error].
    fn read_model(&self) -> Result<Model, Box<dyn std::error::Error>>;
}

/// Reads a line-oriented CSV graph description:
///
/// ```text
/// tensor,<id>,<h>,<w>,<c>,<elem_size>
/// conv,<out>,<in>,<kh>,<kw>,<pad_h>,<pad_w>,<stride_h>,<stride_w>
/// dwconv,<out>,<in>,<kh>,<kw>,<pad_h>,<pad_w>,<stride_h>,<stride_w>
/// add,<out>,<a>,<b>
/// mul,<out>,<a>,<b>
/// avgpool,<out>,<in>,<fh>,<fw>,<stride_h>,<stride_w>
/// pad,<out>,<in>
/// reshape,<out>,<in>
/// ```
///
/// Operator records appear in topological order; their position in the
/// file becomes their operator index. Batch is always 1. Blank lines
/// and lines starting with `#` are skipped.
pub struct GraphCSVParser {
    pub path: PathBuf,
}

impl ModelGen for GraphCSVParser {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_model(&self) -> Result<Model, Box<dyn std::error::Error>> {
        let fd = std::fs::File::open(self.path.as_path())?;
        let reader = BufReader::new(fd);
        let mut tensors: Vec<Tensor> = vec![];
        let mut operators: Vec<Operator> = vec![];

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
            let bad_record = || -> Box<dyn std::error::Error> {
                format!("malformed record at line {}: {line}", line_no + 1).into()
            };
            let num = |idx: usize| -> Result<usize, Box<dyn std::error::Error>> {
                fields
                    .get(idx)
                    .ok_or_else(bad_record)?
                    .parse::<usize>()
                    .map_err(|_| bad_record())
            };
            let tid = |idx: usize| -> Result<TensorId, Box<dyn std::error::Error>> {
                TensorId::try_from(num(idx)?).map_err(|_| bad_record())
            };
            match fields[0] {
                "tensor" => {
                    tensors.push(Tensor::new(
                        tid(1)?,
                        (1, num(2)?, num(3)?, num(4)?),
                        num(5)?,
                    ));
                }
                "conv" | "dwconv" => {
                    let params = ConvParams {
                        kernel_h:   num(3)?,
                        kernel_w:   num(4)?,
                        pad_h:      num(5)?,
                        pad_w:      num(6)?,
                        stride_h:   num(7)?,
                        stride_w:   num(8)?,
                    };
                    operators.push(if fields[0] == "conv" {
                        Operator::conv2d(tid(1)?, tid(2)?, params)
                    } else {
                        Operator::depthwise(tid(1)?, tid(2)?, params)
                    });
                }
                "add" => operators.push(Operator::add(tid(1)?, tid(2)?, tid(3)?)),
                "mul" => operators.push(Operator::mul(tid(1)?, tid(2)?, tid(3)?)),
                "avgpool" => {
                    let params = PoolParams {
                        filter_h:   num(3)?,
                        filter_w:   num(4)?,
                        stride_h:   num(5)?,
                        stride_w:   num(6)?,
                    };
                    operators.push(Operator::avg_pool(tid(1)?, tid(2)?, params));
                }
                "pad" => operators.push(Operator::pad(tid(1)?, tid(2)?)),
                "reshape" => operators.push(Operator::reshape(tid(1)?, tid(2)?)),
                _ => return Err(bad_record()),
            }
        }

        Ok(Model::new(tensors, operators)?)
    }
}
//---END EXTERNAL INTERFACES
