//! The greedy configuration search sitting on top of the scheduler.
//!
//! Every move flips one knob on one operator (dropping an in-place
//! overlap, or folding a depthwise convolution's padding into its
//! input), replans the whole model, and keeps the move only if the new
//! peak stays within the slack budget. Later kernels run faster with
//! the knob flipped; the budget caps how much arena that speed may
//! cost.

use crate::algo::layout::assign_layouts;
use crate::algo::schedule::schedule;
use crate::helpe::*;

/// Owns the model across the search. Constructed with the
/// memory-optimal default configuration already planned; consumed by
/// [`Optimizer::optimize`], which hands the model back with the final
/// flags, addresses and buffer grants written in.
pub struct Optimizer {
    model:      Model,
    min_peak:   ByteSteps,
}

impl Optimizer {
    /// Plans the baseline: every operator that *can* run in place does.
    /// Pointwise regular convolutions and all depthwise convolutions
    /// may alias their input; windowed regular convolutions never can,
    /// since every output pixel reads a window of still-needed inputs.
    /// Aliasing is also off the table when a later operator (say, a
    /// residual add) still reads the input.
    pub fn new(mut model: Model) -> Result<Self, PlanError> {
        let flags: Vec<bool> = model
            .operators
            .iter()
            .enumerate()
            .map(|(idx, op)| {
                let kernel_allows = match op.kind {
                    OpKind::Conv2D(p) => p.kernel_h == 1 && p.kernel_w == 1,
                    OpKind::DepthwiseConv2D(_) => true,
                    _ => false,
                };
                kernel_allows
                    && model.tensors[&op.data_input()].last_use() == Some(idx)
            })
            .collect();
        for (op, flag) in model.operators.iter_mut().zip(flags) {
            op.io_overlap = flag;
        }
        assign_layouts(&mut model);
        let min_peak = schedule(&mut model)?;
        tracing::debug!(min_peak, "baseline planned");

        Ok(Self { model, min_peak })
    }

    /// The baseline peak, before any slack is spent.
    #[inline(always)]
    pub fn min_peak(&self) -> ByteSteps {
        self.min_peak
    }

    /// Greedily spends the slack budget, walking the operators in
    /// execution order and keeping every move whose replanned peak
    /// stays at or below `min_peak * slack`. Returns the final model
    /// and its peak.
    ///
    /// `slack` must be a finite factor >= 1.0; at exactly 1.0 only
    /// moves that are free (or better) survive.
    pub fn optimize(mut self, slack: f64) -> Result<(Model, ByteSteps), PlanError> {
        if !slack.is_finite() || slack < 1.0 {
            return Err(PlanError::BadSlack(slack));
        }
        let budget = self.min_peak as f64 * slack;
        tracing::info!(min_peak = self.min_peak, slack, "optimizing");

        for idx in 0..self.model.operators.len() {
            if !self.model.operators[idx].is_conv_family() {
                continue;
            }
            if self.model.operators[idx].io_overlap {
                self.model.operators[idx].io_overlap = false;
                let peak = self.replan()?;
                if peak as f64 > budget {
                    self.model.operators[idx].io_overlap = true;
                } else {
                    tracing::debug!(op = idx, peak, "dropped in-place overlap");
                }
            }
            if self.foldable(idx) {
                let backup = self.fold_padding(idx);
                let peak = self.replan()?;
                if peak as f64 > budget {
                    self.unfold_padding(idx, backup);
                } else {
                    tracing::debug!(op = idx, peak, "folded padding into input");
                }
            }
        }

        // The last rejected move left stale addresses behind.
        assign_layouts(&mut self.model);
        let peak = schedule(&mut self.model)?;
        tracing::info!(peak, "final plan");

        Ok((self.model, peak))
    }

    fn replan(&mut self) -> Result<ByteSteps, PlanError> {
        assign_layouts(&mut self.model);
        schedule(&mut self.model)
    }

    /// A padding fold stores the input pre-padded so the depthwise
    /// kernel can stream it without a staging plane. It applies only
    /// when the operator reads the tensor out of place (aliasing would
    /// clobber the halo), the input is produced inside the graph for
    /// this operator alone, and the padding halo is smaller than the
    /// channel plane it wraps. Anything past this gate is still judged
    /// by the slack budget.
    fn foldable(&self, idx: OpIdx) -> bool {
        let op = &self.model.operators[idx];
        let p = match op.kind {
            OpKind::DepthwiseConv2D(p) => p,
            _ => return false,
        };
        if op.io_overlap || idx == 0 || (p.pad_h == 0 && p.pad_w == 0) {
            return false;
        }
        let input = &self.model.tensors[&op.data_input()];
        if input.is_external() || input.dst_ops.len() != 1 {
            return false;
        }
        if input.prepad_h != 0 || input.prepad_w != 0 {
            return false;
        }
        let padded_plane = (input.dim_h + 2 * p.pad_h) * (input.dim_w + 2 * p.pad_w);
        let plane = input.dim_h * input.dim_w;
        padded_plane - plane < plane
    }

    fn fold_padding(&mut self, idx: OpIdx) -> ConvParams {
        let input_id = self.model.operators[idx].data_input();
        let p = match &mut self.model.operators[idx].kind {
            OpKind::DepthwiseConv2D(p) => p,
            _ => unreachable!(),
        };
        let backup = *p;
        let input = &mut self.model.tensors[&input_id];
        input.prepad_h = p.pad_h;
        input.prepad_w = p.pad_w;
        p.pad_h = 0;
        p.pad_w = 0;

        backup
    }

    fn unfold_padding(&mut self, idx: OpIdx, backup: ConvParams) {
        let input_id = self.model.operators[idx].data_input();
        match &mut self.model.operators[idx].kind {
            OpKind::DepthwiseConv2D(p) => *p = backup,
            _ => unreachable!(),
        }
        let input = &mut self.model.tensors[&input_id];
        input.prepad_h = 0;
        input.prepad_w = 0;
    }
}
