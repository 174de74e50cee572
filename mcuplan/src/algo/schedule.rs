//! The packing core: places every activation rectangle, then every
//! staging-buffer rectangle, into a fresh [`MemoryFootprint`] and
//! reports the arena's peak byte count.

use crate::geometry::{get_buf_rects, get_rects, get_align_groups};
use crate::helpe::*;
use crate::MemoryFootprint;

/// Packs the model's current configuration and returns the peak arena
/// size, writing the chosen address onto every tensor and the granted
/// buffer address/size onto every staging-buffer-needing operator.
///
/// Placement is decreasing-area best-fit: biggest rectangles claim
/// space first, each taking the tightest slot that survives the
/// intersection of its lifetime columns (and, for alignment-group
/// members, the stride shift). All orderings are total--area ties
/// break by ascending tensor id, slot ties by ascending start--so the
/// same model and flags always produce the same plan.
///
/// Staging buffers are handled after the activation peak is known and
/// are *never* recorded back into the footprint: only one kernel
/// executes at a time, so all staging buffers form one shared pool and
/// may freely alias each other. The generated code must uphold that
/// temporal exclusivity.
pub fn schedule(model: &mut Model) -> Result<ByteSteps, PlanError> {
    // Stale grants from a previous pass must not leak into this one:
    // an operator may have lost its buffer need with the flag change.
    for op in &mut model.operators {
        op.buffer_addr = 0;
        op.buffer_size = 0;
    }

    let mut rects = get_rects(model);
    rects.sort_unstable_by(|a, b| b.area().cmp(&a.area()).then(a.id.cmp(&b.id)));
    let mut groups = get_align_groups(model);
    let mut footprint = MemoryFootprint::new(model.operators.len());

    for rect in &mut rects {
        let mut slots = footprint.free_slots(rect.start, rect.width, rect.height);
        let group_idx = groups.iter().position(|g| g.members.contains(&rect.id));
        if let Some(gi) = group_idx {
            if let Some(base) = groups[gi].base {
                let stride = groups[gi].stride;
                for slot in slots.iter_mut() {
                    slot.0 += align_shift(slot.0, base, stride);
                }
                slots.retain(|&(s, e)| e.saturating_sub(s) >= rect.height);
                slots.sort_unstable_by_key(|&(s, e)| (e - s, s));
            }
        }
        let &(addr, _) = slots.first().ok_or(PlanError::NoSlot {
            tensor: rect.id,
            height: rect.height,
        })?;
        rect.addr = addr;
        footprint.place(rect.start, rect.width, addr, rect.height);
        if let Some(tensor) = model.tensors.get_mut(&rect.id) {
            tensor.addr = Some(addr);
        }
        if let Some(gi) = group_idx {
            if groups[gi].base.is_none() {
                groups[gi].base = Some(addr);
            }
        }
    }
    let mut peak = footprint.peak();
    tracing::debug!(activation_peak = peak, "activations packed");

    for buf in get_buf_rects(model) {
        let slots = footprint.free_slots(buf.start, buf.width, buf.height);
        let &(s0, e0) = slots.first().ok_or(PlanError::NoSlot {
            tensor: buf.id,
            height: buf.height,
        })?;
        let (addr, size) = if s0 + buf.height <= peak {
            // Fits under the activation peak; grant the whole slot up
            // to the peak so the kernel can stage more than the
            // minimum.
            let cap = if e0 == OPEN_END { peak } else { e0 };
            (s0, cap - s0)
        } else {
            // Bounded gaps always sit fully below the peak, so an
            // overshooting tightest fit can only be the open-ended top
            // slot: the buffer raises the peak by the minimum amount.
            debug_assert!(e0 == OPEN_END, "Bounded slot above the peak");
            peak = s0 + buf.height;
            (s0, buf.height)
        };
        let op = &mut model.operators[buf.id as usize];
        op.buffer_addr = addr;
        op.buffer_size = size;
    }

    Ok(peak)
}

/// Distance from `addr` up to the nearest address congruent to `base`
/// modulo `stride`.
#[inline(always)]
fn align_shift(addr: ByteSteps, base: ByteSteps, stride: ByteSteps) -> ByteSteps {
    (stride + base % stride - addr % stride) % stride
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: TensorId, bytes: usize) -> Tensor {
        // A flat 1 x 1 x bytes x 1 shape keeps sizes literal.
        Tensor::new(id, (1, 1, bytes, 1), 1)
    }

    fn dw(kernel: usize) -> ConvParams {
        ConvParams {
            kernel_h: kernel, kernel_w: kernel,
            pad_h: 0, pad_w: 0,
            stride_h: 1, stride_w: 1,
        }
    }

    fn addr(model: &Model, id: TensorId) -> ByteSteps {
        model.tensors[&id].addr.unwrap()
    }

    #[test]
    fn linear_chain_reuses_freed_space() {
        // Three operators, activation sizes 100 / 50 / 100: the last
        // output can reclaim the first one's slot, so the peak is 150,
        // not the naive 250.
        let mut model = Model::new(
            vec![t(0, 10), t(1, 100), t(2, 50), t(3, 100)],
            vec![
                Operator::reshape(1, 0),
                Operator::reshape(2, 1),
                Operator::reshape(3, 2),
            ],
        )
        .unwrap();
        let peak = schedule(&mut model).unwrap();
        assert_eq!(peak, 150);
        assert_eq!(addr(&model, 1), 0);
        assert_eq!(addr(&model, 2), 100);
        assert_eq!(addr(&model, 3), 0);
    }

    #[test]
    fn inplace_depthwise_shares_its_input_slot() {
        let mut model = Model::new(
            vec![
                Tensor::new(0, (1, 4, 4, 4), 1),
                Tensor::new(1, (1, 4, 4, 4), 1),
            ],
            vec![Operator::depthwise(1, 0, dw(1))],
        )
        .unwrap();
        model.operators[0].io_overlap = true;
        let peak = schedule(&mut model).unwrap();
        assert_eq!(peak, 64);
        assert_eq!(addr(&model, 0), addr(&model, 1));
    }

    #[test]
    fn alignment_shift_lands_on_the_base_stride() {
        assert_eq!(align_shift(64, 0, 48), 32);
        assert_eq!(align_shift(10, 64, 48), 6);
        assert_eq!(align_shift(96, 0, 48), 0);
        assert_eq!(align_shift(0, 16, 48), 16);
    }

    #[test]
    fn group_members_honor_the_fixed_base() {
        // Two chained in-place depthwise convs with stride-4 pixels.
        // Whatever slots the members land in, their addresses must be
        // congruent modulo the pixel stride.
        let mut model = Model::new(
            vec![
                Tensor::new(0, (1, 4, 4, 4), 1),
                Tensor::new(1, (1, 3, 3, 4), 1),
                Tensor::new(2, (1, 2, 2, 4), 1),
            ],
            vec![
                Operator::depthwise(1, 0, dw(2)),
                Operator::depthwise(2, 1, dw(2)),
            ],
        )
        .unwrap();
        model.operators[0].io_overlap = true;
        model.operators[1].io_overlap = true;
        schedule(&mut model).unwrap();
        let base = addr(&model, 0);
        for id in [1, 2] {
            assert_eq!((addr(&model, id)).abs_diff(base) % 4, 0);
        }
    }

    #[test]
    fn staging_buffer_reuses_a_gap_below_the_peak() {
        // conv1x1 -> conv3x3 -> conv1x1, with a fat final output that
        // sets the peak far above the staging buffer's columns.
        let pw = dw(1);
        let mut model = Model::new(
            vec![
                Tensor::new(0, (1, 4, 4, 8), 1),  // 128 B
                Tensor::new(1, (1, 4, 4, 8), 1),  // 128 B
                Tensor::new(2, (1, 2, 2, 4), 1),  // 16 B
                Tensor::new(3, (1, 10, 10, 4), 1), // 400 B
            ],
            vec![
                Operator::conv2d(1, 0, pw),
                Operator::conv2d(2, 1, dw(3)),
                Operator::conv2d(3, 2, pw),
            ],
        )
        .unwrap();
        model.operators[0].io_overlap = true;
        model.operators[2].io_overlap = true;
        let peak = schedule(&mut model).unwrap();
        // Activations alone reach 400 (the final output).
        assert_eq!(peak, 400);
        let op = &model.operators[1];
        // The 3x3 buffer over 8 channels needs 72 bytes and fits below
        // the peak without raising it, in the open gap above its
        // columns' activations.
        assert_eq!(op.buffer_addr, 144);
        assert_eq!(op.buffer_size, 400 - 144);
        assert!(op.buffer_size >= 72);
    }

    #[test]
    fn staging_buffer_raises_the_peak_when_nothing_fits() {
        // A lone 3x3 conv: every byte below the activation peak is
        // taken in the buffer's columns, so the buffer grows the arena
        // by exactly its minimum size.
        let mut model = Model::new(
            vec![
                Tensor::new(0, (1, 4, 4, 8), 1),  // 128 B
                Tensor::new(1, (1, 2, 2, 8), 1),  // 32 B
            ],
            vec![Operator::conv2d(1, 0, dw(3))],
        )
        .unwrap();
        let peak = schedule(&mut model).unwrap();
        assert_eq!(peak, 160 + 72);
        let op = &model.operators[0];
        assert_eq!(op.buffer_addr, 160);
        assert_eq!(op.buffer_size, 72);
    }

    #[test]
    fn rescheduling_is_idempotent() {
        let mut model = Model::new(
            vec![t(0, 10), t(1, 100), t(2, 50), t(3, 100)],
            vec![
                Operator::reshape(1, 0),
                Operator::reshape(2, 1),
                Operator::reshape(3, 2),
            ],
        )
        .unwrap();
        let first = schedule(&mut model).unwrap();
        let addrs: Vec<_> = model.tensors.values().map(|t| t.addr).collect();
        let second = schedule(&mut model).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            addrs,
            model.tensors.values().map(|t| t.addr).collect::<Vec<_>>()
        );
    }

    #[test]
    fn live_ranges_never_alias() {
        // A diamond: the residual input stays live across the branch,
        // so every pair of temporally-overlapping tensors must occupy
        // disjoint byte ranges.
        let pw = dw(1);
        let mut model = Model::new(
            vec![
                Tensor::new(0, (1, 4, 4, 8), 1),
                Tensor::new(1, (1, 4, 4, 8), 1),
                Tensor::new(2, (1, 4, 4, 8), 1),
                Tensor::new(3, (1, 4, 4, 8), 1),
                Tensor::new(4, (1, 4, 4, 8), 1),
            ],
            vec![
                Operator::conv2d(1, 0, pw),
                Operator::conv2d(2, 1, pw),
                Operator::conv2d(3, 2, pw),
                Operator::add(4, 3, 1),
            ],
        )
        .unwrap();
        let peak = schedule(&mut model).unwrap();
        let rects = crate::geometry::get_rects(&model);
        for (a, b) in rects.iter().tuple_combinations() {
            let cols_overlap =
                a.start < b.start + b.width && b.start < a.start + a.width;
            if !cols_overlap {
                continue;
            }
            let (a0, a1) = (addr(&model, a.id), addr(&model, a.id) + a.height);
            let (b0, b1) = (addr(&model, b.id), addr(&model, b.id) + b.height);
            assert!(a1 <= b0 || b1 <= a0, "tensors {} and {} alias", a.id, b.id);
            assert!(a1 <= peak && b1 <= peak);
        }
    }
}
