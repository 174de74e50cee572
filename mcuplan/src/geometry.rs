//! Turns the operator graph into the geometric proxies the scheduler
//! packs: one activation rectangle per arena-resident tensor, one
//! scratch rectangle per staging-buffer-needing convolution, and the
//! alignment groups induced by chained in-place depthwise convolutions.
//!
//! All of this is rebuilt from the model's *current* flags on every
//! scheduling pass; nothing here survives a pass.

use crate::helpe::*;
use crate::AlignGroup;

/// One rectangle per tensor living in the arena: every operator output
/// plus the graph's external inputs.
///
/// Width is the lifetime in operator columns: from the producer's
/// column through the last consumer's (at least 1 for dead outputs,
/// which must stay readable through the final operator). If the tensor
/// is the overlap target of an in-place consumer, its nominal occupancy
/// ends exactly when that consumer begins--co-location with the
/// consumer's output is the alignment groups' business, not the
/// lifetime's.
pub fn get_rects(model: &Model) -> Vec<Rect> {
    let mut res = Vec::with_capacity(model.tensors.len());
    for t in model.tensors.values() {
        let start = t.src_op.unwrap_or(0);
        let width = match model.overlap_consumer(t) {
            Some(q) => q - start,
            None => match t.last_use() {
                Some(last) => last - start + 1,
                None => 1,
            },
        };
        res.push(Rect {
            id:     t.id,
            start,
            width,
            height: t.byte_size(),
            addr:   0,
        });
    }

    res
}

/// One rectangle per convolution that needs a staging buffer (windowed
/// kernels only; see [`Operator::min_buffer_size`]). The rectangle is
/// keyed by the *operator index* and spans the operator's column plus
/// the one before it, where the kernel starts filling the staging area
/// while the previous output is still settling.
pub fn get_buf_rects(model: &Model) -> Vec<Rect> {
    model
        .operators
        .iter()
        .enumerate()
        .filter_map(|(idx, op)| {
            if !op.is_conv_family() {
                return None;
            }
            let height = op.min_buffer_size(model);
            if height == 0 {
                return None;
            }
            let start = idx.saturating_sub(1);
            Some(Rect {
                id:     idx as u32,
                start,
                width:  idx + 1 - start,
                height,
                addr:   0,
            })
        })
        .collect()
}

/// Builds the alignment groups for the current overlap flags: every
/// in-place depthwise convolution whose input and output are both
/// stored `HWC` ties the two tensors to a common pixel-stride base,
/// and back-to-back in-place depthwise convolutions chain into one
/// group.
///
/// Incompatible strides inside a chain would mean the overlap flags
/// were mis-classified upstream; that is a defect, not a recoverable
/// condition.
pub fn get_align_groups(model: &Model) -> Vec<AlignGroup> {
    let mut res: Vec<AlignGroup> = vec![];
    for op in &model.operators {
        if !matches!(op.kind, OpKind::DepthwiseConv2D(_)) || !op.io_overlap {
            continue;
        }
        let input = &model.tensors[&op.data_input()];
        let output = &model.tensors[&op.output];
        if input.layout != DataLayout::HWC || output.layout != DataLayout::HWC {
            continue;
        }
        let stride = input.dim_c * input.elem_size;
        match res.iter_mut().find(|g| g.members.contains(&input.id)) {
            Some(group) => {
                assert!(
                    group.stride == stride,
                    "Alignment stride conflict at tensor {}",
                    output.id
                );
                group.members.insert(output.id);
            }
            None => {
                res.push(AlignGroup {
                    members:    HashSet::from([input.id, output.id]),
                    stride,
                    base:       None,
                });
            }
        }
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: TensorId, h: usize, w: usize, c: usize) -> Tensor {
        Tensor::new(id, (1, h, w, c), 1)
    }

    fn dw3x3() -> ConvParams {
        ConvParams {
            kernel_h: 3, kernel_w: 3,
            pad_h: 0, pad_w: 0,
            stride_h: 1, stride_w: 1,
        }
    }

    fn find(rects: &[Rect], id: u32) -> &Rect {
        rects.iter().find(|r| r.id == id).unwrap()
    }

    #[test]
    fn lifetimes_span_producer_to_last_consumer() {
        // 0 -> [op0] -> 1 -> [op1] -> 2 -> [op2] -> 3, with tensor 1
        // also feeding op2 through an add.
        let model = Model::new(
            vec![t(0, 2, 2, 2), t(1, 2, 2, 2), t(2, 2, 2, 2), t(3, 2, 2, 2)],
            vec![
                Operator::reshape(1, 0),
                Operator::reshape(2, 1),
                Operator::add(3, 2, 1),
            ],
        )
        .unwrap();
        let rects = get_rects(&model);
        assert_eq!(rects.len(), 4);
        let r0 = find(&rects, 0);
        assert_eq!((r0.start, r0.width), (0, 1));
        let r1 = find(&rects, 1);
        assert_eq!((r1.start, r1.width), (0, 3));
        let r3 = find(&rects, 3);
        // Dead output keeps one column.
        assert_eq!((r3.start, r3.width), (2, 1));
        assert_eq!(r3.height, 8);
    }

    #[test]
    fn overlap_target_occupancy_stops_at_the_consumer() {
        let mut model = Model::new(
            vec![t(0, 4, 4, 4), t(1, 4, 4, 4), t(2, 4, 4, 4)],
            vec![
                Operator::reshape(1, 0),
                Operator::depthwise(2, 1, dw3x3()),
            ],
        )
        .unwrap();
        model.operators[1].io_overlap = true;
        let rects = get_rects(&model);
        let r1 = find(&rects, 1);
        // Born at column 0, handed over to the in-place consumer at
        // column 1: exactly one column of its own.
        assert_eq!((r1.start, r1.width), (0, 1));
        // The external input consumed in place by the entry operator
        // degenerates to zero width.
        model.operators[0] = Operator::depthwise(1, 0, dw3x3());
        model.operators[0].io_overlap = true;
        let rects = get_rects(&model);
        let r0 = find(&rects, 0);
        assert_eq!((r0.start, r0.width), (0, 0));
    }

    #[test]
    fn buf_rects_cover_the_preceding_column() {
        let model = Model::new(
            vec![t(0, 4, 4, 8), t(1, 4, 4, 8), t(2, 2, 2, 8)],
            vec![
                Operator::reshape(1, 0),
                Operator::conv2d(2, 1, dw3x3()),
            ],
        )
        .unwrap();
        let bufs = get_buf_rects(&model);
        assert_eq!(bufs.len(), 1);
        assert_eq!(bufs[0].id, 1);
        assert_eq!((bufs[0].start, bufs[0].width), (0, 2));
        // One im2col column: 3 * 3 * 8 channels.
        assert_eq!(bufs[0].height, 72);
    }

    #[test]
    fn pointwise_and_channel_major_convs_are_skipped() {
        let pw = ConvParams {
            kernel_h: 1, kernel_w: 1,
            pad_h: 0, pad_w: 0,
            stride_h: 1, stride_w: 1,
        };
        let mut model = Model::new(
            vec![t(0, 4, 4, 8), t(1, 4, 4, 8), t(2, 2, 2, 8)],
            vec![
                Operator::conv2d(1, 0, pw),
                Operator::depthwise(2, 1, dw3x3()),
            ],
        )
        .unwrap();
        model.tensors[&1].layout = DataLayout::CHW;
        assert!(get_buf_rects(&model).is_empty());
    }

    #[test]
    fn chained_inplace_depthwise_share_one_group() {
        let mut model = Model::new(
            vec![t(0, 4, 4, 4), t(1, 4, 4, 4), t(2, 4, 4, 4)],
            vec![
                Operator::depthwise(1, 0, dw3x3()),
                Operator::depthwise(2, 1, dw3x3()),
            ],
        )
        .unwrap();
        model.operators[0].io_overlap = true;
        model.operators[1].io_overlap = true;
        let groups = get_align_groups(&model);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, HashSet::from([0, 1, 2]));
        // 4 channels of 1-byte elements per pixel.
        assert_eq!(groups[0].stride, 4);
        assert!(groups[0].base.is_none());
    }

    #[test]
    fn non_overlapping_depthwise_forms_no_group() {
        let model = Model::new(
            vec![t(0, 4, 4, 4), t(1, 4, 4, 4)],
            vec![Operator::depthwise(1, 0, dw3x3())],
        )
        .unwrap();
        assert!(get_align_groups(&model).is_empty());
    }

    #[test]
    fn chw_members_are_left_out() {
        let mut model = Model::new(
            vec![t(0, 4, 4, 4), t(1, 4, 4, 4)],
            vec![Operator::depthwise(1, 0, dw3x3())],
        )
        .unwrap();
        model.operators[0].io_overlap = true;
        model.tensors[&0].layout = DataLayout::CHW;
        model.tensors[&1].layout = DataLayout::CHW;
        assert!(get_align_groups(&model).is_empty());
    }
}
