//! The layout & overlap resolver: a deterministic pass, run before
//! every scheduling call, that derives each tensor's storage layout
//! from the operators' current overlap flags.
//!
//! The pass has no failure states. It may, however, assign a layout
//! combination that makes a previously-assumed overlap unattractive;
//! such contradictions surface only as a higher peak, which the
//! optimizer answers by reverting the flag.

use crate::helpe::*;

/// Assigns every tensor's layout tag:
///
/// 1. every operator output (and the external input) defaults to `HWC`;
/// 2. depthwise convolutions, in reverse topological order, force their
///    input to match the output when overlapped (byte-identical
///    aliasing needs identical layouts) and to `CHW` otherwise (which
///    unlocks the buffer-free streaming kernel);
/// 3. `Add`/`Mul` inputs that disagree are both forced back to `HWC`,
///    the only layout the elementwise kernels support;
/// 4. overlapped convolutions are re-visited in reverse order, since
///    step 3 can change an output layout after step 2 already ran.
pub fn assign_layouts(model: &mut Model) {
    let Model { operators, tensors } = model;

    for op in operators.iter() {
        tensors[&op.output].layout = DataLayout::HWC;
    }
    let entry_in = operators[0].data_input();
    tensors[&entry_in].layout = DataLayout::HWC;

    for op in operators.iter().rev() {
        if !matches!(op.kind, OpKind::DepthwiseConv2D(_)) {
            continue;
        }
        let out_layout = tensors[&op.output].layout;
        let input = &mut tensors[&op.data_input()];
        input.layout = if op.io_overlap {
            out_layout
        } else {
            DataLayout::CHW
        };
    }

    for op in operators.iter() {
        if !matches!(op.kind, OpKind::Add | OpKind::Mul) {
            continue;
        }
        let (a, b) = (op.inputs[0], op.inputs[1]);
        if tensors[&a].layout != tensors[&b].layout {
            tensors[&a].layout = DataLayout::HWC;
            tensors[&b].layout = DataLayout::HWC;
        }
    }

    for op in operators.iter().rev() {
        if !op.is_conv_family() || !op.io_overlap {
            continue;
        }
        let out_layout = tensors[&op.output].layout;
        tensors[&op.data_input()].layout = out_layout;
    }
}
