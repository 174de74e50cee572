use crate::helpe::*;

impl Tensor {
    /// Creates a fresh, unwired tensor. Producer/consumer links are
    /// filled in by [`Model::new`].
    pub fn new(id: TensorId, (n, h, w, c): (usize, usize, usize, usize), elem_size: usize) -> Self {
        Self {
            id,
            dim_n:      n,
            dim_h:      h,
            dim_w:      w,
            dim_c:      c,
            elem_size,
            layout:     DataLayout::HWC,
            src_op:     None,
            dst_ops:    vec![],
            addr:       None,
            prepad_h:   0,
            prepad_w:   0,
        }
    }

    /// Bytes this tensor occupies in the arena, pre-padding included.
    #[inline(always)]
    pub fn byte_size(&self) -> ByteSteps {
        self.dim_n
            * (self.dim_h + 2 * self.prepad_h)
            * (self.dim_w + 2 * self.prepad_w)
            * self.dim_c
            * self.elem_size
    }

    /// Returns `true` if this tensor comes from outside the graph.
    #[inline(always)]
    pub fn is_external(&self) -> bool {
        self.src_op.is_none()
    }

    /// The last operator column in which some consumer still reads
    /// this tensor. `None` for dead outputs.
    #[inline(always)]
    pub fn last_use(&self) -> Option<OpIdx> {
        self.dst_ops.iter().copied().max()
    }
}

impl Operator {
    fn raw(kind: OpKind, inputs: Vec<TensorId>, output: TensorId) -> Self {
        Self {
            kind,
            inputs,
            output,
            io_overlap:     false,
            buffer_addr:    0,
            buffer_size:    0,
        }
    }

    pub fn conv2d(output: TensorId, input: TensorId, params: ConvParams) -> Self {
        Self::raw(OpKind::Conv2D(params), vec![input], output)
    }

    pub fn depthwise(output: TensorId, input: TensorId, params: ConvParams) -> Self {
        Self::raw(OpKind::DepthwiseConv2D(params), vec![input], output)
    }

    pub fn add(output: TensorId, a: TensorId, b: TensorId) -> Self {
        Self::raw(OpKind::Add, vec![a, b], output)
    }

    pub fn mul(output: TensorId, a: TensorId, b: TensorId) -> Self {
        Self::raw(OpKind::Mul, vec![a, b], output)
    }

    pub fn avg_pool(output: TensorId, input: TensorId, params: PoolParams) -> Self {
        Self::raw(OpKind::AvgPool2D(params), vec![input], output)
    }

    pub fn pad(output: TensorId, input: TensorId) -> Self {
        Self::raw(OpKind::Pad, vec![input], output)
    }

    pub fn reshape(output: TensorId, input: TensorId) -> Self {
        Self::raw(OpKind::Reshape, vec![input], output)
    }

    /// The data input, i.e., the tensor an in-place output would alias.
    #[inline(always)]
    pub fn data_input(&self) -> TensorId {
        self.inputs[0]
    }

    #[inline(always)]
    pub fn is_conv_family(&self) -> bool {
        matches!(
            self.kind,
            OpKind::Conv2D(_) | OpKind::DepthwiseConv2D(_)
        )
    }

    #[inline(always)]
    pub fn conv_params(&self) -> Option<&ConvParams> {
        match &self.kind {
            OpKind::Conv2D(p) | OpKind::DepthwiseConv2D(p) => Some(p),
            _ => None,
        }
    }

    /// Minimum staging buffer the operator's kernel needs, in bytes.
    ///
    /// Pointwise kernels stream pixel by pixel and need none. A windowed
    /// regular convolution stages one im2col column: `kh * kw` input
    /// pixels across all channels. A windowed depthwise convolution
    /// stages one channel plane (pre-padding and residual padding
    /// included)--unless its input is already stored channel-major, in
    /// which case the streaming kernel reads the plane in place.
    pub fn min_buffer_size(&self, model: &Model) -> ByteSteps {
        match self.kind {
            OpKind::Conv2D(p) => {
                if p.kernel_h == 1 && p.kernel_w == 1 {
                    return 0;
                }
                let input = &model.tensors[&self.data_input()];
                p.kernel_h * p.kernel_w * input.dim_c * input.elem_size
            }
            OpKind::DepthwiseConv2D(p) => {
                if p.kernel_h == 1 && p.kernel_w == 1 {
                    return 0;
                }
                let input = &model.tensors[&self.data_input()];
                let buf_h = input.dim_h + 2 * input.prepad_h + 2 * p.pad_h;
                let buf_w = input.dim_w + 2 * input.prepad_w + 2 * p.pad_w;
                let channel_size = buf_h * buf_w * input.elem_size;
                // Residual padding forces the staging plane no matter
                // what the layout says.
                if p.pad_h != 0 || p.pad_w != 0 {
                    return channel_size;
                }
                if input.layout == DataLayout::CHW {
                    return 0;
                }
                channel_size
            }
            _ => 0,
        }
    }
}

impl Model {
    /// Wires and validates a graph handed over by the loader.
    ///
    /// A successfully returned [Model] is guaranteed to be compliant
    /// with all of the planner's assumptions. These are:
    /// - every referenced tensor id exists, and ids are unique
    /// - every tensor is referenced by at least one operator
    /// - no tensor has zero byte size
    /// - every tensor has at most one producer
    /// - the entry operator's data input is external
    ///
    /// This function is the gatekeeper to the rest of the library.
    /// Producer/consumer links and addresses on the incoming tensors
    /// are discarded and rebuilt from the operator list.
    pub fn new(tensors: Vec<Tensor>, operators: Vec<Operator>) -> Result<Self, PlanError> {
        if operators.is_empty() {
            return Err(PlanError::EmptyGraph);
        }
        let mut map: IndexMap<TensorId, Tensor> = IndexMap::with_capacity(tensors.len());
        for mut t in tensors {
            t.src_op = None;
            t.dst_ops.clear();
            t.addr = None;
            if t.byte_size() == 0 {
                return Err(PlanError::ZeroSizeTensor(t.id));
            }
            let id = t.id;
            if map.insert(id, t).is_some() {
                return Err(PlanError::DuplicateTensor(id));
            }
        }
        for (idx, op) in operators.iter().enumerate() {
            for &tid in &op.inputs {
                map.get_mut(&tid)
                    .ok_or(PlanError::MissingTensor { op: idx, tensor: tid })?
                    .dst_ops
                    .push(idx);
            }
            let out = map
                .get_mut(&op.output)
                .ok_or(PlanError::MissingTensor { op: idx, tensor: op.output })?;
            if let Some(first) = out.src_op {
                return Err(PlanError::DualProducer {
                    tensor: op.output,
                    first,
                    second: idx,
                });
            }
            out.src_op = Some(idx);
        }
        let entry_in = operators[0].data_input();
        if !map[&entry_in].is_external() {
            return Err(PlanError::BadEntry(entry_in));
        }
        // An unreferenced tensor would still claim arena space.
        if let Some(orphan) = map
            .values()
            .find(|t| t.src_op.is_none() && t.dst_ops.is_empty())
        {
            return Err(PlanError::OrphanTensor(orphan.id));
        }

        Ok(Self { operators, tensors: map })
    }

    /// The graph's external input tensor id.
    #[inline(always)]
    pub fn entry_input(&self) -> TensorId {
        self.operators[0].data_input()
    }

    /// Looks up the in-place consumer of `tensor`, if one exists: a
    /// convolution-family operator with `io_overlap` set whose data
    /// input is `tensor`.
    pub fn overlap_consumer(&self, tensor: &Tensor) -> Option<OpIdx> {
        tensor
            .dst_ops
            .iter()
            .copied()
            .find(|&q| {
                let op = &self.operators[q];
                op.is_conv_family() && op.io_overlap && op.data_input() == tensor.id
            })
    }
}
