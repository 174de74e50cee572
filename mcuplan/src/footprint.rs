use crate::helpe::*;

/// Time-indexed occupancy of the arena: one ordered list of used
/// byte intervals per operator column.
///
/// Invariant: within a column, blocks are sorted, disjoint and
/// non-touching after every placement.
#[derive(Debug, Clone)]
pub struct MemoryFootprint {
    pub columns: Vec<Blocks>,
}

#[inline(always)]
fn slot_len((start, end): (ByteSteps, ByteSteps)) -> ByteSteps {
    end - start
}

impl MemoryFootprint {
    pub fn new(op_num: usize) -> Self {
        Self {
            columns: vec![vec![]; op_num],
        }
    }

    /// Free slots able to host `height` bytes across all columns in
    /// `start..start + width`.
    ///
    /// Each column contributes its gaps of length >= `height`, plus the
    /// open-ended gap above its topmost block (always, whatever its
    /// nominal length). The per-column gap lists are then intersected,
    /// slots that shrank below `height` are dropped, and the survivors
    /// come back tightest-fit first (ties by ascending start).
    ///
    /// A zero-width query spans no column and yields the universal
    /// slot `(0, OPEN_END)`.
    pub fn free_slots(&self, start: OpIdx, width: usize, height: ByteSteps) -> Blocks {
        let mut total: Blocks = vec![(0, OPEN_END)];
        for col in &self.columns[start..start + width] {
            let mut current: Blocks = Vec::with_capacity(col.len() + 1);
            let mut last_end = 0;
            for &(blk_start, blk_end) in col {
                if blk_start - last_end >= height {
                    current.push((last_end, blk_start));
                }
                last_end = blk_end;
            }
            current.push((last_end, OPEN_END));
            total = inter_slots(&total, &current);
        }
        total.retain(|&slot| slot_len(slot) >= height);
        total.sort_unstable_by_key(|&slot| (slot_len(slot), slot.0));

        total
    }

    /// Marks `[addr, addr + height)` as used in every column of
    /// `start..start + width`, merging with an adjoining block that
    /// touches either end of the new interval.
    ///
    /// The target range must be free in all affected columns; placing
    /// over a used block would silently corrupt the memory map, so we
    /// assert against it.
    pub fn place(&mut self, start: OpIdx, width: usize, addr: ByteSteps, height: ByteSteps) {
        let tail_addr = addr + height;
        for col in &mut self.columns[start..start + width] {
            debug_assert!(
                col.iter().all(|&(s, e)| e <= addr || s >= tail_addr),
                "Placement over a used block"
            );
            let mut new_block = (addr, tail_addr);
            let mut new_col: Blocks = Vec::with_capacity(col.len() + 1);
            let mut tail: Blocks = Vec::with_capacity(col.len());
            for &(s, e) in col.iter() {
                if e <= addr {
                    new_col.push((s, e));
                } else if s >= tail_addr {
                    tail.push((s, e));
                }
            }
            if let Some(&(s, e)) = new_col.last() {
                if e == addr {
                    new_block.0 = s;
                    new_col.pop();
                }
            }
            if let Some(&(s, e)) = tail.first() {
                if s == tail_addr {
                    new_block.1 = e;
                    tail.remove(0);
                }
            }
            new_col.push(new_block);
            new_col.append(&mut tail);
            *col = new_col;
        }
    }

    /// The highest used address across all columns. 0 when empty.
    pub fn peak(&self) -> ByteSteps {
        self.columns
            .iter()
            .map(|col| col.last().map_or(0, |&(_, end)| end))
            .max()
            .unwrap_or(0)
    }
}

/// Intersects two sorted interval lists. A slot survives only where it
/// is covered (fully or partially) by a slot of the other list.
pub fn inter_slots(slots1: &Blocks, slots2: &Blocks) -> Blocks {
    let mut res: Blocks = vec![];
    let (mut i, mut j) = (0, 0);
    while i < slots1.len() && j < slots2.len() {
        let start = slots1[i].0.max(slots2[j].0);
        let end = slots1[i].1.min(slots2[j].1);
        if start < end {
            res.push((start, end));
        }
        if slots1[i].1 < slots2[j].1 {
            i += 1;
        } else {
            j += 1;
        }
    }

    res
}
