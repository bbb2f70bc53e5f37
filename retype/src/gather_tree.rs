// gather_tree.rs — Beam-search tree reconstruction
//
// Given per-step token ids and parent-beam pointers laid out time-major as
// `[max_time, batch, beam]`, rebuild each beam's full token sequence by
// walking its parent chain backwards from the last valid step, then pad
// everything after the first end token with the end token.
//
// Columns (one per `(batch, beam)`) are independent: each is computed into
// its own buffer and scattered into the output only after every column
// succeeded, so a failing call never writes to the output.
//
// Preconditions: none; buffer lengths are checked.
// Postconditions: for every column with a positive valid length `L`,
//   positions `[L, max_time)` hold the end token, and once the end token
//   appears in `[0, L)` every later position holds it as well. Columns with
//   `L <= 0` are left untouched.
// Failure modes: `Overflow`, `ShapeMismatch` (both checked before any
//   allocation), `InvalidParent`.
// Side effects: none.

use rayon::prelude::*;

/// Dimensions of the step/parent/output buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    pub max_time: usize,
    pub batch_size: usize,
    pub beam_width: usize,
}

impl TreeShape {
    pub fn new(max_time: usize, batch_size: usize, beam_width: usize) -> Self {
        Self {
            max_time,
            batch_size,
            beam_width,
        }
    }

    /// Element count of a `[max_time, batch, beam]` buffer, saturating at
    /// `usize::MAX`.
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    /// Element count, or `None` if it does not fit in `usize`. The column
    /// count is multiplied first so it is covered too.
    pub fn checked_len(&self) -> Option<usize> {
        self.batch_size
            .checked_mul(self.beam_width)?
            .checked_mul(self.max_time)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self, time: usize, batch: usize, beam: usize) -> usize {
        (time * self.batch_size + batch) * self.beam_width + beam
    }

    fn columns(&self) -> usize {
        self.batch_size * self.beam_width
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatherTreeError {
    #[error("{buffer} has {actual} elements, expected {expected}")]
    ShapeMismatch {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("shape {max_time} x {batch_size} x {beam_width} overflows usize")]
    Overflow {
        max_time: usize,
        batch_size: usize,
        beam_width: usize,
    },
    #[error("parent index {parent} at time {time}, batch {batch}, beam {beam} is outside [0, beam_width)")]
    InvalidParent {
        time: usize,
        batch: usize,
        beam: usize,
        parent: i32,
    },
}

fn check_len(buffer: &'static str, expected: usize, actual: usize) -> Result<(), GatherTreeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(GatherTreeError::ShapeMismatch {
            buffer,
            expected,
            actual,
        })
    }
}

fn checked_len(shape: TreeShape) -> Result<usize, GatherTreeError> {
    shape.checked_len().ok_or(GatherTreeError::Overflow {
        max_time: shape.max_time,
        batch_size: shape.batch_size,
        beam_width: shape.beam_width,
    })
}

struct Inputs<'a, T> {
    step_ids: &'a [T],
    parent_ids: &'a [i32],
    max_seq_len: &'a [i32],
    end_token: T,
    shape: TreeShape,
}

impl<'a, T: Copy + PartialEq> Inputs<'a, T> {
    fn checked(
        step_ids: &'a [T],
        parent_ids: &'a [i32],
        max_seq_len: &'a [i32],
        end_token: T,
        shape: TreeShape,
        out_len: usize,
    ) -> Result<Self, GatherTreeError> {
        let len = checked_len(shape)?;
        check_len("step_ids", len, step_ids.len())?;
        check_len("parent_ids", len, parent_ids.len())?;
        check_len("max_seq_len", shape.batch_size, max_seq_len.len())?;
        check_len("output", len, out_len)?;
        Ok(Self {
            step_ids,
            parent_ids,
            max_seq_len,
            end_token,
            shape,
        })
    }

    /// Reconstruct column `column` (= batch * beam_width + beam). `None`
    /// when the column's valid length is not positive.
    fn reconstruct_beam(&self, column: usize) -> Result<Option<Vec<T>>, GatherTreeError> {
        let shape = self.shape;
        let batch = column / shape.beam_width;
        let beam = column % shape.beam_width;
        let valid = (shape.max_time as i64).min(self.max_seq_len[batch] as i64);
        if valid <= 0 {
            return Ok(None);
        }
        let valid = valid as usize;

        // Padding tail past the valid length.
        let mut sequence = vec![self.end_token; shape.max_time];

        let mut parent = beam as i32;
        for time in (0..valid).rev() {
            if parent < 0 || parent as usize >= shape.beam_width {
                return Err(GatherTreeError::InvalidParent {
                    time,
                    batch,
                    beam,
                    parent,
                });
            }
            let at = shape.index(time, batch, parent as usize);
            sequence[time] = self.step_ids[at];
            parent = self.parent_ids[at];
        }

        let mut finished = false;
        for token in sequence.iter_mut().take(valid) {
            if finished {
                *token = self.end_token;
            } else if *token == self.end_token {
                finished = true;
            }
        }
        Ok(Some(sequence))
    }

    fn scatter(&self, columns: Vec<Option<Vec<T>>>, out: &mut [T]) {
        for (column, sequence) in columns.into_iter().enumerate() {
            let Some(sequence) = sequence else { continue };
            let batch = column / self.shape.beam_width;
            let beam = column % self.shape.beam_width;
            for (time, token) in sequence.into_iter().enumerate() {
                out[self.shape.index(time, batch, beam)] = token;
            }
        }
    }
}

/// Reconstruct into a caller-initialized buffer. Columns whose valid length
/// is not positive keep their existing contents.
pub fn gather_tree_into<T: Copy + PartialEq>(
    step_ids: &[T],
    parent_ids: &[i32],
    max_seq_len: &[i32],
    end_token: T,
    shape: TreeShape,
    out: &mut [T],
) -> Result<(), GatherTreeError> {
    let inputs = Inputs::checked(step_ids, parent_ids, max_seq_len, end_token, shape, out.len())?;
    let columns = (0..shape.columns())
        .map(|c| inputs.reconstruct_beam(c))
        .collect::<Result<Vec<_>, _>>()?;
    inputs.scatter(columns, out);
    Ok(())
}

/// Reconstruct into a new buffer initialized with `fill`.
pub fn gather_tree<T: Copy + PartialEq>(
    step_ids: &[T],
    parent_ids: &[i32],
    max_seq_len: &[i32],
    end_token: T,
    shape: TreeShape,
    fill: T,
) -> Result<Vec<T>, GatherTreeError> {
    // Validate before allocating the output.
    let len = checked_len(shape)?;
    Inputs::checked(step_ids, parent_ids, max_seq_len, end_token, shape, len)?;
    let mut out = vec![fill; len];
    gather_tree_into(step_ids, parent_ids, max_seq_len, end_token, shape, &mut out)?;
    Ok(out)
}

/// `gather_tree_into` with columns computed in parallel.
pub fn gather_tree_par<T: Copy + PartialEq + Send + Sync>(
    step_ids: &[T],
    parent_ids: &[i32],
    max_seq_len: &[i32],
    end_token: T,
    shape: TreeShape,
    out: &mut [T],
) -> Result<(), GatherTreeError> {
    let inputs = Inputs::checked(step_ids, parent_ids, max_seq_len, end_token, shape, out.len())?;
    let columns = (0..shape.columns())
        .into_par_iter()
        .map(|c| inputs.reconstruct_beam(c))
        .collect::<Result<Vec<_>, _>>()?;
    inputs.scatter(columns, out);
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_token_terminates_beam() {
        let out = gather_tree(
            &[1, 2, 4, 9, 5, 6],
            &[0, 0, 0, 1, 1, 0],
            &[3],
            9,
            TreeShape::new(3, 1, 2),
            -1,
        )
        .unwrap();
        assert_eq!(out, vec![2, 1, 9, 4, 9, 6]);
    }

    #[test]
    fn short_sequence_is_padded() {
        // Valid length 2 of 3: the last step becomes the end token.
        let out = gather_tree(&[1, 2, 3], &[0, 0, 0], &[2], 0, TreeShape::new(3, 1, 1), -1).unwrap();
        assert_eq!(out, vec![1, 2, 0]);
    }

    #[test]
    fn non_positive_length_leaves_column_untouched() {
        let out = gather_tree(
            &[1, 2, 3, 4],
            &[0, 0, 0, 0],
            &[0, 2],
            9,
            TreeShape::new(2, 2, 1),
            -1,
        )
        .unwrap();
        assert_eq!(out, vec![-1, 2, -1, 4]);
    }

    #[test]
    fn float_tokens() {
        let out = gather_tree(&[0.5f32, 1.5], &[0, 0], &[5], 1.5, TreeShape::new(2, 1, 1), 0.0).unwrap();
        assert_eq!(out, vec![0.5, 1.5]);
    }

    #[test]
    fn invalid_parent_fails_without_writing() {
        let mut out = vec![7; 4];
        let err = gather_tree_into(
            &[1, 2, 3, 4],
            &[0, 0, 5, 0],
            &[2],
            9,
            TreeShape::new(2, 1, 2),
            &mut out,
        )
        .unwrap_err();
        assert_eq!(
            err,
            GatherTreeError::InvalidParent {
                time: 0,
                batch: 0,
                beam: 0,
                parent: 5
            }
        );
        assert_eq!(out, vec![7; 4]);
    }

    #[test]
    fn shape_mismatch_is_checked_first() {
        let err = gather_tree(&[1, 2], &[0], &[1], 0, TreeShape::new(2, 1, 1), 0).unwrap_err();
        assert_eq!(
            err,
            GatherTreeError::ShapeMismatch {
                buffer: "parent_ids",
                expected: 2,
                actual: 1
            }
        );
        let err = gather_tree(&[1, 2], &[0, 0], &[1, 1], 0, TreeShape::new(2, 1, 1), 0).unwrap_err();
        assert!(matches!(err, GatherTreeError::ShapeMismatch { buffer: "max_seq_len", .. }));
    }

    #[test]
    fn overflowing_shape_is_rejected() {
        let shape = TreeShape::new(2, usize::MAX, 2);
        assert_eq!(shape.checked_len(), None);
        assert_eq!(shape.len(), usize::MAX);
        let err = gather_tree(&[1, 2], &[0, 0], &[1], 0, shape, 0).unwrap_err();
        assert_eq!(
            err,
            GatherTreeError::Overflow {
                max_time: 2,
                batch_size: usize::MAX,
                beam_width: 2
            }
        );
        let mut out = [0; 2];
        let err = gather_tree_par(&[1, 2], &[0, 0], &[1], 0, shape, &mut out).unwrap_err();
        assert!(matches!(err, GatherTreeError::Overflow { .. }));
    }

    #[test]
    fn zero_time_with_huge_columns_overflows() {
        // No elements, but the column count alone does not fit.
        let shape = TreeShape::new(0, usize::MAX, 2);
        assert_eq!(shape.checked_len(), None);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn mismatch_is_reported_before_the_output_is_allocated() {
        // 2^40 elements: allocating first would abort the process.
        let shape = TreeShape::new(1 << 20, 1 << 20, 1);
        let err = gather_tree(&[1, 2], &[0, 0], &[1], 0, shape, 0).unwrap_err();
        assert_eq!(
            err,
            GatherTreeError::ShapeMismatch {
                buffer: "step_ids",
                expected: 1 << 40,
                actual: 2
            }
        );
    }

    #[test]
    fn parallel_matches_sequential() {
        let shape = TreeShape::new(3, 1, 2);
        let step = [1, 2, 4, 9, 5, 6];
        let parent = [0, 0, 0, 1, 1, 0];
        let mut par = vec![-1; 6];
        gather_tree_par(&step, &parent, &[3], 9, shape, &mut par).unwrap();
        let seq = gather_tree(&step, &parent, &[3], 9, shape, -1).unwrap();
        assert_eq!(par, seq);
    }
}
