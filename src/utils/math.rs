/// `out += x · w` where `w` is row-major `[in_dim, out_dim]`.
pub fn vec_mat_mul_acc(x: &[f32], w: &[f32], out_dim: usize, out: &mut [f32]) {
    debug_assert_eq!(w.len(), x.len() * out_dim);
    debug_assert_eq!(out.len(), out_dim);

    for (i, &xi) in x.iter().enumerate() {
        if xi == 0.0 {
            continue;
        }
        let row = &w[i * out_dim..(i + 1) * out_dim];
        for (o, &wij) in out.iter_mut().zip(row) {
            *o += xi * wij;
        }
    }
}

/// Column block `[col_start, col_start + cols)` of `x · w`, accumulated into `out`.
/// Used by the gated recurrent layers whose kernels pack several gates side by side.
pub fn vec_mat_mul_cols_acc(
    x: &[f32],
    w: &[f32],
    total_cols: usize,
    col_start: usize,
    out: &mut [f32],
) {
    let cols = out.len();
    debug_assert!(col_start + cols <= total_cols);

    for (i, &xi) in x.iter().enumerate() {
        if xi == 0.0 {
            continue;
        }
        let row = &w[i * total_cols + col_start..i * total_cols + col_start + cols];
        for (o, &wij) in out.iter_mut().zip(row) {
            *o += xi * wij;
        }
    }
}

pub fn add_assign(out: &mut [f32], rhs: &[f32]) {
    for (o, r) in out.iter_mut().zip(rhs) {
        *o += r;
    }
}

pub fn round_up(value: usize, multiple: usize) -> usize {
    if multiple == 0 {
        return value;
    }
    value.div_ceil(multiple) * multiple
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_mat_mul_matches_manual() {
        // x = [1, 2], w = [[1, 2, 3], [4, 5, 6]]
        let mut out = vec![0.0; 3];
        vec_mat_mul_acc(&[1.0, 2.0], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, &mut out);
        assert_eq!(out, vec![9.0, 12.0, 15.0]);
    }

    #[test]
    fn column_block_selects_gate() {
        let mut out = vec![0.0; 1];
        vec_mat_mul_cols_acc(&[1.0, 2.0], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2, &mut out);
        assert_eq!(out, vec![15.0]);
    }

    #[test]
    fn round_up_to_texel() {
        assert_eq!(round_up(5, 4), 8);
        assert_eq!(round_up(8, 4), 8);
        assert_eq!(round_up(0, 4), 0);
    }
}
