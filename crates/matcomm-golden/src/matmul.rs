//! Reference matmul in f32 accumulation.

/// `C[b] = A[b] × B[b]` over `batch` leading matrices, all row-major f32.
///
/// Accumulation stays in f32 no matter what storage dtype the operands came
/// from; callers decode to f32 first and cast the final pipeline output
/// exactly once.
pub fn matmul_f32(a: &[f32], b: &[f32], batch: usize, m: usize, k: usize, n: usize) -> Vec<f32> {
    debug_assert_eq!(a.len(), batch * m * k);
    debug_assert_eq!(b.len(), batch * k * n);

    let mut out = vec![0.0f32; batch * m * n];
    for bi in 0..batch {
        let a_base = bi * m * k;
        let b_base = bi * k * n;
        let c_base = bi * m * n;
        for row in 0..m {
            for inner in 0..k {
                let lhs = a[a_base + row * k + inner];
                let b_row = b_base + inner * n;
                let c_row = c_base + row * n;
                for col in 0..n {
                    out[c_row + col] += lhs * b[b_row + col];
                }
            }
        }
    }
    out
}
