//! Constrained least-squares fits of interpolation weights.
//!
//! For node `i` with parents `P`, the local error of weights `w` is
//! `E(w) = v^T G v` with `v = e_i - sum_j w_j e_j`, where `G` is a local
//! Green's function (the inverse of a patch operator). The weights must
//! reproduce the test vector exactly: `sum_j w_j t_j = t_i`. With one parent
//! the constraint fixes `w`; with two the minimum lies on a line and is found
//! in closed form.

use crate::error::Result;

/// Relative size below which test-vector entries and curvatures count as
/// zero.
pub(crate) const FIT_EPS: f64 = 1e-12;

/// Symmetric local Green's function restricted to a few global nodes.
pub(crate) trait Green {
    /// `G(a, b)` for global node ids `a`, `b`.
    fn g(&self, a: usize, b: usize) -> Result<f64>;
}

/// Single parent `j`: `w = t_i / t_j`.
///
/// `Ok(None)` when the test vector vanishes at `j`; errors only come from
/// the Green's function lookup.
pub(crate) fn fit_one(green: &impl Green, t: &[f64], i: usize, j: usize) -> Result<Option<([f64; 1], f64)>> {
    let (ti, tj) = (t[i], t[j]);
    if tj == 0.0 || tj.abs() < FIT_EPS * ti.abs() {
        return Ok(None);
    }
    let w = ti / tj;
    let e = green.g(i, i)? - 2.0 * w * green.g(i, j)? + w * w * green.g(j, j)?;
    Ok(Some(([w], e.max(0.0))))
}

/// Two parents `j`, `k`: minimise `E` on the constraint line
/// `w = w0 + s n`, `w0 = t_i c / |c|^2`, `n = (t_k, -t_j) / |c|`.
pub(crate) fn fit_two(
    green: &impl Green,
    t: &[f64],
    i: usize,
    j: usize,
    k: usize,
) -> Result<Option<([f64; 2], f64)>> {
    let (ti, tj, tk) = (t[i], t[j], t[k]);
    let cc = tj * tj + tk * tk;
    if cc == 0.0 || cc < FIT_EPS * FIT_EPS * ti * ti {
        return Ok(None);
    }
    let norm = cc.sqrt();
    let w0 = [ti * tj / cc, ti * tk / cc];
    let n = [tk / norm, -tj / norm];

    let h = [[green.g(j, j)?, green.g(j, k)?], [green.g(k, j)?, green.g(k, k)?]];
    let g = [green.g(i, j)?, green.g(i, k)?];
    let hn = [h[0][0] * n[0] + h[0][1] * n[1], h[1][0] * n[0] + h[1][1] * n[1]];
    let curvature = n[0] * hn[0] + n[1] * hn[1];
    if curvature <= FIT_EPS * (h[0][0].abs() + h[1][1].abs()) {
        return Ok(None);
    }
    let resid = [
        h[0][0] * w0[0] + h[0][1] * w0[1] - g[0],
        h[1][0] * w0[0] + h[1][1] * w0[1] - g[1],
    ];
    let s = -(n[0] * resid[0] + n[1] * resid[1]) / curvature;
    let w = [w0[0] + s * n[0], w0[1] + s * n[1]];

    let hw = [h[0][0] * w[0] + h[0][1] * w[1], h[1][0] * w[0] + h[1][1] * w[1]];
    let e = green.g(i, i)? - 2.0 * (g[0] * w[0] + g[1] * w[1]) + w[0] * hw[0] + w[1] * hw[1];
    Ok(Some((w, e.max(0.0))))
}

/// Weights from the matrix row alone: `w_j = a_ij t_i / sum_{k in P} a_ik t_k`.
/// Returns `None` if the denominator vanishes.
pub(crate) fn fit_row(a_ip: &[f64], t_p: &[f64], ti: f64, out: &mut [f64]) -> Option<()> {
    let denom: f64 = a_ip.iter().zip(t_p).map(|(a, t)| a * t).sum();
    let scale: f64 = a_ip.iter().zip(t_p).map(|(a, t)| (a * t).abs()).sum();
    if scale == 0.0 || denom.abs() <= FIT_EPS * scale {
        return None;
    }
    for (w, &a) in out.iter_mut().zip(a_ip) {
        *w = a * ti / denom;
    }
    Some(())
}
