//! Small 2-D raster helpers shared by the mask builder and the color
//! harmonizer: binary dilation, separable Gaussian blur, and contrast
//! normalization over `ndarray` grids.

use ndarray::Array2;

/// Dilate a binary grid (values are 0.0 or 1.0) with a 3x3 structuring
/// element, repeated `iterations` times.
pub fn dilate(mask: &Array2<f32>, iterations: usize) -> Array2<f32> {
    let (h, w) = mask.dim();
    let mut current = mask.clone();

    for _ in 0..iterations {
        let mut next = Array2::<f32>::zeros((h, w));
        for y in 0..h {
            for x in 0..w {
                let y0 = y.saturating_sub(1);
                let y1 = (y + 2).min(h);
                let x0 = x.saturating_sub(1);
                let x1 = (x + 2).min(w);
                let mut hit = false;
                'probe: for ny in y0..y1 {
                    for nx in x0..x1 {
                        if current[[ny, nx]] > 0.5 {
                            hit = true;
                            break 'probe;
                        }
                    }
                }
                if hit {
                    next[[y, x]] = 1.0;
                }
            }
        }
        current = next;
    }

    current
}

/// Build a normalized 1-D Gaussian kernel for the given sigma.
fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil().max(1.0) as usize;
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    let denom = 2.0 * sigma * sigma;
    for i in 0..(2 * radius + 1) {
        let d = i as f32 - radius as f32;
        kernel.push((-d * d / denom).exp());
    }
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian blur with edge clamping.
pub fn gaussian_blur(grid: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 {
        return grid.clone();
    }

    let kernel = gaussian_kernel(sigma);
    let radius = kernel.len() / 2;
    let (h, w) = grid.dim();

    // Horizontal pass
    let mut tmp = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - radius as isize).clamp(0, w as isize - 1);
                acc += grid[[y, sx as usize]] * weight;
            }
            tmp[[y, x]] = acc;
        }
    }

    // Vertical pass
    let mut out = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - radius as isize).clamp(0, h as isize - 1);
                acc += tmp[[sy as usize, x]] * weight;
            }
            out[[y, x]] = acc;
        }
    }

    out
}

/// Stretch a grid to span [0,1]. Grids with no dynamic range come back as
/// all zeros.
pub fn normalize_to_unit(grid: &Array2<f32>) -> Array2<f32> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in grid.iter() {
        min = min.min(v);
        max = max.max(v);
    }
    if !min.is_finite() || !max.is_finite() || max - min <= f32::EPSILON {
        return Array2::zeros(grid.dim());
    }
    grid.mapv(|v| (v - min) / (max - min))
}

/// Arithmetic mean of a slice.
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}
