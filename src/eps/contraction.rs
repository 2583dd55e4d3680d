//! Contraction of a single EPS core against a feature map

use ndarray::linalg::general_mat_mul;
use ndarray::{s, stack, Array2, Array3, Array4, ArrayView3, ArrayView4, Axis, ShapeError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{DctnError, Result};

/// How a core's kernel is placed over the feature map
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tiling {
    /// Every kernel-sized window, stride 1 (output extent `n - k + 1`)
    #[default]
    Sliding,
    /// Disjoint kernel-sized patches, stride `k` (output extent `n / k`)
    NonOverlapping,
}

impl Tiling {
    /// Step between consecutive patches for a kernel of size `kernel`
    pub fn stride(self, kernel: usize) -> usize {
        match self {
            Tiling::Sliding => 1,
            Tiling::NonOverlapping => kernel,
        }
    }
}

/// Dimensions of a validated core
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreShape {
    /// Side of the square kernel
    pub kernel: usize,
    /// Channels consumed from the feature map
    pub in_channels: usize,
    /// Channels produced per patch
    pub out_channels: usize,
}

impl CoreShape {
    /// Read the shape of `core`, rejecting non-square or empty kernels
    pub fn of(core: &ArrayView4<'_, f32>) -> Result<Self> {
        let (rows, cols, in_channels, out_channels) = core.dim();
        if rows != cols {
            return Err(DctnError::InvalidSpec(format!(
                "core kernel must be square, got {}x{}",
                rows, cols
            )));
        }
        if rows == 0 || in_channels == 0 || out_channels == 0 {
            return Err(DctnError::InvalidSpec(format!(
                "core has an empty dimension: {:?}",
                core.dim()
            )));
        }
        Ok(CoreShape {
            kernel: rows,
            in_channels,
            out_channels,
        })
    }
}

/// Shape of the core seen as a matrix from patch values to output channels,
/// returned as `(out_channels, kernel * kernel * in_channels)`.
pub fn matrix_shape(core: &ArrayView4<'_, f32>) -> Result<(usize, usize)> {
    let shape = CoreShape::of(core)?;
    Ok((
        shape.out_channels,
        shape.kernel * shape.kernel * shape.in_channels,
    ))
}

/// Extent of one spatial axis after contracting with a kernel of size `kernel`
pub fn output_extent(extent: usize, kernel: usize, tiling: Tiling) -> Result<usize> {
    if kernel == 0 {
        return Err(DctnError::InvalidSpec(
            "kernel size must be positive".to_string(),
        ));
    }
    if kernel > extent {
        return Err(DctnError::KernelTooLarge { extent, kernel });
    }
    match tiling {
        Tiling::Sliding => Ok(extent - kernel + 1),
        Tiling::NonOverlapping if extent % kernel != 0 => {
            Err(DctnError::NotDivisible { extent, kernel })
        }
        Tiling::NonOverlapping => Ok(extent / kernel),
    }
}

/// Contract `core` against every patch of `input`.
///
/// `input` is `(batch, height, width, channels)` and `core` is
/// `(k, k, channels, out_channels)`. Each output element is
/// `sum_{u,v,c} input[b, i*s + u, j*s + v, c] * core[u, v, c, o]`
/// where `s` is the tiling stride. All dimensions are checked before any
/// arithmetic happens.
pub fn contract(
    core: ArrayView4<'_, f32>,
    input: ArrayView4<'_, f32>,
    tiling: Tiling,
) -> Result<Array4<f32>> {
    let shape = CoreShape::of(&core)?;
    let (batch, height, width, channels) = input.dim();
    if channels != shape.in_channels {
        return Err(DctnError::ChannelMismatch {
            expected: shape.in_channels,
            found: channels,
        });
    }
    let out_height = output_extent(height, shape.kernel, tiling)?;
    let out_width = output_extent(width, shape.kernel, tiling)?;

    if batch == 0 {
        return Ok(Array4::zeros((0, out_height, out_width, shape.out_channels)));
    }

    // Images are independent; each one sums its kernel offsets in a fixed
    // order so results do not depend on thread scheduling.
    let images = (0..batch)
        .into_par_iter()
        .map(|b| {
            contract_image(
                core,
                input.slice(s![b, .., .., ..]),
                tiling.stride(shape.kernel),
                (out_height, out_width),
                shape,
            )
        })
        .collect::<std::result::Result<Vec<Array3<f32>>, ShapeError>>()?;
    let views: Vec<_> = images.iter().map(|image| image.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

fn contract_image(
    core: ArrayView4<'_, f32>,
    image: ArrayView3<'_, f32>,
    stride: usize,
    (out_height, out_width): (usize, usize),
    shape: CoreShape,
) -> std::result::Result<Array3<f32>, ShapeError> {
    let step = stride as isize;
    let rows = out_height * out_width;
    let mut acc = Array2::<f32>::zeros((rows, shape.out_channels));
    for u in 0..shape.kernel {
        for v in 0..shape.kernel {
            let patch = image.slice(s![
                u..u + stride * (out_height - 1) + 1;step,
                v..v + stride * (out_width - 1) + 1;step,
                ..
            ]);
            let patch = patch.to_shape((rows, shape.in_channels))?;
            general_mat_mul(1.0, &patch, &core.slice(s![u, v, .., ..]), 1.0, &mut acc);
        }
    }
    acc.into_shape_with_order((out_height, out_width, shape.out_channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;
    use proptest::prelude::*;

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        let len = shape.0 * shape.1 * shape.2 * shape.3;
        Array::from_iter((0..len).map(|x| (x % 7) as f32 - 3.0))
            .into_shape_with_order(shape)
            .unwrap()
    }

    #[test]
    fn test_output_extent() {
        assert_eq!(output_extent(28, 4, Tiling::Sliding).unwrap(), 25);
        assert_eq!(output_extent(28, 4, Tiling::NonOverlapping).unwrap(), 7);
        assert!(matches!(
            output_extent(7, 3, Tiling::NonOverlapping),
            Err(DctnError::NotDivisible { extent: 7, kernel: 3 })
        ));
        assert!(matches!(
            output_extent(2, 3, Tiling::Sliding),
            Err(DctnError::KernelTooLarge { .. })
        ));
        assert!(output_extent(5, 0, Tiling::Sliding).is_err());
    }

    #[test]
    fn test_non_overlapping_shape() {
        let input = ramp((3, 8, 12, 2));
        let core = ramp((4, 4, 2, 5));
        let out = contract(core.view(), input.view(), Tiling::NonOverlapping).unwrap();
        assert_eq!(out.dim(), (3, 2, 3, 5));
    }

    #[test]
    fn test_sliding_shape() {
        let input = ramp((2, 28, 28, 2));
        let core = ramp((4, 4, 2, 6));
        let out = contract(core.view(), input.view(), Tiling::Sliding).unwrap();
        assert_eq!(out.dim(), (2, 25, 25, 6));
    }

    #[test]
    fn test_non_divisible_fails() {
        let input = ramp((1, 7, 7, 2));
        let core = ramp((3, 3, 2, 1));
        let err = contract(core.view(), input.view(), Tiling::NonOverlapping).unwrap_err();
        assert!(matches!(err, DctnError::NotDivisible { extent: 7, kernel: 3 }));
    }

    #[test]
    fn test_channel_mismatch_fails() {
        let input = ramp((1, 4, 4, 3));
        let core = ramp((2, 2, 2, 1));
        let err = contract(core.view(), input.view(), Tiling::Sliding).unwrap_err();
        assert!(matches!(err, DctnError::ChannelMismatch { expected: 2, found: 3 }));
    }

    #[test]
    fn test_non_square_core_rejected() {
        let input = ramp((1, 4, 4, 2));
        let core = ramp((2, 3, 2, 1));
        assert!(matches!(
            contract(core.view(), input.view(), Tiling::Sliding),
            Err(DctnError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_matches_direct_sum() {
        let input = ramp((2, 6, 6, 2));
        let core = ramp((3, 3, 2, 4)).mapv(|x| x * 0.5);
        for tiling in [Tiling::Sliding, Tiling::NonOverlapping] {
            let out = contract(core.view(), input.view(), tiling).unwrap();
            let stride = tiling.stride(3);
            let (b, h, w, o) = out.dim();
            for bi in 0..b {
                for i in 0..h {
                    for j in 0..w {
                        for oi in 0..o {
                            let mut expected = 0.0f32;
                            for u in 0..3 {
                                for v in 0..3 {
                                    for c in 0..2 {
                                        expected += input[[bi, i * stride + u, j * stride + v, c]]
                                            * core[[u, v, c, oi]];
                                    }
                                }
                            }
                            assert!((out[[bi, i, j, oi]] - expected).abs() < 1e-4);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_matrix_shape() {
        let core = ramp((3, 3, 6, 4));
        assert_eq!(matrix_shape(&core.view()).unwrap(), (4, 54));
    }

    proptest! {
        #[test]
        fn prop_non_overlapping_divides_extent(
            batch in 1usize..3,
            kernel in 1usize..4,
            h_blocks in 1usize..4,
            w_blocks in 1usize..4,
            channels in 1usize..3,
            out_channels in 1usize..4,
        ) {
            let input = Array4::<f32>::ones((batch, kernel * h_blocks, kernel * w_blocks, channels));
            let core = Array4::<f32>::ones((kernel, kernel, channels, out_channels));
            let out = contract(core.view(), input.view(), Tiling::NonOverlapping).unwrap();
            prop_assert_eq!(out.dim(), (batch, h_blocks, w_blocks, out_channels));
            let expected = (kernel * kernel * channels) as f32;
            prop_assert!(out.iter().all(|&x| (x - expected).abs() < 1e-4));
        }

        #[test]
        fn prop_non_overlapping_rejects_remainder(
            kernel in 2usize..5,
            blocks in 1usize..4,
            remainder in 1usize..2,
        ) {
            let extent = kernel * blocks + remainder;
            let input = Array4::<f32>::ones((1, extent, kernel * blocks, 2));
            let core = Array4::<f32>::ones((kernel, kernel, 2, 1));
            prop_assert!(contract(core.view(), input.view(), Tiling::NonOverlapping).is_err());
        }
    }
}
