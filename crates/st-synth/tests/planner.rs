// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)

use st_synth::{plan_shapes, SynthError};

#[test]
fn identical_resolutions_keep_the_label_shape() {
    let plan = plan_shapes(&[16, 16, 16], None, &[1.0; 3], &[1.0; 3], None, None).unwrap();
    assert_eq!(plan.crop_shape, vec![16, 16, 16]);
    assert_eq!(plan.output_shape, vec![16, 16, 16]);
    assert_eq!(plan.padding_margin, None);
    assert_eq!(plan.resample_factor, None);
    assert!(!plan.needs_crop());
    assert!(!plan.needs_resample());
}

#[test]
fn requested_output_is_clamped_to_the_upsampled_labels() {
    let plan = plan_shapes(
        &[16, 16, 16],
        Some(&[40, 40, 40]),
        &[1.0; 3],
        &[0.5; 3],
        None,
        Some(8),
    )
    .unwrap();
    assert_eq!(plan.output_shape, vec![32, 32, 32]);
    assert_eq!(plan.crop_shape, vec![16, 16, 16]);
}

#[test]
fn planning_is_deterministic() {
    let args = (
        [30usize, 21, 17],
        [24usize, 24, 24],
        [1.0f64, 1.0, 1.0],
        [1.5f64, 1.0, 0.7],
        [3usize, 2, 1],
    );
    let first = plan_shapes(&args.0, Some(&args.1), &args.2, &args.3, Some(&args.4), Some(4)).unwrap();
    let second = plan_shapes(&args.0, Some(&args.1), &args.2, &args.3, Some(&args.4), Some(4)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn divisibility_and_clamp_hold_over_a_grid() {
    let resolutions = [[1.0f64, 1.0], [2.0, 1.0], [0.5, 0.75], [1.3, 0.6]];
    for labels in [[17usize, 32], [40, 9], [64, 64]] {
        for target in resolutions {
            for divisor in [None, Some(2usize), Some(4), Some(8)] {
                for requested in [None, Some([24usize, 24]), Some([200, 3])] {
                    let result = plan_shapes(
                        &labels,
                        requested.as_ref().map(|r| &r[..]),
                        &[1.0, 1.0],
                        &target,
                        None,
                        divisor,
                    );
                    let plan = match result {
                        Ok(plan) => plan,
                        // A divisor larger than a clamped axis empties it.
                        Err(SynthError::InvalidValue { .. }) => continue,
                        Err(other) => panic!("unexpected error: {other}"),
                    };
                    if let Some(k) = divisor {
                        assert!(plan.output_shape.iter().all(|&d| d % k == 0), "{plan:?}");
                    }
                    if requested.is_some() {
                        for axis in 0..2 {
                            let factor = 1.0 / target[axis];
                            let limit = (labels[axis] as f64 * factor) as usize;
                            assert!(plan.output_shape[axis] <= limit, "{plan:?}");
                        }
                    }
                    if target == [1.0, 1.0] && requested.is_none() && divisor.is_none() {
                        assert_eq!(plan.crop_shape, plan.output_shape);
                    }
                }
            }
        }
    }
}

#[test]
fn padding_grows_the_working_shape() {
    let plan = plan_shapes(&[10, 12], None, &[1.0, 1.0], &[1.0, 1.0], Some(&[2, 3]), None).unwrap();
    assert_eq!(plan.padded_shape, vec![14, 18]);
    assert_eq!(plan.crop_shape, vec![14, 18]);
    assert_eq!(plan.padding_margin, Some(vec![2, 3]));
}

#[test]
fn mismatched_ranks_are_rejected() {
    let err = plan_shapes(&[10, 12], None, &[1.0, 1.0, 1.0], &[1.0, 1.0, 1.0], None, None)
        .unwrap_err();
    assert!(matches!(err, SynthError::DimensionMismatch { .. }));
}
