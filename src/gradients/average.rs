use log::debug;
use ndarray::{ArrayD, Axis};

use super::{GradErr, GradKind, GradVar, Gradient, Result, SparseGrad};

/// Combines the gradients computed by every tower into a single gradient per parameter.
///
/// Dense gradients are averaged. Sparse gradients have their indices and values
/// concatenated in tower order without any division, repeated indices are left
/// for the consumer to add up when the gradient is applied. The parameter handle
/// of each pair is taken from the first tower, since every tower shares the same
/// underlying parameters.
///
/// # Arguments
/// * `towers` - One list of gradient/variable pairs per tower, all aligned by parameter.
///
/// # Returns
/// The combined gradient/variable pairs, or a `GradErr` if the towers weren't built
/// consistently.
pub fn average_grads<V>(towers: Vec<Vec<GradVar<V>>>) -> Result<Vec<GradVar<V>>> {
    let ntowers = towers.len();
    let Some(params) = towers.first().map(Vec::len) else {
        return Err(GradErr::NoTowers);
    };

    if let Some((tower, pairs)) = towers
        .iter()
        .enumerate()
        .find(|(_, pairs)| pairs.len() != params)
    {
        return Err(GradErr::TowerLengthMismatch {
            tower,
            got: pairs.len(),
            expected: params,
        });
    }

    debug!(towers = ntowers, params = params; "averaging tower gradients");

    let mut towers: Vec<_> = towers.into_iter().map(Vec::into_iter).collect();
    let mut averaged = Vec::with_capacity(params);

    for param in 0..params {
        let mut column = towers.iter_mut().filter_map(|pairs| pairs.next());

        let Some((first, var)) = column.next() else {
            break;
        };

        let rest = column.map(|(grad, _)| grad);
        let grad = reduce(param, ntowers, first, rest)?;
        averaged.push((grad, var));
    }

    Ok(averaged)
}

/// Reduces the gradients of every tower for a single parameter.
fn reduce<I>(param: usize, ntowers: usize, first: Gradient, rest: I) -> Result<Gradient>
where
    I: Iterator<Item = Gradient>,
{
    let rest = rest.enumerate().map(|(i, grad)| (i + 1, grad));

    match first {
        Gradient::Absent => {
            for (tower, grad) in rest {
                if grad.is_present() {
                    return Err(structural(param, tower, grad.kind(), GradKind::Absent));
                }
            }

            Ok(Gradient::Absent)
        }
        Gradient::Dense(grad) => average_dense(param, ntowers, grad, rest).map(Gradient::Dense),
        Gradient::Sparse(grad) => concat_sparse(param, grad, rest).map(Gradient::Sparse),
    }
}

fn average_dense<I>(param: usize, ntowers: usize, mut acc: ArrayD<f32>, rest: I) -> Result<ArrayD<f32>>
where
    I: Iterator<Item = (usize, Gradient)>,
{
    for (tower, grad) in rest {
        let grad = match grad {
            Gradient::Dense(grad) => grad,
            other => return Err(structural(param, tower, other.kind(), GradKind::Dense)),
        };

        if grad.shape() != acc.shape() {
            return Err(GradErr::ShapeMismatch {
                param,
                tower,
                got: grad.shape().to_vec(),
                expected: acc.shape().to_vec(),
            });
        }

        acc += &grad;
    }

    // A single tower's gradient is returned as is.
    if ntowers > 1 {
        acc /= ntowers as f32;
    }

    Ok(acc)
}

fn concat_sparse<I>(param: usize, first: SparseGrad, rest: I) -> Result<SparseGrad>
where
    I: Iterator<Item = (usize, Gradient)>,
{
    let mut parts = vec![first];

    for (tower, grad) in rest {
        let grad = match grad {
            Gradient::Sparse(grad) => grad,
            other => return Err(structural(param, tower, other.kind(), GradKind::Sparse)),
        };

        if grad.dense_shape() != parts[0].dense_shape() {
            return Err(GradErr::ShapeMismatch {
                param,
                tower,
                got: grad.dense_shape().to_vec(),
                expected: parts[0].dense_shape().to_vec(),
            });
        }

        parts.push(grad);
    }

    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }

    let indices = parts
        .iter()
        .flat_map(|part| part.indices().iter().copied())
        .collect();

    let views: Vec<_> = parts.iter().map(|part| part.values().view()).collect();
    let values = ndarray::concatenate(Axis(0), &views).map_err(|e| GradErr::InvalidSparse {
        reason: e.to_string(),
    })?;

    let dense_shape = parts[0].dense_shape().to_vec();
    Ok(SparseGrad::from_parts(values, indices, dense_shape))
}

fn structural(param: usize, tower: usize, got: GradKind, expected: GradKind) -> GradErr {
    GradErr::StructuralMismatch {
        param,
        tower,
        got,
        expected,
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{IxDyn, arr1, arr2};
    use ndarray_rand::{RandomExt, rand_distr::StandardNormal};

    use super::*;

    fn dense(values: &[f32]) -> Gradient {
        Gradient::Dense(arr1(values).into_dyn())
    }

    fn sparse(values: &[[f32; 2]], indices: &[usize], rows: usize) -> Gradient {
        let values = arr2(values).into_dyn();
        SparseGrad::new(values, indices.to_vec(), vec![rows, 2])
            .unwrap()
            .into()
    }

    #[test]
    fn test_two_towers_dense_average() {
        let towers = vec![vec![(dense(&[1.0, 2.0]), "a")], vec![(dense(&[3.0, 4.0]), "a")]];

        let averaged = average_grads(towers).unwrap();
        assert_eq!(averaged, vec![(dense(&[2.0, 3.0]), "a")]);
    }

    #[test]
    fn test_homogeneous_towers_are_idempotent() {
        let grad = ArrayD::<f32>::random(IxDyn(&[3, 4]), StandardNormal);

        for ntowers in 1..=5 {
            let towers = (0..ntowers)
                .map(|_| vec![(Gradient::Dense(grad.clone()), 0)])
                .collect();

            let averaged = average_grads(towers).unwrap();
            let Gradient::Dense(got) = &averaged[0].0 else {
                panic!("expected a dense gradient");
            };

            assert_eq!(got.shape(), grad.shape());
            got.iter()
                .zip(grad.iter())
                .for_each(|(g, e)| assert!((g - e).abs() <= 1e-5, "{g} != {e}"));
        }
    }

    #[test]
    fn test_single_tower_is_unchanged() {
        let dense_grad = dense(&[0.1, 0.2, 0.3]);
        let sparse_grad = sparse(&[[1.0, 2.0], [3.0, 4.0]], &[2, 2], 4);
        let towers = vec![vec![
            (dense_grad.clone(), 0),
            (sparse_grad.clone(), 1),
            (Gradient::Absent, 2),
        ]];

        let averaged = average_grads(towers).unwrap();
        assert_eq!(
            averaged,
            vec![(dense_grad, 0), (sparse_grad, 1), (Gradient::Absent, 2)]
        );
    }

    #[test]
    fn test_sparse_towers_are_concatenated() {
        let towers = vec![
            vec![(sparse(&[[1.0, 1.0], [2.0, 2.0]], &[0, 3], 5), "emb")],
            vec![(sparse(&[[3.0, 3.0]], &[1], 5), "emb")],
            vec![(sparse(&[[4.0, 4.0]], &[3], 5), "emb")],
        ];

        let averaged = average_grads(towers).unwrap();
        let Gradient::Sparse(grad) = &averaged[0].0 else {
            panic!("expected a sparse gradient");
        };

        assert_eq!(grad.indices(), &[0, 3, 1, 3]);
        assert_eq!(
            grad.values(),
            &arr2(&[[1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]]).into_dyn()
        );
        assert_eq!(grad.dense_shape(), &[5, 2]);

        // Repeated indices are not averaged, they add up once applied.
        let dense = grad.to_dense();
        assert_eq!(dense.index_axis(Axis(0), 3), arr1(&[6.0, 6.0]).into_dyn());
    }

    #[test]
    fn test_two_sparse_towers_with_disjoint_indices() {
        let towers = vec![
            vec![(sparse(&[[1.0, 2.0], [3.0, 4.0]], &[0, 2], 5), "emb")],
            vec![(sparse(&[[5.0, 6.0], [7.0, 8.0]], &[1, 4], 5), "emb")],
        ];

        let averaged = average_grads(towers).unwrap();
        let expected = sparse(
            &[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]],
            &[0, 2, 1, 4],
            5,
        );
        assert_eq!(averaged, vec![(expected, "emb")]);
    }

    #[test]
    fn test_absent_everywhere_stays_absent() {
        let towers = vec![
            vec![(Gradient::Absent, 'w'), (dense(&[2.0]), 'b')],
            vec![(Gradient::Absent, 'w'), (dense(&[4.0]), 'b')],
        ];

        let averaged = average_grads(towers).unwrap();
        assert_eq!(averaged, vec![(Gradient::Absent, 'w'), (dense(&[3.0]), 'b')]);
    }

    #[test]
    fn test_variable_is_taken_from_first_tower() {
        let towers = vec![
            vec![(dense(&[1.0]), "tower-0")],
            vec![(dense(&[1.0]), "tower-1")],
        ];

        let averaged = average_grads(towers).unwrap();
        assert_eq!(averaged[0].1, "tower-0");
    }

    #[test]
    fn test_dense_shape_mismatch() {
        let towers = vec![
            vec![(dense(&[1.0, 2.0]), ()), (dense(&[1.0]), ())],
            vec![(dense(&[1.0, 2.0]), ()), (dense(&[1.0, 2.0]), ())],
        ];

        let err = average_grads(towers).unwrap_err();
        assert_eq!(
            err,
            GradErr::ShapeMismatch {
                param: 1,
                tower: 1,
                got: vec![2],
                expected: vec![1],
            }
        );
    }

    #[test]
    fn test_sparse_dense_shape_mismatch() {
        let towers = vec![
            vec![(sparse(&[[1.0, 1.0]], &[0], 5), ())],
            vec![(sparse(&[[1.0, 1.0]], &[0], 6), ())],
        ];

        let err = average_grads(towers).unwrap_err();
        assert!(matches!(err, GradErr::ShapeMismatch { param: 0, tower: 1, .. }));
    }

    #[test]
    fn test_absent_and_present_mismatch() {
        let towers = vec![
            vec![(Gradient::Absent, ())],
            vec![(Gradient::Absent, ())],
            vec![(dense(&[1.0]), ())],
        ];

        let err = average_grads(towers).unwrap_err();
        assert_eq!(
            err,
            GradErr::StructuralMismatch {
                param: 0,
                tower: 2,
                got: GradKind::Dense,
                expected: GradKind::Absent,
            }
        );

        let towers = vec![vec![(dense(&[1.0]), ())], vec![(Gradient::Absent, ())]];

        let err = average_grads(towers).unwrap_err();
        assert!(matches!(
            err,
            GradErr::StructuralMismatch {
                got: GradKind::Absent,
                expected: GradKind::Dense,
                ..
            }
        ));
    }

    #[test]
    fn test_dense_and_sparse_mismatch() {
        let towers = vec![
            vec![(sparse(&[[1.0, 1.0]], &[0], 5), ())],
            vec![(Gradient::Dense(ArrayD::zeros(IxDyn(&[5, 2]))), ())],
        ];

        let err = average_grads(towers).unwrap_err();
        assert!(matches!(
            err,
            GradErr::StructuralMismatch {
                got: GradKind::Dense,
                expected: GradKind::Sparse,
                ..
            }
        ));
    }

    #[test]
    fn test_tower_length_mismatch() {
        let towers = vec![
            vec![(dense(&[1.0]), ()), (dense(&[1.0]), ())],
            vec![(dense(&[1.0]), ())],
        ];

        let err = average_grads(towers).unwrap_err();
        assert_eq!(
            err,
            GradErr::TowerLengthMismatch {
                tower: 1,
                got: 1,
                expected: 2,
            }
        );
    }

    #[test]
    fn test_no_towers() {
        let towers: Vec<Vec<GradVar<()>>> = Vec::new();
        assert_eq!(average_grads(towers).unwrap_err(), GradErr::NoTowers);
    }

    #[test]
    fn test_no_parameters() {
        let towers: Vec<Vec<GradVar<()>>> = vec![Vec::new(), Vec::new()];
        assert!(average_grads(towers).unwrap().is_empty());
    }
}
