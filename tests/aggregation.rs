use ndarray::{Array1, ArrayD, Axis, arr1, arr2};

use tower_utils::{
    GpuAssignment, GradErr, Gradient, NodeDef, Placement, SparseGrad, VarStore, average_grads,
};

const LR: f32 = 0.5;

/// Builds the gradients a tower would report for a `[embedding, bias]` model.
fn tower_grads(rows: &[usize], bias: [f32; 2]) -> Vec<(Gradient, String)> {
    let values = ArrayD::from_elem(vec![rows.len(), 2], 1.0);
    let emb = SparseGrad::new(values, rows.to_vec(), vec![4, 2]).unwrap();

    vec![
        (Gradient::Sparse(emb), "model/emb".to_string()),
        (Gradient::Dense(arr1(&bias).into_dyn()), "model/bias".to_string()),
        (Gradient::Absent, "model/frozen".to_string()),
    ]
}

fn apply(store: &mut VarStore, name: &str, grad: &Gradient) {
    let var = store.get_mut(name).unwrap();

    match grad {
        Gradient::Absent => {}
        Gradient::Dense(grad) => var.scaled_add(-LR, grad),
        Gradient::Sparse(grad) => {
            let grad = grad.coalesce();
            for (row, &idx) in grad.values().outer_iter().zip(grad.indices()) {
                var.index_axis_mut(Axis(0), idx).scaled_add(-LR, &row);
            }
        }
    }
}

#[test]
fn two_dense_towers_are_averaged() {
    let towers = vec![
        vec![(Gradient::Dense(arr1(&[1.0, 2.0]).into_dyn()), 'A')],
        vec![(Gradient::Dense(arr1(&[3.0, 4.0]).into_dyn()), 'A')],
    ];

    let averaged = average_grads(towers).unwrap();
    assert_eq!(
        averaged,
        vec![(Gradient::Dense(arr1(&[2.0, 3.0]).into_dyn()), 'A')]
    );
}

#[test]
fn training_step_across_towers() {
    let mut store = VarStore::new();
    store.insert("model/emb", ArrayD::zeros(vec![4, 2]), true);
    store.insert("model/bias", Array1::<f32>::zeros(2).into_dyn(), true);
    store.insert("model/frozen", Array1::<f32>::ones(3).into_dyn(), true);

    let towers = vec![
        tower_grads(&[0, 2], [1.0, 3.0]),
        tower_grads(&[2], [3.0, 5.0]),
    ];

    let averaged = average_grads(towers).unwrap();
    assert_eq!(averaged.len(), 3);

    for (grad, name) in &averaged {
        apply(&mut store, name, grad);
    }

    // The shared embedding row 2 got a gradient from both towers.
    assert_eq!(
        store.get("model/emb").unwrap(),
        &arr2(&[[-0.5, -0.5], [0.0, 0.0], [-1.0, -1.0], [0.0, 0.0]]).into_dyn()
    );
    assert_eq!(
        store.get("model/bias").unwrap(),
        &arr1(&[-1.0, -2.0]).into_dyn()
    );
    assert_eq!(
        store.get("model/frozen").unwrap(),
        &Array1::<f32>::ones(3).into_dyn()
    );
}

#[test]
fn inconsistent_towers_are_rejected() {
    let mut broken = tower_grads(&[1], [0.0, 0.0]);
    broken[2].0 = Gradient::Dense(Array1::<f32>::zeros(3).into_dyn());

    let towers = vec![tower_grads(&[0], [0.0, 0.0]), broken];

    let err = average_grads(towers).unwrap_err();
    assert!(matches!(
        err,
        GradErr::StructuralMismatch {
            param: 2,
            tower: 1,
            ..
        }
    ));
    assert!(err.to_string().contains("parameter 2"));
}

#[test]
fn towers_share_the_variables() {
    let towers: Vec<_> = (0..4).map(GpuAssignment::new).collect();
    let var = NodeDef::new("model/emb", "VariableV2");
    let op = NodeDef::new("model/lookup", "GatherV2");

    for (gpu, tower) in towers.iter().enumerate() {
        assert_eq!(tower.place(&var), "/device:CPU:0");
        assert_eq!(tower.place(&op), format!("/gpu:{gpu}"));
    }
}
