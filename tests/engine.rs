mod common;

use std::{
    collections::HashMap,
    sync::{Arc, Barrier, atomic::Ordering},
    thread,
};

use approx::assert_relative_eq;
use layerflow::{
    ComputeContext, DescriptionForm, EngineError, ExecutionOptions, Layer, LayerNode, Layers,
    Model, ModelGraph, Tensor,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

use common::{CountingLayer, FailingLayer, ProbeLayer, WeightsBuilder};

fn inputs(pairs: &[(&str, Vec<f32>)]) -> HashMap<String, Vec<f32>> {
    pairs
        .iter()
        .map(|(name, values)| (name.to_string(), values.clone()))
        .collect()
}

fn graph_model(nodes: Vec<LayerNode>, options: ExecutionOptions) -> Model {
    let graph = ModelGraph::new(DescriptionForm::Graph, nodes).unwrap();
    Model::from_graph(options, graph).unwrap()
}

#[test]
fn every_node_computes_exactly_once_per_call() {
    let (a, a_calls) = CountingLayer::new("a");
    let (b, b_calls) = CountingLayer::new("b");
    let (c, c_calls) = CountingLayer::new("c");
    let (d, d_calls) = CountingLayer::new("d");
    let model = graph_model(
        vec![
            LayerNode::input("x", vec![2]),
            LayerNode::input("y", vec![2]),
            LayerNode::compute(a, vec!["x".into()]),
            LayerNode::compute(b, vec!["x".into(), "y".into()]),
            LayerNode::compute(c, vec!["a".into(), "b".into(), "y".into()]),
            LayerNode::compute(d, vec!["c".into()]),
        ],
        ExecutionOptions::default(),
    );

    let feed = inputs(&[("x", vec![1.0, 2.0]), ("y", vec![10.0, 20.0])]);
    let out = model.predict(&feed).unwrap();
    for calls in [&a_calls, &b_calls, &c_calls, &d_calls] {
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
    // a = x+1, b = x+y+1, c = a+b+y+1, d = c+1
    assert_eq!(out["d"], vec![26.0, 48.0]);

    model.predict(&feed).unwrap();
    for calls in [&a_calls, &b_calls, &c_calls, &d_calls] {
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    let order = model.execution_order();
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(position("c") > position("a"));
    assert!(position("c") > position("b"));
    assert!(position("d") > position("c"));
}

fn random_mlp(seed: u64) -> Model {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut random = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.random_range(-1.0..1.0)).collect() };
    let weights = WeightsBuilder::default()
        .dense("hidden", 4, 3, random(12), random(3))
        .dense("probs", 3, 2, random(6), random(2));
    let artifacts = weights.artifacts(
        r#"{"class_name": "Sequential", "config": {"name": "mlp", "layers": [
            {"class_name": "Dense", "config": {"name": "hidden", "units": 3, "activation": "relu",
                "batch_input_shape": [null, 4]}},
            {"class_name": "Dense", "config": {"name": "probs", "units": 2, "activation": "softmax"}}
        ]}}"#,
    );
    Model::from_artifacts(ExecutionOptions::default(), artifacts).unwrap()
}

#[test]
fn identical_calls_are_bit_identical() {
    let model = random_mlp(7);
    let feed = inputs(&[("input", vec![0.3, -0.2, 0.9, 0.1])]);
    let first = model.predict(&feed).unwrap();
    let second = model.predict(&feed).unwrap();
    let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&first["output"]), bits(&second["output"]));
    assert_relative_eq!(first["output"].iter().sum::<f32>(), 1.0, epsilon = 1e-6);
}

#[test]
fn input_name_mismatch_is_rejected_and_model_stays_usable() {
    let model = graph_model(
        vec![
            LayerNode::input("x", vec![2]),
            LayerNode::input("y", vec![2]),
            LayerNode::compute(Layers::add("sum"), vec!["x".into(), "y".into()]),
        ],
        ExecutionOptions::default(),
    );

    let subset = inputs(&[("x", vec![1.0, 2.0])]);
    let superset = inputs(&[("x", vec![1.0, 2.0]), ("y", vec![1.0, 1.0]), ("z", vec![0.0])]);
    let mismatched = inputs(&[("x", vec![1.0, 2.0]), ("w", vec![1.0, 1.0])]);
    let short = inputs(&[("x", vec![1.0]), ("y", vec![1.0, 1.0])]);
    for bad in [subset, superset, mismatched, short] {
        assert!(matches!(model.predict(&bad), Err(EngineError::InvalidInput(_))));
    }

    let out = model
        .predict(&inputs(&[("x", vec![1.0, 2.0]), ("y", vec![3.0, 4.0])]))
        .unwrap();
    assert_eq!(out["sum"], vec![4.0, 6.0]);
}

fn fan_out(accelerated: bool) {
    let (producer, produced) = ProbeLayer::new("producer", accelerated);
    let (left, left_in) = ProbeLayer::new("left", accelerated);
    let (right, right_in) = ProbeLayer::new("right", accelerated);
    let options = ExecutionOptions {
        accelerate: accelerated,
        pipeline_mode: accelerated,
        ..Default::default()
    };
    let mut model = graph_model(
        vec![
            LayerNode::input("x", vec![3]),
            LayerNode::compute(producer, vec!["x".into()]),
            LayerNode::compute(left, vec!["producer".into()]),
            LayerNode::compute(right, vec!["producer".into()]),
        ],
        options,
    );
    if accelerated {
        assert!(model.toggle_acceleration(Some(true)).unwrap());
    }

    let out = model.predict(&inputs(&[("x", vec![1.0, 2.0, 3.0])])).unwrap();
    assert_eq!(out["left"], vec![1.0, 2.0, 3.0]);
    assert_eq!(out["right"], vec![1.0, 2.0, 3.0]);

    let result = produced.produced.lock().unwrap().clone().unwrap();
    let left_input = left_in.seen.lock().unwrap()[0].clone();
    let right_input = right_in.seen.lock().unwrap()[0].clone();

    assert_eq!(left_input.is_accelerated(), accelerated);
    assert_eq!(right_input.is_accelerated(), accelerated);
    assert!(!left_input.shares_storage_with(&result));
    assert!(!right_input.shares_storage_with(&result));
    assert!(!left_input.shares_storage_with(&right_input));
}

#[test]
fn fan_out_consumers_never_share_host_storage() {
    fan_out(false);
}

#[test]
fn fan_out_consumers_never_share_device_storage() {
    fan_out(true);
}

#[test]
fn single_consumer_receives_producer_result_without_copy() {
    let (producer, produced) = ProbeLayer::new("producer", false);
    let (consumer, consumed) = ProbeLayer::new("consumer", false);
    let model = graph_model(
        vec![
            LayerNode::input("x", vec![2]),
            LayerNode::compute(producer, vec!["x".into()]),
            LayerNode::compute(consumer, vec!["producer".into()]),
        ],
        ExecutionOptions::default(),
    );
    model.predict(&inputs(&[("x", vec![5.0, 6.0])])).unwrap();
    let result = produced.produced.lock().unwrap().clone().unwrap();
    let received = consumed.seen.lock().unwrap()[0].clone();
    assert!(received.shares_storage_with(&result));
}

const SEQUENTIAL_MLP: &str = r#"{"class_name": "Sequential", "config": [
    {"class_name": "Dense", "config": {"name": "d1", "units": 2, "batch_input_shape": [null, 4]}},
    {"class_name": "Dense", "config": {"name": "d2", "units": 1}}
]}"#;

const GRAPH_MLP: &str = r#"{"class_name": "Model", "config": {"name": "mlp", "layers": [
    {"class_name": "InputLayer", "name": "input", "config": {"batch_input_shape": [null, 4], "name": "input"}, "inbound_nodes": []},
    {"class_name": "Dense", "name": "d1", "config": {"name": "d1", "units": 2}, "inbound_nodes": [[["input", 0, 0, {}]]]},
    {"class_name": "Dense", "name": "d2", "config": {"name": "d2", "units": 1}, "inbound_nodes": [[["d1", 0, 0, {}]]]}
], "input_layers": [["input", 0, 0]], "output_layers": [["d2", 0, 0]]}}"#;

fn mlp_weights() -> WeightsBuilder {
    WeightsBuilder::default()
        .dense(
            "d1",
            4,
            2,
            vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0],
            vec![0.5, -0.5],
        )
        .dense("d2", 2, 1, vec![1.0, 2.0], vec![1.0])
}

#[test]
fn two_dense_layers_match_closed_form() {
    let model =
        Model::from_artifacts(ExecutionOptions::default(), mlp_weights().artifacts(SEQUENTIAL_MLP))
            .unwrap();
    let out = model.predict(&inputs(&[("input", vec![1.0, 2.0, 3.0, 4.0])])).unwrap();
    // hidden = [1+3+0.5, 2+4-0.5] = [4.5, 5.5]; output = 4.5 + 2*5.5 + 1
    assert_relative_eq!(out["output"][0], 16.5);
    assert_eq!(model.layer_result("d1").unwrap(), Some(vec![4.5, 5.5]));
}

#[test]
fn sequential_and_graph_descriptions_agree() {
    let sequential =
        Model::from_artifacts(ExecutionOptions::default(), mlp_weights().artifacts(SEQUENTIAL_MLP))
            .unwrap();
    let graph =
        Model::from_artifacts(ExecutionOptions::default(), mlp_weights().artifacts(GRAPH_MLP))
            .unwrap();
    let feed = inputs(&[("input", vec![0.1, -0.7, 2.0, 0.25])]);

    let seq_out = sequential.predict(&feed).unwrap();
    let graph_out = graph.predict(&feed).unwrap();

    assert_eq!(sequential.execution_order(), graph.execution_order());
    assert_eq!(seq_out["output"], graph_out["d2"]);
}

#[test]
fn one_input_two_dense_into_add() {
    let weights = WeightsBuilder::default()
        .dense("a", 2, 2, vec![1.0, 0.0, 0.0, 1.0], vec![0.0, 0.0])
        .dense("b", 2, 2, vec![2.0, 0.0, 0.0, 2.0], vec![1.0, 1.0]);
    let artifacts = weights.artifacts(
        r#"{"class_name": "Functional", "config": {"name": "branches", "layers": [
            {"class_name": "InputLayer", "name": "x", "config": {"batch_shape": [null, 2]}, "inbound_nodes": []},
            {"class_name": "Dense", "name": "a", "config": {"units": 2}, "inbound_nodes": [[["x", 0, 0, {}]]]},
            {"class_name": "Dense", "name": "b", "config": {"units": 2}, "inbound_nodes": [[["x", 0, 0, {}]]]},
            {"class_name": "Add", "name": "sum", "config": {}, "inbound_nodes": [[["a", 0, 0, {}], ["b", 0, 0, {}]]]}
        ], "input_layers": [["x", 0, 0]], "output_layers": [["sum", 0, 0]]}}"#,
    );
    let model = Model::from_artifacts(ExecutionOptions::default(), artifacts).unwrap();
    let out = model.predict(&inputs(&[("x", vec![1.0, -2.0])])).unwrap();

    assert_eq!(out["sum"], vec![4.0, -5.0]);
    assert_eq!(model.layer_result("a").unwrap(), Some(vec![1.0, -2.0]));
    assert_eq!(model.layer_result("b").unwrap(), Some(vec![3.0, -3.0]));
    assert_eq!(model.layer_result("x").unwrap(), Some(vec![1.0, -2.0]));
}

#[test]
fn accelerated_pipeline_matches_host_results() {
    let host = random_mlp(11);
    let mut accelerated = random_mlp(11);
    accelerated.toggle_acceleration(Some(true)).unwrap();

    let pipelined_options = ExecutionOptions {
        accelerate: true,
        pipeline_mode: true,
        ..Default::default()
    };
    let mut rng = StdRng::seed_from_u64(11);
    let mut random = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.random_range(-1.0..1.0)).collect() };
    let weights = WeightsBuilder::default()
        .dense("hidden", 4, 3, random(12), random(3))
        .dense("probs", 3, 2, random(6), random(2));
    let pipelined = Model::from_artifacts(
        pipelined_options,
        weights.artifacts(
            r#"{"class_name": "Sequential", "config": {"name": "mlp", "layers": [
                {"class_name": "Dense", "config": {"name": "hidden", "units": 3, "activation": "relu",
                    "batch_input_shape": [null, 4]}},
                {"class_name": "Dense", "config": {"name": "probs", "units": 2, "activation": "softmax"}}
            ]}}"#,
        ),
    )
    .unwrap();
    assert!(pipelined.backend().is_some());

    let feed = inputs(&[("input", vec![0.5, 0.25, -0.75, 1.0])]);
    let expected = host.predict(&feed).unwrap();
    for model in [&accelerated, &pipelined] {
        let out = model.predict(&feed).unwrap();
        for (a, b) in out["output"].iter().zip(&expected["output"]) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }
    assert!(pipelined.backend().unwrap().memory_in_use() > 0);
}

#[test]
fn layer_failure_propagates_and_releases_the_model() {
    let model = graph_model(
        vec![
            LayerNode::input("x", vec![1]),
            LayerNode::compute(
                Box::new(FailingLayer {
                    name: "check".into(),
                }),
                vec!["x".into()],
            ),
        ],
        ExecutionOptions::default(),
    );
    assert!(matches!(
        model.predict(&inputs(&[("x", vec![-1.0])])),
        Err(EngineError::Layer { layer, .. }) if layer == "check"
    ));
    let out = model.predict(&inputs(&[("x", vec![2.0])])).unwrap();
    assert_eq!(out["check"], vec![2.0]);
}

struct BlockingLayer {
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl Layer for BlockingLayer {
    fn name(&self) -> &str {
        "block"
    }

    fn class_name(&self) -> &'static str {
        "Blocking"
    }

    fn call(&self, input: Tensor, _ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        self.entered.wait();
        self.release.wait();
        Ok(input)
    }
}

#[test]
fn concurrent_predict_is_rejected() {
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let model = Arc::new(graph_model(
        vec![
            LayerNode::input("x", vec![1]),
            LayerNode::compute(
                Box::new(BlockingLayer {
                    entered: entered.clone(),
                    release: release.clone(),
                }),
                vec!["x".into()],
            ),
        ],
        ExecutionOptions::default(),
    ));

    let runner = {
        let model = model.clone();
        thread::spawn(move || model.predict(&inputs(&[("x", vec![1.0])])))
    };
    entered.wait();
    assert!(matches!(
        model.predict(&inputs(&[("x", vec![1.0])])),
        Err(EngineError::AlreadyRunning)
    ));
    release.wait();
    assert_eq!(runner.join().unwrap().unwrap()["block"], vec![1.0]);
}

const WRAPPED_SEQUENCE: &str = r#"{"class_name": "Sequential", "config": [
    {"class_name": "Bidirectional", "config": {"name": "bi", "merge_mode": "concat",
        "batch_input_shape": [null, 3, 1],
        "layer": {"class_name": "SimpleRNN", "config": {"name": "rnn_1", "units": 1,
            "activation": "linear", "return_sequences": true}}}},
    {"class_name": "TimeDistributed", "config": {"name": "td",
        "layer": {"class_name": "Dense", "config": {"name": "dense_1", "units": 1}}}}
]}"#;

fn wrapped_weights(backward_prefix: &str) -> WeightsBuilder {
    WeightsBuilder::default()
        .add("bi", "forward_rnn_1/kernel", vec![1, 1], vec![1.0])
        .add("bi", "forward_rnn_1/recurrent_kernel", vec![1, 1], vec![1.0])
        .add("bi", "forward_rnn_1/bias", vec![1], vec![0.0])
        .add("bi", &format!("{}/kernel", backward_prefix), vec![1, 1], vec![2.0])
        .add("bi", &format!("{}/recurrent_kernel", backward_prefix), vec![1, 1], vec![1.0])
        .add("bi", &format!("{}/bias", backward_prefix), vec![1], vec![0.0])
        .add("td", "kernel", vec![2, 1], vec![1.0, 10.0])
        .add("td", "bias", vec![1], vec![0.5])
}

#[test]
fn wrapper_weights_bind_under_the_outer_name() {
    let artifacts = wrapped_weights("backward_rnn_1").artifacts(WRAPPED_SEQUENCE);
    let model = Model::from_artifacts(ExecutionOptions::default(), artifacts).unwrap();

    let out = model.predict(&inputs(&[("input", vec![1.0, 2.0, 3.0])])).unwrap();
    // forward sums 1, 3, 6; backward sums of 2x are 6, 10, 12 in reverse time,
    // so the concat rows are [1, 12], [3, 10], [6, 6]
    assert_eq!(
        model.layer_result("bi").unwrap().unwrap(),
        vec![1.0, 12.0, 3.0, 10.0, 6.0, 6.0]
    );
    assert_eq!(out["output"], vec![121.5, 103.5, 66.5]);
}

#[test]
fn wrapper_weights_without_direction_prefix_are_missing() {
    let artifacts = wrapped_weights("rnn_1").artifacts(WRAPPED_SEQUENCE);
    assert!(matches!(
        Model::from_artifacts(ExecutionOptions::default(), artifacts),
        Err(EngineError::MissingWeight { ref layer, .. }) if layer == "bi"
    ));
}
