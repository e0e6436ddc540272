//! Quickstart showing fixed-point overflow in a secure aggregation round

use secagg_fl::{
    FixedPointConfig, NamedParameters, ParameterStore, SecAggServer, SecAggServerConfig,
};

fn model_with_value(value: f64) -> NamedParameters {
    let mut params = NamedParameters::new();
    params.insert_filled("fc1.weight", &[5, 2], value).unwrap();
    params.insert_filled("fc1.bias", &[5], value).unwrap();
    params
}

fn run(num_bytes: u32) {
    let fixedpoint = FixedPointConfig::new(num_bytes, 10.0).unwrap();
    let mut server =
        SecAggServer::new(SecAggServerConfig::new(fixedpoint), model_with_value(6.0)).unwrap();

    server.init_round();
    for _ in 0..10 {
        server
            .receive_update_from_client(&model_with_value(2.8), 1.0)
            .unwrap();
    }
    let overflows = server.secure_aggregator_mut().get_aggregate_overflow(false);
    server.step().unwrap();

    let result = server.global_model().parameter("fc1.bias").unwrap()[[0]];
    println!("num_bytes = {}", num_bytes);
    println!("   Aggregate overflows: {}", overflows);
    println!("   Global fc1.bias[0]:  {:.4}", result);
}

fn main() {
    println!("secagg-fl Quickstart Demo\n");
    println!("10 clients each send 2.8 (28 in fixed point) against a global value of 6.0\n");

    // 1 byte: Q = 128, the sum 280 wraps twice
    run(1);
    // 4 bytes: no wraparound, global moves to 6.0 - 2.8
    run(4);
}
