use crate::{model::Model, model::graph::LayerNode, utils::error::EngineError};

pub fn print_model_stats(model: &Model) -> Result<(), EngineError> {
    let graph = model.graph()?;
    let mut total_params = 0usize;

    println!("\nModel Statistics");
    println!("================");
    println!("\nLayer Details:");
    println!("{:-<125}", "");
    println!(
        "{:<4} {:<20} {:<18} {:<10} {:<12} {:<28} {}",
        "ID", "Name", "Type", "Params", "Device", "Connections", "Config"
    );
    println!("{:-<125}", "");

    for (id, node) in graph.nodes().iter().enumerate() {
        let params = node.layer().map_or(0, |l| l.parameter_count());
        let config = match node.layer() {
            Some(layer) => layer.config_string().unwrap_or_default(),
            None => format!("shape={}", format_dimensions(input_shape(node))),
        };
        let device = model
            .last_result_device(&node.name)
            .unwrap_or_else(|| planned_device(node).to_string());

        println!(
            "{:<4} {:<20} {:<18} {:<10} {:<12} {:<28} {}",
            id,
            node.name,
            node.class_name,
            params,
            device,
            format_layer_connections(&node.inbound, &node.outbound),
            config
        );
        total_params += params;
    }

    println!("{:-<125}", "");

    let entry_points: Vec<&str> = graph.inputs().iter().map(|i| i.name.as_str()).collect();
    let exit_points: Vec<&str> = graph.output_nodes().map(|n| n.name.as_str()).collect();

    println!("\nGraph Structure:");
    println!("Entry points: {:?}", entry_points);
    println!("Exit points: {:?}", exit_points);

    println!("\nModel Summary:");
    println!("Total Parameters: {}", total_params);
    println!("Parameter Memory: {}", format_memory_mb((total_params * 4) as u64));

    let order = model.execution_order();
    if !order.is_empty() {
        println!("Last Execution Order: {}", order.join(" -> "));
    }

    if let Some(backend) = model.backend() {
        println!("\nMemory Allocation:");
        println!(
            "{} Memory Used: {}",
            backend.name(),
            format_memory_mb(backend.memory_in_use())
        );
        println!(
            "{} Memory Available: {}",
            backend.name(),
            format_memory_mb(backend.memory_available())
        );
    }
    Ok(())
}

fn input_shape(node: &LayerNode) -> &[usize] {
    match &node.kind {
        crate::model::NodeKind::Input { shape } => shape,
        crate::model::NodeKind::Compute(_) => &[],
    }
}

fn planned_device(node: &LayerNode) -> &'static str {
    match node.layer() {
        Some(layer) if layer.is_accelerated() => "Accelerated",
        _ => "Host",
    }
}

pub fn format_memory_mb(bytes: u64) -> String {
    format!("{:.2} MiB", bytes as f64 / (1024.0 * 1024.0))
}

fn format_dimensions(dims: &[usize]) -> String {
    if dims.len() <= 4 {
        dims.iter()
            .map(|&d| d.to_string())
            .collect::<Vec<_>>()
            .join("×")
    } else {
        format!("{}d tensor", dims.len())
    }
}

fn format_layer_connections(inputs: &[String], outputs: &[String]) -> String {
    if inputs.is_empty() && outputs.is_empty() {
        return "None".to_string();
    }

    let mut result = String::new();

    if !inputs.is_empty() {
        result.push_str(&format!("in:[{}]", inputs.join(",")));
    }

    if !outputs.is_empty() {
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(&format!("out:[{}]", outputs.join(",")));
    }

    result
}
