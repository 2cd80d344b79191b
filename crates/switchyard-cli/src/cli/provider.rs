//! `providers` command: the registry, or one model's dispatch order.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use switchyard_types::provider::ProviderDescriptor;

use crate::state::AppState;

pub fn list_providers(state: &AppState, model: Option<&str>, json: bool) -> Result<()> {
    let registry = state.gateway.registry();

    let descriptors: Vec<ProviderDescriptor> = match model {
        Some(model) => registry
            .resolve(model)?
            .iter()
            .map(|candidate| candidate.descriptor.as_ref().clone())
            .collect(),
        None => {
            let mut all: Vec<ProviderDescriptor> = registry.descriptors().cloned().collect();
            all.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
            all
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    if descriptors.is_empty() {
        println!();
        println!("  {}", style("No providers configured.").dim());
        println!();
        return Ok(());
    }

    if let Some(model) = model {
        println!();
        println!("  Dispatch order for {}:", style(model).cyan().bold());
    }

    println!("{}", provider_table(&descriptors));
    Ok(())
}

fn provider_table(descriptors: &[ProviderDescriptor]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Name"),
            Cell::new("Priority"),
            Cell::new("Models"),
            Cell::new("Timeout"),
            Cell::new("$/M in"),
            Cell::new("$/M out"),
        ]);

    for (rank, descriptor) in descriptors.iter().enumerate() {
        table.add_row(vec![
            Cell::new(rank + 1),
            Cell::new(&descriptor.name).fg(Color::Cyan),
            Cell::new(descriptor.priority),
            Cell::new(descriptor.model_patterns.join(", ")),
            Cell::new(format!("{}ms", descriptor.timeout_ms)),
            Cell::new(format!("{:.2}", descriptor.cost.input_cost_per_million)),
            Cell::new(format!("{:.2}", descriptor.cost.output_cost_per_million)),
        ]);
    }
    table
}
