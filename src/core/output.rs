//! Output rendering helpers for CLI surfaces.
//!
//! Mutating commands print either a one-line summary or a JSON command envelope; list
//! commands print a padded table in text mode and a JSON array otherwise.

use crate::core::entity::{Entity, LifecycleState};
use crate::core::time;
use clap::ValueEnum;
use colored::Colorize;
use serde_json::Value as JsonValue;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Prints the result of a mutating command.
pub fn emit(format: OutputFormat, cmd: &str, summary: &str, extra: JsonValue) {
    match format {
        OutputFormat::Json => {
            let envelope = time::command_envelope(cmd, "ok", extra);
            println!(
                "{}",
                serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| envelope.to_string())
            );
        }
        OutputFormat::Text => println!("{}", summary),
    }
}

/// JSON view of an entity used in envelopes and listings.
pub fn entity_json(entity: &Entity) -> JsonValue {
    serde_json::json!({
        "kind": entity.kind,
        "name": entity.name,
        "state": entity.state(),
        "runtime_id": entity.runtime_id(),
        "image": entity.image.reference(),
        "dependents": entity.dependents.iter().map(|d| d.key()).collect::<Vec<_>>(),
    })
}

fn paint_state(state: LifecycleState) -> String {
    let text = state.to_string();
    match state {
        LifecycleState::Running => text.green().to_string(),
        LifecycleState::Created => text.yellow().to_string(),
        LifecycleState::Stopped => text.red().to_string(),
        LifecycleState::Absent => text.dimmed().to_string(),
    }
}

/// Rows of `name  state  id  image` for text listings.
pub fn render_entities(entities: &[Entity]) -> String {
    let name_width = entities
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let mut out = format!(
        "{:<name_width$}  {:<8}  {:<12}  {}\n",
        "NAME", "STATE", "ID", "IMAGE"
    );
    for entity in entities {
        let id: String = entity.runtime_id().unwrap_or("-").chars().take(12).collect();
        let state = entity.state();
        // pad before painting; escape codes would skew the width
        let padding = " ".repeat(8usize.saturating_sub(state.to_string().len()));
        out.push_str(&format!(
            "{:<name_width$}  {}{}  {:<12}  {}\n",
            entity.name,
            paint_state(state),
            padding,
            id,
            compact_line(&entity.image.reference(), 48)
        ));
    }
    out
}

pub fn print_entities(format: OutputFormat, entities: &[Entity]) {
    match format {
        OutputFormat::Json => {
            let items: Vec<JsonValue> = entities.iter().map(entity_json).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Text => print!("{}", render_entities(entities)),
    }
}
