//! `vocoder linear checkpoints`

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use vocoder_training::ModelLayout;

pub fn execute(path: &Path, json: bool) -> Result<()> {
    let layout = ModelLayout::new(path.to_path_buf());
    layout.require_existing()?;
    let checkpoints = layout.checkpoint_store().list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!("No checkpoints found.");
        return Ok(());
    }

    println!("{:<12} {}", "Step".bold(), "Path".bold());
    println!("{}", "-".repeat(60));
    for entry in &checkpoints {
        println!("{:<12} {}", entry.step, entry.path.display());
    }
    Ok(())
}
