//! Interactive prompts using dialoguer

use std::path::Path;

use anyhow::Result;
use dialoguer::Confirm;

/// Prompt user to confirm proceeding with an action
pub fn confirm_step(message: &str) -> Result<bool> {
    let confirmed = Confirm::new()
        .with_prompt(message)
        .default(true)
        .interact()?;
    Ok(confirmed)
}

/// Ask before writing into an output directory that already has files.
/// Returns true straight away when the directory is missing or empty.
pub fn confirm_overwrite(output_dir: &Path) -> Result<bool> {
    let occupied = std::fs::read_dir(output_dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if !occupied {
        return Ok(true);
    }
    confirm_step(&format!(
        "Output directory {} is not empty. Overwrite existing results?",
        output_dir.display()
    ))
}
