use anyhow::{Context, Result};
use serde::Serialize;

pub fn format_json<T: Serialize>(data: &T) -> Result<String> {
    serde_json::to_string_pretty(data).context("Failed to encode output as JSON")
}

pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    println!("{}", format_json(data)?);
    Ok(())
}
