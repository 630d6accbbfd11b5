//! File listing command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
struct FilesResponse {
    files: Vec<FileInfo>,
}

#[derive(Deserialize)]
struct FileInfo {
    filename: String,
    size: u64,
    chunks: u32,
    owners: usize,
}

pub async fn cmd_files(port: u16) -> Result<()> {
    let resp: FilesResponse = get_json(&format!("{}/files", base_url(port))).await?;

    if resp.files.is_empty() {
        println!("No files announced.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Files ({})", resp.files.len());
    println!("═══════════════════════════════════════");

    for f in &resp.files {
        let size = if f.size == 0 {
            "unknown".to_string()
        } else {
            format!("{} bytes", f.size)
        };
        println!("  ┌─ {}", f.filename);
        println!("  │  size   : {}", size);
        println!("  │  chunks : {} contiguous", f.chunks);
        println!("  └─ owners : {}", f.owners);
    }

    Ok(())
}
