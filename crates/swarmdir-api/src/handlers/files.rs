//! /files handler: every file with at least one owned chunk.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

#[derive(Serialize)]
pub struct FilesResponse {
    pub files: Vec<FileInfo>,
}

#[derive(Serialize)]
pub struct FileInfo {
    pub filename: String,
    /// Announced size in bytes; 0 when never announced.
    pub size: u64,
    /// Chunks available without a gap, from chunk 1.
    pub chunks: u32,
    pub owners: usize,
}

pub async fn handle_files(State(state): State<ApiState>) -> Json<FilesResponse> {
    let files = state
        .registry
        .files()
        .into_iter()
        .map(|f| FileInfo {
            size: state.file_sizes.get(&f.filename),
            filename: f.filename,
            chunks: f.chunks,
            owners: f.owners,
        })
        .collect();
    Json(FilesResponse { files })
}
