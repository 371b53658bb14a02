use crate::output::{Output, OutputFormat};
use color_eyre::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::json;
use watchvault_core::RecordStore;

pub async fn run_create(store: &RecordStore, name: &str, output: &Output) -> Result<()> {
    store
        .create_playlist(name)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to create playlist: {}", e))?;
    output.success(format!("Created playlist {:?}", name));
    Ok(())
}

pub async fn run_rename(store: &RecordStore, old: &str, new: &str, output: &Output) -> Result<()> {
    store
        .rename_playlist(old, new)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to rename playlist: {}", e))?;
    output.success(format!("Renamed playlist {:?} to {:?}", old, new));
    Ok(())
}

pub async fn run_delete(store: &RecordStore, name: &str, output: &Output) -> Result<()> {
    store
        .delete_playlist(name)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to delete playlist: {}", e))?;
    output.success(format!("Deleted playlist {:?}", name));
    Ok(())
}

pub async fn run_add(
    store: &RecordStore,
    id: &str,
    playlist: &str,
    output: &Output,
) -> Result<()> {
    store
        .add_to_playlist(id, playlist)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to add {} to {:?}: {}", id, playlist, e))?;
    output.success(format!("Added {} to {:?}", id, playlist));
    Ok(())
}

pub async fn run_remove(
    store: &RecordStore,
    id: &str,
    playlist: &str,
    output: &Output,
) -> Result<()> {
    store
        .remove_from_playlist(id, playlist)
        .await
        .map_err(|e| {
            color_eyre::eyre::eyre!("Failed to remove {} from {:?}: {}", id, playlist, e)
        })?;
    output.success(format!("Removed {} from {:?}", id, playlist));
    Ok(())
}

pub async fn run_list(store: &RecordStore, output: &Output) -> Result<()> {
    let playlists = store
        .playlists()
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to list playlists: {}", e))?;

    match output.format() {
        OutputFormat::Human => {
            if playlists.0.is_empty() {
                output.info("No playlists");
                return Ok(());
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Playlist", "Records"]);
            for (name, members) in &playlists.0 {
                table.add_row(vec![name.clone(), members.len().to_string()]);
            }
            output.println(table.to_string());
        }
        _ => {
            output.json(&json!({
                "type": "playlists",
                "count": playlists.0.len(),
                "playlists": playlists,
            }));
        }
    }
    Ok(())
}
