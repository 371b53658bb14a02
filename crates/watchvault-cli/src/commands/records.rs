use crate::output::{Output, OutputFormat};
use color_eyre::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::json;
use watchvault_core::{HistoryFilter, RecordStore, SortOrder};
use watchvault_models::{Detection, Platform, VideoRecord};

/// Submit a single detection, or a JSON file of detections from the
/// scraping layer.
pub async fn run_submit(
    store: &RecordStore,
    url: Option<String>,
    title: Option<String>,
    thumbnail: Option<String>,
    platform: Option<String>,
    from_file: Option<String>,
    output: &Output,
) -> Result<()> {
    let detections = if let Some(path) = from_file {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| color_eyre::eyre::eyre!("Failed to read {}: {}", path, e))?;
        serde_json::from_str::<Vec<Detection>>(&content)
            .map_err(|e| color_eyre::eyre::eyre!("Invalid detections file {}: {}", path, e))?
    } else {
        let url = url.ok_or_else(|| color_eyre::eyre::eyre!("--url is required"))?;
        let title = title.ok_or_else(|| color_eyre::eyre::eyre!("--title is required"))?;
        let mut detection = Detection::new(url, title);
        if let Some(thumbnail) = thumbnail {
            detection = detection.with_thumbnail(thumbnail);
        }
        if let Some(platform) = platform {
            detection = detection.with_platform(Platform::parse(&platform));
        }
        vec![detection]
    };

    let mut admitted = 0usize;
    let mut dropped = 0usize;
    for detection in &detections {
        match store.submit_detection(detection).await {
            Ok(Some(_)) => admitted += 1,
            Ok(None) => dropped += 1,
            Err(e) => {
                // Fire-and-forget contract: log and keep going.
                output.warn(format!("Detection {:?} failed: {}", detection.title, e));
            }
        }
    }

    output.success(format!(
        "Recorded {} detection(s), dropped {} without identity",
        admitted, dropped
    ));
    Ok(())
}

pub async fn run_history_list(
    store: &RecordStore,
    filter_text: Option<String>,
    platform: Option<String>,
    sort: Option<String>,
    limit: Option<usize>,
    output: &Output,
) -> Result<()> {
    let filter = HistoryFilter {
        text: filter_text,
        platform: platform.as_deref().map(Platform::parse),
    };
    let sort = parse_sort(sort.as_deref())?;
    let mut records = store
        .list_history(&filter, sort)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to list history: {}", e))?;
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    print_records(&records, output);
    Ok(())
}

pub async fn run_library_list(
    store: &RecordStore,
    playlist: Option<String>,
    output: &Output,
) -> Result<()> {
    let records = store
        .list_library(playlist.as_deref())
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to list library: {}", e))?;
    print_records(&records, output);
    Ok(())
}

pub async fn run_history_delete(store: &RecordStore, id: &str, output: &Output) -> Result<()> {
    store
        .delete_from_history(id)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to delete {}: {}", id, e))?;
    output.success(format!("Deleted {} from history", id));
    Ok(())
}

pub async fn run_rate(store: &RecordStore, id: &str, rating: u8, output: &Output) -> Result<()> {
    store
        .set_rating(id, rating)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to rate {}: {}", id, e))?;
    if rating == 0 {
        output.success(format!("Cleared rating for {}", id));
    } else {
        output.success(format!("Rated {} as {}/5", id, rating));
    }
    Ok(())
}

pub async fn run_retitle(store: &RecordStore, id: &str, title: &str, output: &Output) -> Result<()> {
    store
        .edit_title(id, title)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to retitle {}: {}", id, e))?;
    output.success(format!("Renamed {} to {:?}", id, title));
    Ok(())
}

fn parse_sort(sort: Option<&str>) -> Result<SortOrder> {
    match sort.unwrap_or("recent") {
        "recent" => Ok(SortOrder::RecentFirst),
        "oldest" => Ok(SortOrder::OldestFirst),
        "title" => Ok(SortOrder::TitleAsc),
        "rating" => Ok(SortOrder::RatingDesc),
        other => Err(color_eyre::eyre::eyre!(
            "Invalid sort {:?}. Use 'recent', 'oldest', 'title', or 'rating'",
            other
        )),
    }
}

fn print_records(records: &[VideoRecord], output: &Output) {
    match output.format() {
        OutputFormat::Human => {
            if records.is_empty() {
                output.info("No records found");
                return;
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["ID", "Title", "Platform", "Watched", "Rating"]);
            for record in records {
                let rating = if record.is_rated() {
                    format!("{}/5", record.rating)
                } else {
                    "-".to_string()
                };
                table.add_row(vec![
                    record.id.clone(),
                    record.title.clone(),
                    record.platform.to_string(),
                    record.watched_at.format("%Y-%m-%d %H:%M").to_string(),
                    rating,
                ]);
            }
            output.println(table.to_string());
        }
        _ => {
            output.json(&json!({
                "type": "records",
                "count": records.len(),
                "records": records,
            }));
        }
    }
}
