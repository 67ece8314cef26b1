//! `cadence search`: query the full-text index.

use super::open_index;
use cadence_config::AppConfig;
use cadence_core::index::TextIndex;

pub async fn run(config: AppConfig, query: &str, k: usize) -> Result<(), Box<dyn std::error::Error>> {
    let index = open_index(&config).await?;
    let hits = index.search(query, k).await?;
    if hits.is_empty() {
        println!("No matches for \"{query}\"");
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!("{}. {} #{}", rank + 1, hit.path, hit.chunk_index);
        for line in hit.content.lines().take(4) {
            println!("   {line}");
        }
        println!();
    }
    Ok(())
}
