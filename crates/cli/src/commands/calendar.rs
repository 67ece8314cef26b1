//! `cadence calendar`: print a month's chapter assignment.

use cadence_agent::DailyArtifactScheduler;
use cadence_config::AppConfig;
use chrono::{Datelike, Local};

pub async fn run(
    config: AppConfig,
    year: Option<i32>,
    month: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let today = Local::now().date_naive();
    let year = year.unwrap_or(today.year());
    let month = month.unwrap_or(today.month());

    let calendar = DailyArtifactScheduler::new(&config.artifacts.dir, &config.artifacts.extension);
    let assignment = calendar.assignment_for(year, month).await?;

    println!("{year}-{month:02} from {}", calendar.dir().display());
    for (day, artifact) in assignment.iter() {
        let marker = if year == today.year() && month == today.month() && *day == today.day() {
            "*"
        } else {
            " "
        };
        println!("{marker} {day:>2}  {artifact}");
    }
    Ok(())
}
