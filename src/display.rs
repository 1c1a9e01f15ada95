use crate::checker::ProgressObserver;
use crate::operator::ReplacementOutcome;
use crate::types::{BatchCheckResult, ContainerRecord, ImageCheckResult};
use log::info;
use std::time::Duration;

/// Logs every image result as it arrives.
pub fn progress_observer() -> ProgressObserver {
    Box::new(|result: &ImageCheckResult| info!("{}", progress_line(result)))
}

fn progress_line(result: &ImageCheckResult) -> String {
    match &result.error {
        Some(error) => format!("image {} {}: {error}", result.name, result.status()),
        None => format!("image {} {}", result.name, result.status()),
    }
}

pub fn print_container_list(containers: &[ContainerRecord]) {
    if containers.is_empty() {
        println!("no containers selected");
        return;
    }
    let name_width = column_width(containers.iter().map(|c| c.name.as_str()), "NAME");
    let image_width = column_width(containers.iter().map(|c| c.image.as_str()), "IMAGE");
    println!(
        "{:<12}  {:<name_width$}  {:<image_width$}  STATE",
        "ID", "NAME", "IMAGE"
    );
    for container in containers {
        println!(
            "{:<12}  {:<name_width$}  {:<image_width$}  {}",
            container.short_id(),
            container.name,
            container.image,
            container.state
        );
    }
}

pub fn print_batch_summary(result: &BatchCheckResult) {
    if !result.images.is_empty() {
        let width = column_width(result.images.iter().map(|i| i.name.as_str()), "IMAGE");
        println!("{:<width$}  STATUS", "IMAGE");
        for image in &result.images {
            println!("{:<width$}  {}", image.name, image.status());
        }
    }
    let summary = &result.summary;
    println!(
        "{} containers, {} images: {} updated, {} up to date, {} failed ({})",
        summary.total_containers,
        summary.total_images,
        summary.updated,
        summary.up_to_date,
        summary.failed,
        format_duration(summary.duration)
    );
}

pub fn print_outcomes(outcomes: &[ReplacementOutcome]) {
    for outcome in outcomes {
        match &outcome.error {
            None => println!("recreated {} on {}", outcome.container, outcome.image),
            Some(e) => println!("failed to recreate {}: {e}", outcome.container),
        }
    }
}

fn column_width<'a>(values: impl Iterator<Item = &'a str>, header: &str) -> usize {
    values.map(str::len).chain([header.len()]).max().unwrap_or(0)
}

fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}
