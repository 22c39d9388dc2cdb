use std::error::Error;
use std::fs::File;
use std::path::Path;

use plotters::prelude::*;
use serde::Serialize;

use crate::state::{EpisodeRecord, TrainingSummary};

#[derive(Debug, Serialize)]
struct RewardRow<'a> {
    episode: usize,
    total_reward: f32,
    steps: usize,
    duration_secs: f32,
    epsilon: f32,
    termination: &'a str,
}

impl<'a> From<&'a EpisodeRecord> for RewardRow<'a> {
    fn from(record: &'a EpisodeRecord) -> Self {
        Self {
            episode: record.episode,
            total_reward: record.total_reward,
            steps: record.steps,
            duration_secs: record.duration_secs,
            epsilon: record.epsilon,
            termination: record.termination.label(),
        }
    }
}

/// Writes one CSV row per recorded episode, with a header.
pub fn write_rewards_csv(records: &[EpisodeRecord], path: &Path) -> Result<(), Box<dyn Error>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(File::create(path)?);
    for record in records {
        writer.serialize(RewardRow::from(record))?;
    }
    writer.flush()?;
    Ok(())
}

/// Renders reward per episode (top) and the exploration rate (bottom).
pub fn plot_rewards(records: &[EpisodeRecord], out: &Path) -> Result<(), Box<dyn Error>> {
    if records.is_empty() {
        return Err("no episodes to plot".into());
    }
    let root = BitMapBackend::new(out, (1000, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| format!("{e}"))?;
    let (upper, lower) = root.split_vertically(460);

    let last = records.len() + 1;
    let (low, high) = records
        .iter()
        .map(|r| r.total_reward)
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let pad = ((high - low) * 0.1).max(1.0);

    let mut rewards = ChartBuilder::on(&upper)
        .caption("Training rewards", ("sans-serif", 26).into_font())
        .margin(15)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(1..last, (low - pad)..(high + pad))
        .map_err(|e| format!("{e}"))?;
    rewards
        .configure_mesh()
        .x_desc("Episode")
        .y_desc("Total reward")
        .draw()
        .map_err(|e| format!("{e}"))?;
    rewards
        .draw_series(LineSeries::new(
            records.iter().map(|r| (r.episode, r.total_reward)),
            &BLUE,
        ))
        .map_err(|e| format!("{e}"))?;
    rewards
        .draw_series(
            records
                .iter()
                .filter(|r| r.termination.is_success())
                .map(|r| Circle::new((r.episode, r.total_reward), 4, GREEN.filled())),
        )
        .map_err(|e| format!("{e}"))?;

    let mut epsilon = ChartBuilder::on(&lower)
        .margin(15)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(1..last, 0.0f32..1.05f32)
        .map_err(|e| format!("{e}"))?;
    epsilon
        .configure_mesh()
        .x_desc("Episode")
        .y_desc("Epsilon")
        .draw()
        .map_err(|e| format!("{e}"))?;
    epsilon
        .draw_series(LineSeries::new(
            records.iter().map(|r| (r.episode, r.epsilon)),
            &RED,
        ))
        .map_err(|e| format!("{e}"))?;

    root.present().map_err(|e| format!("{e}"))?;
    Ok(())
}

pub fn describe_summary(summary: &TrainingSummary) -> String {
    let rewards = match (summary.best_reward, summary.average_reward) {
        (Some(best), Some(average)) => {
            format!("Best reward:       {best:.2}\nAverage reward:    {average:.2}\n")
        }
        _ => String::from("No rewards recorded\n"),
    };
    format!(
        "Episodes recorded: {}\n{rewards}Landings on target: {}\n",
        summary.episodes, summary.landings
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TerminationReason;
    use tempdir::TempDir;

    fn records() -> Vec<EpisodeRecord> {
        vec![
            EpisodeRecord {
                episode: 1,
                total_reward: -12.5,
                steps: 40,
                duration_secs: 4.0,
                termination: TerminationReason::MissedTarget { distance: 6.0 },
                epsilon: 0.9,
            },
            EpisodeRecord {
                episode: 2,
                total_reward: 210.0,
                steps: 55,
                duration_secs: 5.5,
                termination: TerminationReason::LandedOnTarget { distance: 0.4 },
                epsilon: 0.8,
            },
        ]
    }

    #[test]
    fn csv_has_header_and_one_row_per_episode() -> Result<(), Box<dyn Error>> {
        let dir = TempDir::new("rewards_csv")?;
        let path = dir.path().join("rewards.csv");
        write_rewards_csv(&records(), &path)?;
        let text = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "episode,total_reward,steps,duration_secs,epsilon,termination"
        );
        assert!(lines[2].ends_with("landed_on_target"));
        Ok(())
    }

    #[test]
    fn summary_text_mentions_best_reward() {
        let summary = TrainingSummary::from_records(&records());
        let text = describe_summary(&summary);
        assert!(text.contains("Best reward:       210.00"));
        assert!(text.contains("Landings on target: 1"));
        assert_eq!(
            describe_summary(&TrainingSummary::default()),
            "Episodes recorded: 0\nNo rewards recorded\nLandings on target: 0\n"
        );
    }

    #[test]
    fn plotting_nothing_is_an_error() {
        let dir = TempDir::new("rewards_plot").expect("tempdir");
        assert!(plot_rewards(&[], &dir.path().join("rewards.png")).is_err());
    }
}
