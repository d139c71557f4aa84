use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tourstitch::geographic::nearest_point;
use tourstitch::index::{base_track_id, build_index, endpoint_distance};
use tourstitch::measure::{Degrees, Meters};
use tourstitch::types::GeoPoint;

/// Ranks indexed tracks by distance to a coordinate
///
/// Shows what the chaining search sees from a given spot: for each track the
/// nearest point's sequence index, its distance, and the distance to the
/// nearer endpoint. Useful when a day starts or ends on an unexpected track.
#[derive(Parser)]
struct Cli {
    /// Directory of GPX tracks
    tracks: PathBuf,

    #[clap(allow_negative_numbers = true)]
    lat: f64,

    #[clap(allow_negative_numbers = true)]
    lon: f64,

    /// Number of tracks to show
    #[clap(long, short, default_value_t = 5)]
    count: usize,

    /// Print one JSON object per track
    #[clap(long, action)]
    json: bool,
}

#[derive(Serialize)]
struct Candidate<'a> {
    track_id: &'a str,
    base_id: &'a str,
    sequence_index: usize,
    distance: Meters<f64>,
    endpoint_distance: Meters<f64>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let target = GeoPoint::new(Degrees(args.lat), Degrees(args.lon), None)?;
    let (index, report) = build_index(&args.tracks).context("Reading the tracks directory")?;
    eprintln!(
        "{} tracks indexed, {} files skipped",
        report.loaded,
        report.skipped.len()
    );

    let mut candidates: Vec<Candidate> = index
        .iter()
        .filter_map(|track| {
            let nearest = nearest_point(track.points(), &target);
            Some(Candidate {
                track_id: track.id(),
                base_id: base_track_id(track.id()),
                sequence_index: nearest.sequence_index?,
                distance: nearest.distance,
                endpoint_distance: endpoint_distance(track, &target),
            })
        })
        .collect();
    candidates.sort_by(|a, b| a.distance.0.total_cmp(&b.distance.0));

    for c in candidates.iter().take(args.count) {
        if args.json {
            println!("{}", serde_json::to_string(c)?);
        } else {
            println!(
                "{:<32} #{:<6} {:.1}  (endpoint {:.1}, base {})",
                c.track_id, c.sequence_index, c.distance, c.endpoint_distance, c.base_id
            );
        }
    }
    Ok(())
}
