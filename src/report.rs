//! Plain text reports for the command line
//!
//! Distances are rendered in any unit `T` convertible from [`Meters`];
//! elevations are always in meters.

use std::fmt::{Display, Write};

use crate::chain::ChainSegment;
use crate::index::{IndexReport, TrackIndex};
use crate::itinerary::{Booking, DayPlan};
use crate::measure::Meters;
use crate::passes::PassTrack;

type Result<T> = std::result::Result<T, std::fmt::Error>;

fn describe_segment(segment: &ChainSegment) -> String {
    format!(
        "{} [{}..{}]{}",
        segment.track_id,
        segment.start_index,
        segment.end_index,
        if segment.reversed { " reversed" } else { "" }
    )
}

fn day_ascent_descent(plan: &DayPlan) -> Option<(i64, i64)> {
    match (&plan.profile, &plan.statistics) {
        (Some(profile), _) => Some((profile.ascent.0.round() as i64, profile.descent.0.round() as i64)),
        (None, Some(stats)) => Some((stats.ascent_m, stats.descent_m)),
        (None, None) => None,
    }
}

fn write_day<T>(r: &mut String, booking: &Booking, plan: &DayPlan) -> Result<Meters<f64>>
where
    T: From<Meters<f64>> + Display,
{
    let distance = plan
        .statistics
        .map(|s| Meters(s.distance_km * 1000.0))
        .unwrap_or_default();

    writeln!(r, "{}  {}", booking.arrival_date, booking.hotel_name)?;
    if !plan.chain.is_empty() {
        let segments: Vec<String> = plan.chain.iter().map(describe_segment).collect();
        writeln!(r, "    via {}", segments.join(", "))?;
    }
    write!(r, "    {:.2}", T::from(distance))?;
    if let Some((ascent, descent)) = day_ascent_descent(plan) {
        write!(r, ", +{ascent} m / -{descent} m")?;
    }
    if let Some(max) = plan.statistics.and_then(|s| s.max_elevation_m) {
        write!(r, ", max {max} m")?;
    }
    writeln!(r)?;
    if let Some(file) = &plan.track_file {
        writeln!(
            r,
            "    track {}{}",
            file,
            if plan.connector_appended { " (with connector)" } else { "" }
        )?;
    }
    for issue in &plan.issues {
        writeln!(r, "    ! {issue}")?;
    }
    Ok(distance)
}

fn write_pass_tracks<T>(r: &mut String, pass_tracks: &[PassTrack]) -> Result<()>
where
    T: From<Meters<f64>> + Display,
{
    for pass in pass_tracks {
        let stats = &pass.statistics;
        write!(
            r,
            "    pass {} via {}{}: {:.2}, +{} m",
            pass.pass_name,
            pass.track_id,
            if pass.reversed { " reversed" } else { "" },
            T::from(Meters(stats.distance_km * 1000.0)),
            stats.ascent_m
        )?;
        if let Some(max) = stats.max_elevation_m {
            write!(r, ", max {max} m")?;
        }
        writeln!(r)?;
    }
    Ok(())
}

/// Day-by-day summary of a planned itinerary.
pub fn itinerary_report<T>(bookings: &[Booking]) -> Result<String>
where
    T: From<Meters<f64>> + Display,
{
    let mut r = String::new();
    let mut total = Meters(0.0);
    let mut incomplete = 0usize;
    for booking in bookings {
        match &booking.route {
            Some(plan) => {
                total += write_day::<T>(&mut r, booking, plan)?;
                if !plan.is_complete() {
                    incomplete += 1;
                }
            }
            None => {
                let note = if booking.coordinates().is_some() { "no ride" } else { "location unknown" };
                writeln!(r, "{}  {} ({})", booking.arrival_date, booking.hotel_name, note)?;
            }
        }
        write_pass_tracks::<T>(&mut r, &booking.pass_tracks)?;
    }

    let days = bookings.iter().filter(|b| b.route.is_some()).count();
    writeln!(r, "\n{} days, {:.1} in total", days, T::from(total))?;
    if incomplete > 0 {
        writeln!(r, "{incomplete} days need attention")?;
    }
    Ok(r)
}

/// Listing of an index build.
pub fn index_report<T>(index: &TrackIndex, report: &IndexReport) -> Result<String>
where
    T: From<Meters<f64>> + Display,
{
    let mut r = String::new();
    for track in index.iter() {
        write!(
            r,
            "{}  {} points, {:.1}, +{:.0}",
            track.id(),
            track.len(),
            T::from(track.total_distance()),
            track.raw_ascent()
        )?;
        if let Some(name) = track.name() {
            write!(r, "  \"{name}\"")?;
        }
        writeln!(r)?;
    }
    writeln!(r, "\nLoaded {} tracks", report.loaded)?;
    if !report.skipped.is_empty() {
        writeln!(r, "Skipped {} files:", report.skipped.len())?;
        for skipped in &report.skipped {
            writeln!(r, "    {}: {}", skipped.path.to_string_lossy(), skipped.reason)?;
        }
    }
    Ok(r)
}
