use std::path::Path;

use plotters::prelude::*;

use crate::error::{DqnError, Result};

/// Index of the first maximum value, 0 for an empty iterator.
pub fn argmax<T: PartialOrd>(values: impl Iterator<Item = T>) -> usize {
    let mut max: Option<T> = None;
    let mut result: usize = 0;
    for (i, v) in values.enumerate() {
        let better = match &max {
            Some(m) => v > *m,
            None => true,
        };
        if better {
            max = Some(v);
            result = i;
        }
    }
    result
}

/// Mean over a sliding window. The first `window - 1` points have no full
/// window behind them and are reported as zero, so the output lines up with
/// `values`. Empty when there are fewer values than the window.
pub fn rolling_mean(window: usize, values: &[f64]) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return vec![];
    }
    let mut result: Vec<f64> = vec![0.0; window - 1];
    result.extend(
        values
            .windows(window)
            .map(|w| w.iter().sum::<f64>() / window as f64),
    );
    result
}

fn plot_error<E: ToString>(e: E) -> DqnError {
    DqnError::Plot(e.to_string())
}

/// Draws the episode durations and, once there are enough of them, their
/// rolling mean.
pub fn plot_durations(durations: &[f64], window: usize, path: &Path) -> Result<()> {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let max_duration = durations.iter().copied().fold(1.0, f64::max);
    let mut chart = ChartBuilder::on(&root)
        .caption("Training...", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(45)
        .build_cartesian_2d(0..durations.len().max(1), 0.0..max_duration * 1.05)
        .map_err(plot_error)?;
    chart
        .configure_mesh()
        .x_desc("Episode")
        .y_desc("Duration")
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(
            durations.iter().enumerate().map(|(i, d)| (i, *d)),
            &BLUE,
        ))
        .map_err(plot_error)?;

    let means = rolling_mean(window, durations);
    if !means.is_empty() {
        chart
            .draw_series(LineSeries::new(means.into_iter().enumerate(), &RED))
            .map_err(plot_error)?;
    }

    root.present().map_err(plot_error)?;
    Ok(())
}
