//! Fixed-length training windows.

/// Number of consecutive values fed to the model; train and predict share it.
pub const WINDOW: usize = 3;

/// One supervised example: `WINDOW` consecutive values and the value after.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub inputs: [f64; WINDOW],
    pub target: f64,
}

/// Slide a `WINDOW`-sized frame over `series` (oldest first).
///
/// Yields `series.len() - WINDOW` overlapping windows, none when the series
/// is not longer than `WINDOW`.
pub fn build_windows(series: &[f64]) -> Vec<Window> {
    series
        .windows(WINDOW + 1)
        .map(|frame| {
            let mut inputs = [0.0; WINDOW];
            inputs.copy_from_slice(&frame[..WINDOW]);
            Window {
                inputs,
                target: frame[WINDOW],
            }
        })
        .collect()
}
