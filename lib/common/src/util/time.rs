use std::{fmt::Write, time::Duration};

/// Pretty-print the elapsed time (used in progress bars)
pub fn elapsed_subsec(state: &indicatif::ProgressState, writer: &mut dyn Write) {
    let seconds = state.elapsed().as_secs();
    let sub_seconds = (state.elapsed().as_millis() % 1000) / 100;
    let _ = writer.write_str(&format!("{}.{}s", seconds, sub_seconds));
}

/// Pretty-print an uptime (used in lifecycle logs), e.g. `3.250s`, `1.500m`, `2d`.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64();

    match duration.as_secs() {
        0 => format!("{}ms", duration.as_millis()),
        1..=59 => format!("{:.3}s", seconds),
        60..=3_599 => format!("{:.3}m", seconds / 60.0),
        3_600..=86_399 => format!("{:.3}h", seconds / 3_600.0),
        _ => format!("{}d", duration.as_secs() / 86_400),
    }
}
