use ndarray::ArrayView1;

use crate::error::{Result, SurvivalError};

/// is the pair (a, b) informative for ranking?
fn comparable(time_a: f64, time_b: f64, event_a: bool, event_b: bool) -> bool {
    if time_a == time_b {
        // tied times only tell us something when exactly one of them is an event
        event_a != event_b
    } else if event_a && event_b {
        true
    } else if event_a {
        time_a < time_b
    } else if event_b {
        time_b < time_a
    } else {
        false
    }
}

/// 1 if the predictions rank the pair like the times do, 0.5 on tied predictions
fn concordance_value(time_a: f64, time_b: f64, pred_a: f64, pred_b: f64, event_a: bool, event_b: bool) -> f64 {
    if pred_a == pred_b {
        return 0.5;
    }
    let agrees = if pred_a < pred_b {
        time_a < time_b || (time_a == time_b && event_a && !event_b)
    } else {
        time_a > time_b || (time_a == time_b && !event_a && event_b)
    };
    if agrees {
        1.0
    } else {
        0.0
    }
}

/// concordance between observed times & predicted times (higher = longer survival)
///
/// 1.0 is a perfect ranking, 0.5 what random predictions score. For risk
/// scores, pass the negated score. Fails when no pair is comparable.
pub fn concordance_index(
    event_times: ArrayView1<f64>,
    predicted: ArrayView1<f64>,
    events: &[bool],
) -> Result<f64> {
    let n = event_times.len();
    if predicted.len() != n || events.len() != n {
        return Err(SurvivalError::invalid_dimensions(
            "times, predictions, and events must have same length",
        ));
    }
    if predicted.iter().any(|p| p.is_nan()) {
        return Err(SurvivalError::numerical_error("NaN in predictions"));
    }

    let mut paths = 0u64;
    let mut concordant = 0.0;
    for a in 0..n {
        for b in (a + 1)..n {
            if comparable(event_times[a], event_times[b], events[a], events[b]) {
                paths += 1;
                concordant += concordance_value(
                    event_times[a],
                    event_times[b],
                    predicted[a],
                    predicted[b],
                    events[a],
                    events[b],
                );
            }
        }
    }

    if paths == 0 {
        return Err(SurvivalError::degeneracy(
            "no comparable pairs for concordance calc",
        ));
    }
    Ok(concordant / paths as f64)
}
