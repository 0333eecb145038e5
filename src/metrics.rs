//! Counters exported through the `metrics` facade.

use ::metrics::counter;

pub(crate) fn record_delivered() {
    counter!("errmux_errors_delivered_total").increment(1);
}

pub(crate) fn record_discarded() {
    counter!("errmux_errors_discarded_total").increment(1);
}

pub(crate) fn record_dropped() {
    counter!("errmux_errors_dropped_total").increment(1);
}

pub(crate) fn record_cancellation(trigger: &'static str) {
    counter!("errmux_cancellations_total", "trigger" => trigger).increment(1);
}
