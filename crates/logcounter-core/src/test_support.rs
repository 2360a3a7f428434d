// Metric assertions against a thread-local debugging recorder.
use metrics::{SharedString, Unit};
use metrics_util::CompositeKey;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

pub(crate) type Snapshot = Vec<(CompositeKey, Option<Unit>, Option<SharedString>, DebugValue)>;

/// Recorder plus snapshotter; install with `metrics::set_default_local_recorder`.
pub(crate) fn debugging_recorder() -> (DebuggingRecorder, Snapshotter) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (recorder, snapshotter)
}

/// Sum of counter `name`, optionally restricted to one `reason` label.
pub(crate) fn counter_total(snapshot: &Snapshot, name: &str, reason: Option<&str>) -> u64 {
    snapshot
        .iter()
        .filter_map(|(key, _, _, value)| {
            let key = key.key();
            let reason_matches = reason.is_none_or(|reason| {
                key.labels()
                    .any(|label| label.key() == "reason" && label.value() == reason)
            });
            match value {
                DebugValue::Counter(count) if key.name() == name && reason_matches => Some(*count),
                _ => None,
            }
        })
        .sum()
}
