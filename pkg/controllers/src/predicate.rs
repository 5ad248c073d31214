use pkg_constants::state::KIND_PODS;
use pkg_state::{EventType, WatchEvent};
use pkg_types::{Pod, PodPhase};

/// Pod events that can move a quota's `used`.
///
/// Creates are ignored: a new pod is not running yet. Deletes always count.
/// Updates count only on a phase change into or out of `Running`.
pub fn pod_event_moves_usage(event: &WatchEvent) -> bool {
    if event.kind() != Some(KIND_PODS) {
        return false;
    }
    match event.event_type {
        EventType::Added => false,
        EventType::Deleted => true,
        EventType::Modified => {
            let (Some(old), Some(new)) = (event.decode_prev::<Pod>(), event.decode_value::<Pod>()) else {
                return false;
            };
            old.phase != new.phase && (old.phase == PodPhase::Running || new.phase == PodPhase::Running)
        }
    }
}

/// The pod an event is about, from its newest available copy.
pub fn event_pod(event: &WatchEvent) -> Option<Pod> {
    event.decode_value::<Pod>().or_else(|| event.decode_prev::<Pod>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::PodSpec;
    use pkg_types::object::Object;

    fn event(event_type: EventType, old: Option<&Pod>, new: Option<&Pod>) -> WatchEvent {
        let key = old.or(new).map(|p| p.storage_key()).unwrap_or_default();
        WatchEvent {
            seq: 1,
            event_type,
            key,
            prev_value: old.map(|p| serde_json::to_vec(p).unwrap()),
            value: new.map(|p| serde_json::to_vec(p).unwrap()),
        }
    }

    fn pod(phase: PodPhase) -> Pod {
        let mut p = Pod::new("team", "w", PodSpec::default());
        p.phase = phase;
        p
    }

    #[test]
    fn creates_are_ignored() {
        let p = pod(PodPhase::Running);
        assert!(!pod_event_moves_usage(&event(EventType::Added, None, Some(&p))));
    }

    #[test]
    fn deletes_always_trigger() {
        let p = pod(PodPhase::Pending);
        assert!(pod_event_moves_usage(&event(EventType::Deleted, Some(&p), None)));
    }

    #[test]
    fn only_running_edges_trigger() {
        let pending = pod(PodPhase::Pending);
        let running = pod(PodPhase::Running);
        let succeeded = pod(PodPhase::Succeeded);
        let failed = pod(PodPhase::Failed);

        let moves = |a: &Pod, b: &Pod| pod_event_moves_usage(&event(EventType::Modified, Some(a), Some(b)));
        assert!(moves(&pending, &running));
        assert!(moves(&running, &succeeded));
        assert!(!moves(&running, &running));
        assert!(!moves(&pending, &failed));

        // a label patch leaves the phase alone
        let mut labelled = running.clone();
        labelled.labels.insert("k".into(), "v".into());
        assert!(!moves(&running, &labelled));
    }

    #[test]
    fn other_kinds_are_ignored() {
        let mut e = event(EventType::Deleted, Some(&pod(PodPhase::Running)), None);
        e.key = "/registry/nodes/n1".to_string();
        assert!(!pod_event_moves_usage(&e));
    }
}
