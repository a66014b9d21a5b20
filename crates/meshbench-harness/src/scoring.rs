//! Rubric evaluation over finalized traces.
//!
//! Every criterion is a pure predicate of the trace; scoring a
//! persisted trace reproduces the original score exactly. Criteria are
//! all-or-nothing: full weight only when the check holds for every
//! applicable fixture.

use meshbench_core::domain::{
    CriterionCheck, Fixture, Level, Message, Role, ScoreBreakdown, Trace, TraceKind,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Score a finalized trace against a level's rubric.
///
/// A run that never loaded gets the explicit all-zero breakdown; every
/// criterion row is still present.
pub fn score(trace: &Trace, level: Level) -> ScoreBreakdown {
    let rubric = level.rubric();
    if trace.load_failed() {
        return ScoreBreakdown::zeroed(&rubric);
    }

    let fixtures = level.fixtures();
    let verdicts: Vec<bool> = rubric
        .criteria
        .iter()
        .map(|criterion| {
            let held = holds(&criterion.check, trace, &fixtures);
            debug!(criterion = %criterion.name, held, "criterion evaluated");
            held
        })
        .collect();

    ScoreBreakdown::from_verdicts(&rubric, &verdicts)
}

fn holds(check: &CriterionCheck, trace: &Trace, fixtures: &[Fixture]) -> bool {
    match check {
        CriterionCheck::Loads => trace
            .entries()
            .iter()
            .any(|e| matches!(e.kind, TraceKind::Activated)),

        CriterionCheck::ProcessesAll => {
            let windows = fixture_windows(trace);
            fixtures.iter().enumerate().all(|(idx, fixture)| {
                if !fixture.scored() {
                    return true;
                }
                let window = windows.get(&idx).map(Vec::as_slice).unwrap_or_default();
                fixture.expected.matches(window)
            })
        }

        CriterionCheck::WellFormed => all_emitted(trace).iter().all(|m| !m.kind.is_empty()),

        CriterionCheck::StatsAccuracy => stats_accurate(trace),

        CriterionCheck::BroadcastObserved { kind, min_count } => {
            let first_tick_seq = trace
                .entries()
                .iter()
                .find(|e| matches!(e.kind, TraceKind::TickAdvanced { .. }))
                .map(|e| e.seq);
            let Some(first_tick_seq) = first_tick_seq else {
                return false;
            };
            let observed = trace
                .entries()
                .iter()
                .filter(|e| e.seq > first_tick_seq)
                .filter(
                    |e| matches!(&e.kind, TraceKind::Emitted { message } if &message.kind == kind),
                )
                .count();
            observed >= *min_count
        }

        CriterionCheck::PersistenceEvidence => trace
            .entries()
            .iter()
            .any(|e| matches!(e.kind, TraceKind::SideEffect { bytes, .. } if bytes > 0)),

        CriterionCheck::CommandEvidence => trace.entries().iter().any(|e| {
            matches!(
                e.kind,
                TraceKind::CommandExecuted { return_code: 0, .. }
            )
        }),

        CriterionCheck::Safety => trace.violation_count() == 0,

        CriterionCheck::Resilient => trace.fault_count() == 0,

        CriterionCheck::SyncRoundTrip { within_ticks } => sync_round_trip(trace, *within_ticks),

        CriterionCheck::AggregateWithin {
            sample_kind,
            sample_path,
            aggregate_kind,
            aggregate_path,
            tolerance,
        } => aggregate_within(
            trace,
            sample_kind,
            sample_path,
            aggregate_kind,
            aggregate_path,
            *tolerance,
        ),

        CriterionCheck::BothRolesEmitted => {
            !trace.emitted_by(Role::Source).is_empty() && !trace.emitted_by(Role::Sync).is_empty()
        }
    }
}

/// Outbound messages attributed to each fixture index: everything the
/// source role emitted since that fixture's delivery and before the
/// next one. Relayed deliveries (no fixture index) close the window.
fn fixture_windows(trace: &Trace) -> BTreeMap<usize, Vec<&Message>> {
    let mut windows: BTreeMap<usize, Vec<&Message>> = BTreeMap::new();
    let mut current: Option<usize> = None;

    for entry in trace.entries().iter().filter(|e| e.role == Role::Source) {
        match &entry.kind {
            TraceKind::Delivered { fixture, .. } => current = *fixture,
            TraceKind::Emitted { message } => {
                if let Some(idx) = current {
                    windows.entry(idx).or_default().push(message);
                }
            }
            _ => {}
        }
    }
    windows
}

fn all_emitted(trace: &Trace) -> Vec<&Message> {
    trace
        .entries()
        .iter()
        .filter_map(|e| match &e.kind {
            TraceKind::Emitted { message } => Some(message),
            _ => None,
        })
        .collect()
}

/// Recompute the expected stats from the delivered fixture messages
/// and compare against the emitted stats_response.
fn stats_accurate(trace: &Trace) -> bool {
    let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut total = 0u64;
    for entry in trace.entries() {
        if let TraceKind::Delivered {
            fixture: Some(_),
            message,
        } = &entry.kind
        {
            total += 1;
            *by_type.entry(message.kind.clone()).or_default() += 1;
        }
    }

    let expected_by_type = serde_json::to_value(&by_type).unwrap_or_default();

    all_emitted(trace)
        .iter()
        .filter(|m| m.kind == "stats_response")
        .any(|m| {
            m.payload_path("total_messages") == Some(&serde_json::json!(total))
                && m.payload_path("by_type") == Some(&expected_by_type)
        })
}

/// sync_request (sync) -> sync_response (source) -> sync_complete
/// (sync), in seq order, completing within the tick budget.
fn sync_round_trip(trace: &Trace, within_ticks: u64) -> bool {
    let request = trace.entries().iter().find(|e| {
        e.role == Role::Sync
            && matches!(&e.kind, TraceKind::Emitted { message } if message.kind == "sync_request")
    });
    let Some(request) = request else {
        return false;
    };

    let response = trace.entries().iter().find(|e| {
        e.seq > request.seq
            && e.role == Role::Source
            && matches!(&e.kind, TraceKind::Emitted { message } if message.kind == "sync_response")
    });
    let Some(response) = response else {
        return false;
    };

    trace
        .entries()
        .iter()
        .find(|e| {
            e.seq > response.seq
                && e.role == Role::Sync
                && matches!(&e.kind, TraceKind::Emitted { message } if message.kind == "sync_complete")
        })
        .is_some_and(|complete| complete.tick.saturating_sub(request.tick) <= within_ticks)
}

/// The aggregate reported in the completion message must equal the
/// arithmetic mean of the sampled values within tolerance.
fn aggregate_within(
    trace: &Trace,
    sample_kind: &str,
    sample_path: &str,
    aggregate_kind: &str,
    aggregate_path: &str,
    tolerance: f64,
) -> bool {
    let samples: Vec<f64> = all_emitted(trace)
        .iter()
        .filter(|m| m.kind == sample_kind)
        .filter_map(|m| m.payload_path(sample_path).and_then(|v| v.as_f64()))
        .collect();
    if samples.is_empty() {
        return false;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;

    all_emitted(trace)
        .iter()
        .filter(|m| m.kind == aggregate_kind)
        .filter_map(|m| m.payload_path(aggregate_path).and_then(|v| v.as_f64()))
        .any(|aggregate| (aggregate - mean).abs() <= tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbench_core::domain::Message;
    use serde_json::json;
    use uuid::Uuid;

    fn emitted(trace: &mut Trace, tick: u64, role: Role, kind: &str, payload: serde_json::Value) {
        trace.record(
            tick,
            role,
            TraceKind::Emitted {
                message: Message::new(kind, payload),
            },
        );
    }

    fn delivered(trace: &mut Trace, tick: u64, fixture: usize, kind: &str) {
        trace.record(
            tick,
            Role::Source,
            TraceKind::Delivered {
                fixture: Some(fixture),
                message: Message::new(kind, json!(null)),
            },
        );
    }

    fn echo_trace() -> Trace {
        let mut trace = Trace::new(Uuid::new_v4());
        trace.record(0, Role::Source, TraceKind::Activated);
        trace.record(
            0,
            Role::Source,
            TraceKind::Delivered {
                fixture: Some(0),
                message: Message::new("echo", json!("Hello")).with_from("test123"),
            },
        );
        emitted(&mut trace, 0, Role::Source, "echo_response", json!("ECHO: Hello"));
        trace.record(
            0,
            Role::Source,
            TraceKind::Delivered {
                fixture: Some(1),
                message: Message::new("echo", json!("World")).with_from("peer42"),
            },
        );
        emitted(&mut trace, 0, Role::Source, "echo_response", json!("ECHO: World"));
        trace.record(
            0,
            Role::Source,
            TraceKind::Delivered {
                fixture: Some(2),
                message: Message::new("gossip", json!("not for you")),
            },
        );
        trace
    }

    #[test]
    fn test_perfect_echo_scores_100() {
        let breakdown = score(&echo_trace(), Level::Echo);
        assert_eq!(breakdown.total, 100);
        assert_eq!(breakdown.functionality, 60);
        assert_eq!(breakdown.quality, 40);
    }

    #[test]
    fn test_load_failure_scores_explicit_zero() {
        let mut trace = Trace::new(Uuid::new_v4());
        trace.record(
            0,
            Role::Source,
            TraceKind::LoadFailed {
                detail: "no *Handler class".to_string(),
            },
        );

        let breakdown = score(&trace, Level::Echo);
        assert_eq!(breakdown.total, 0);
        assert_eq!(breakdown.criteria.len(), Level::Echo.rubric().criteria.len());
        assert!(breakdown.criteria.iter().all(|c| c.points == 0));
    }

    #[test]
    fn test_spurious_reply_fails_processes() {
        let mut trace = echo_trace();
        // The gossip fixture demands silence.
        emitted(&mut trace, 0, Role::Source, "echo_response", json!("ECHO: not for you"));

        let breakdown = score(&trace, Level::Echo);
        assert_eq!(breakdown.criteria_map()["processes"], 0);
        assert_eq!(breakdown.criteria_map()["loads"], 20);
    }

    #[test]
    fn test_fault_zeroes_resilience_only() {
        let mut trace = echo_trace();
        trace.record(
            0,
            Role::Source,
            TraceKind::RuntimeFault {
                fixture: Some(1),
                detail: "TypeError".to_string(),
            },
        );

        let breakdown = score(&trace, Level::Echo);
        assert_eq!(breakdown.criteria_map()["resilience"], 0);
        assert_eq!(breakdown.criteria_map()["loads"], 20);
    }

    fn counter_trace(total: u64, chat: u64) -> Trace {
        let mut trace = Trace::new(Uuid::new_v4());
        trace.record(0, Role::Source, TraceKind::Activated);
        delivered(&mut trace, 0, 0, "chat");
        delivered(&mut trace, 0, 1, "chat");
        delivered(&mut trace, 0, 2, "data");
        delivered(&mut trace, 0, 3, "stats");
        emitted(
            &mut trace,
            0,
            Role::Source,
            "stats_response",
            json!({
                "total_messages": total,
                "by_type": {"chat": chat, "data": 1, "stats": 1}
            }),
        );
        trace.record(1, Role::Source, TraceKind::TickAdvanced { seconds: 30 });
        emitted(&mut trace, 1, Role::Source, "counter_broadcast", json!({"count": total}));
        trace
    }

    #[test]
    fn test_counter_scenario_counts_all_four_messages() {
        let breakdown = score(&counter_trace(4, 2), Level::Counter);
        assert_eq!(breakdown.criteria_map()["accuracy"], 25);
        assert_eq!(breakdown.criteria_map()["processes"], 25);
        assert_eq!(breakdown.criteria_map()["broadcast"], 10);
        assert_eq!(breakdown.total, 100);
    }

    #[test]
    fn test_counter_wrong_total_fails_accuracy() {
        let breakdown = score(&counter_trace(3, 2), Level::Counter);
        assert_eq!(breakdown.criteria_map()["accuracy"], 0);
        // The response type is still right, so processes holds.
        assert_eq!(breakdown.criteria_map()["processes"], 25);
    }

    #[test]
    fn test_counter_wrong_breakdown_fails_accuracy() {
        let breakdown = score(&counter_trace(4, 3), Level::Counter);
        assert_eq!(breakdown.criteria_map()["accuracy"], 0);
    }

    #[test]
    fn test_broadcast_before_any_tick_does_not_count() {
        let mut trace = Trace::new(Uuid::new_v4());
        trace.record(0, Role::Source, TraceKind::Activated);
        emitted(&mut trace, 0, Role::Source, "counter_broadcast", json!({}));

        let held = holds(
            &CriterionCheck::BroadcastObserved {
                kind: "counter_broadcast".to_string(),
                min_count: 1,
            },
            &trace,
            &[],
        );
        assert!(!held);
    }

    #[test]
    fn test_security_violation_zeroes_safety() {
        let mut trace = Trace::new(Uuid::new_v4());
        trace.record(0, Role::Source, TraceKind::Activated);
        trace.record(
            0,
            Role::Source,
            TraceKind::SecurityViolation {
                detail: "command not in allow list: \"rm\"".to_string(),
            },
        );
        trace.record(
            0,
            Role::Source,
            TraceKind::CommandExecuted {
                command: "date".to_string(),
                return_code: 0,
                execution_time_ms: 12,
            },
        );

        let breakdown = score(&trace, Level::Executor);
        assert_eq!(breakdown.criteria_map()["safety"], 0);
        assert_eq!(breakdown.criteria_map()["evidence"], 20);
    }

    #[test]
    fn test_side_effect_evidence_for_collector() {
        let mut trace = Trace::new(Uuid::new_v4());
        trace.record(0, Role::Source, TraceKind::Activated);
        trace.record(
            0,
            Role::Source,
            TraceKind::SideEffect {
                path: "collection.json".to_string(),
                bytes: 64,
            },
        );

        let breakdown = score(&trace, Level::Collector);
        assert_eq!(breakdown.criteria_map()["persistence"], 25);
    }

    fn sync_trace(avg_cpu: f64, complete_tick: u64) -> Trace {
        let mut trace = Trace::new(Uuid::new_v4());
        trace.record(0, Role::Source, TraceKind::Activated);
        trace.record(0, Role::Sync, TraceKind::Activated);
        emitted(&mut trace, 1, Role::Sync, "sync_request", json!({"round": 1}));
        emitted(
            &mut trace,
            2,
            Role::Source,
            "sync_response",
            json!({"metrics": {"cpu": 30.0}}),
        );
        emitted(
            &mut trace,
            2,
            Role::Source,
            "sync_response",
            json!({"metrics": {"cpu": 40.0}}),
        );
        emitted(
            &mut trace,
            complete_tick,
            Role::Sync,
            "sync_complete",
            json!({"nodes": 2, "avg_cpu": avg_cpu}),
        );
        trace
    }

    #[test]
    fn test_sync_aggregate_within_tolerance() {
        let breakdown = score(&sync_trace(35.0, 3), Level::Sync);
        assert_eq!(breakdown.criteria_map()["aggregation"], 25);
        assert_eq!(breakdown.criteria_map()["round_trip"], 30);
        assert_eq!(breakdown.criteria_map()["liveness"], 15);
    }

    #[test]
    fn test_sync_aggregate_outside_tolerance_fails() {
        let breakdown = score(&sync_trace(38.0, 3), Level::Sync);
        assert_eq!(breakdown.criteria_map()["aggregation"], 0);
    }

    #[test]
    fn test_sync_round_trip_over_budget_fails() {
        let breakdown = score(&sync_trace(35.0, 25), Level::Sync);
        assert_eq!(breakdown.criteria_map()["round_trip"], 0);
        // Aggregation is about values, not latency.
        assert_eq!(breakdown.criteria_map()["aggregation"], 25);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let trace = echo_trace();
        let first = score(&trace, Level::Echo);
        let second = score(&trace, Level::Echo);
        assert_eq!(first, second);
    }
}
