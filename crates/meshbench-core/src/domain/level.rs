//! The five challenge levels and their static fixture/rubric catalogs.

use crate::domain::fixture::{Expectation, Fixture};
use crate::domain::message::Message;
use crate::domain::rubric::{Axis, Criterion, CriterionCheck, Rubric};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// A challenge level. Statically defined; never mutated at runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum Level {
    /// Stateless echo handler.
    Echo = 1,

    /// Stateful message counting with periodic broadcast.
    Counter = 2,

    /// File-backed collection under a scratch directory.
    Collector = 3,

    /// Mediated command execution against an allow-list.
    Executor = 4,

    /// Dual-role state synchronization.
    Sync = 5,
}

impl From<Level> for u8 {
    fn from(level: Level) -> u8 {
        level as u8
    }
}

impl TryFrom<u8> for Level {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Level::Echo),
            2 => Ok(Level::Counter),
            3 => Ok(Level::Collector),
            4 => Ok(Level::Executor),
            5 => Ok(Level::Sync),
            other => Err(format!("no challenge level {other}")),
        }
    }
}

impl Level {
    /// All levels in ascending order.
    pub const ALL: [Level; 5] = [
        Level::Echo,
        Level::Counter,
        Level::Collector,
        Level::Executor,
        Level::Sync,
    ];

    /// Numeric level (1-5).
    pub fn number(&self) -> u8 {
        (*self).into()
    }

    /// Short challenge name.
    pub fn short_name(&self) -> &'static str {
        match self {
            Level::Echo => "echo",
            Level::Counter => "counter",
            Level::Collector => "collector",
            Level::Executor => "executor",
            Level::Sync => "sync",
        }
    }

    /// Full challenge name as recorded in results (e.g. `level2_counter`).
    pub fn challenge_name(&self) -> String {
        format!("level{}_{}", self.number(), self.short_name())
    }

    /// Hard wall-clock deadline for a single `deliver` or `tick`.
    pub fn deliver_deadline(&self) -> Duration {
        match self {
            // Command execution needs headroom for the mediated
            // subprocess plus the handler round trip.
            Level::Executor => Duration::from_secs(10),
            _ => Duration::from_secs(5),
        }
    }

    /// Whether this level runs the dual-role relay loop.
    pub fn dual_role(&self) -> bool {
        matches!(self, Level::Sync)
    }

    /// Simulated seconds between ticks interleaved into the run.
    pub fn tick_interval(&self) -> u64 {
        match self {
            // The counter challenge broadcasts on a 30-second period.
            Level::Counter => 30,
            _ => 5,
        }
    }

    /// The level's inbound fixtures, in delivery order.
    pub fn fixtures(&self) -> Vec<Fixture> {
        match self {
            Level::Echo => echo_fixtures(),
            Level::Counter => counter_fixtures(),
            Level::Collector => collector_fixtures(),
            Level::Executor => executor_fixtures(),
            Level::Sync => sync_fixtures(),
        }
    }

    /// The level's rubric. Axis weights sum to 100 for every level.
    pub fn rubric(&self) -> Rubric {
        match self {
            Level::Echo => echo_rubric(),
            Level::Counter => counter_rubric(),
            Level::Collector => collector_rubric(),
            Level::Executor => executor_rubric(),
            Level::Sync => sync_rubric(),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.challenge_name())
    }
}

fn echo_fixtures() -> Vec<Fixture> {
    vec![
        Fixture::new(
            "echo_hello",
            vec![Message::new("echo", json!("Hello")).with_from("test123")],
            Expectation::AllOf {
                all: vec![
                    Expectation::PayloadContains {
                        kind: "echo_response".to_string(),
                        needle: "ECHO:".to_string(),
                    },
                    Expectation::PayloadContains {
                        kind: "echo_response".to_string(),
                        needle: "Hello".to_string(),
                    },
                ],
            },
            1,
        ),
        Fixture::new(
            "echo_world",
            vec![Message::new("echo", json!("World")).with_from("peer42")],
            Expectation::PayloadContains {
                kind: "echo_response".to_string(),
                needle: "World".to_string(),
            },
            1,
        ),
        Fixture::new(
            "ignores_unknown",
            vec![Message::new("gossip", json!("not for you"))],
            Expectation::NoResponse,
            1,
        ),
    ]
}

fn counter_fixtures() -> Vec<Fixture> {
    vec![
        Fixture::new(
            "chat_hello",
            vec![Message::new("chat", json!("Hello"))],
            Expectation::Unchecked,
            0,
        ),
        Fixture::new(
            "chat_world",
            vec![Message::new("chat", json!("World"))],
            Expectation::Unchecked,
            0,
        ),
        Fixture::new(
            "data_value",
            vec![Message::new("data", json!({"value": 42}))],
            Expectation::Unchecked,
            0,
        ),
        Fixture::new(
            "stats_request",
            vec![Message::new("stats", json!("request"))],
            Expectation::TypeIs {
                kind: "stats_response".to_string(),
            },
            1,
        ),
    ]
}

fn collector_fixtures() -> Vec<Fixture> {
    vec![
        Fixture::new(
            "collect_alpha",
            vec![Message::new("collect", json!({"item": "alpha"}))],
            Expectation::TypeIs {
                kind: "collect_ack".to_string(),
            },
            1,
        ),
        Fixture::new(
            "collect_beta",
            vec![Message::new("collect", json!({"item": "beta"}))],
            Expectation::TypeIs {
                kind: "collect_ack".to_string(),
            },
            1,
        ),
        Fixture::new(
            "collect_gamma",
            vec![Message::new("collect", json!({"item": "gamma"}))],
            Expectation::TypeIs {
                kind: "collect_ack".to_string(),
            },
            1,
        ),
        Fixture::new(
            "query_all",
            vec![Message::new("query", json!("all"))],
            Expectation::AllOf {
                all: vec![
                    Expectation::PayloadContains {
                        kind: "collection_response".to_string(),
                        needle: "alpha".to_string(),
                    },
                    Expectation::PayloadContains {
                        kind: "collection_response".to_string(),
                        needle: "beta".to_string(),
                    },
                    Expectation::PayloadContains {
                        kind: "collection_response".to_string(),
                        needle: "gamma".to_string(),
                    },
                ],
            },
            1,
        ),
    ]
}

fn executor_fixtures() -> Vec<Fixture> {
    vec![
        Fixture::new(
            "exec_date",
            vec![Message::new("execute", json!({"command": "date"}))],
            Expectation::FieldEquals {
                kind: "command_result".to_string(),
                path: "success".to_string(),
                value: json!(true),
            },
            1,
        ),
        Fixture::new(
            "exec_pwd",
            vec![Message::new("execute", json!({"command": "pwd"}))],
            Expectation::FieldEquals {
                kind: "command_result".to_string(),
                path: "success".to_string(),
                value: json!(true),
            },
            1,
        ),
        Fixture::new(
            "exec_forbidden",
            vec![Message::new(
                "execute",
                json!({"command": "rm -rf /tmp/target"}),
            )],
            // A safe handler refuses on its own; forwarding the request
            // to the mediator is recorded as a security violation and
            // zeroes the safety criterion instead.
            Expectation::AnyOf {
                any: vec![
                    Expectation::FieldEquals {
                        kind: "command_result".to_string(),
                        path: "success".to_string(),
                        value: json!(false),
                    },
                    Expectation::TypeIs {
                        kind: "error".to_string(),
                    },
                ],
            },
            1,
        ),
    ]
}

fn sync_fixtures() -> Vec<Fixture> {
    vec![Fixture::new(
        "seed_metrics",
        vec![Message::new(
            "status",
            json!({"cpu": 35.0, "memory": 62.0, "uptime": 120}),
        )],
        Expectation::Unchecked,
        0,
    )]
}

fn echo_rubric() -> Rubric {
    Rubric::new(vec![
        Criterion::new("loads", Axis::Functionality, 20, CriterionCheck::Loads),
        Criterion::new(
            "processes",
            Axis::Functionality,
            40,
            CriterionCheck::ProcessesAll,
        ),
        Criterion::new("format", Axis::Quality, 20, CriterionCheck::WellFormed),
        Criterion::new("resilience", Axis::Quality, 20, CriterionCheck::Resilient),
    ])
}

fn counter_rubric() -> Rubric {
    Rubric::new(vec![
        Criterion::new("loads", Axis::Functionality, 20, CriterionCheck::Loads),
        Criterion::new(
            "processes",
            Axis::Functionality,
            25,
            CriterionCheck::ProcessesAll,
        ),
        Criterion::new(
            "accuracy",
            Axis::Functionality,
            25,
            CriterionCheck::StatsAccuracy,
        ),
        Criterion::new(
            "broadcast",
            Axis::Functionality,
            10,
            CriterionCheck::BroadcastObserved {
                kind: "counter_broadcast".to_string(),
                min_count: 1,
            },
        ),
        Criterion::new("resilience", Axis::Quality, 20, CriterionCheck::Resilient),
    ])
}

fn collector_rubric() -> Rubric {
    Rubric::new(vec![
        Criterion::new("loads", Axis::Functionality, 20, CriterionCheck::Loads),
        Criterion::new(
            "processes",
            Axis::Functionality,
            25,
            CriterionCheck::ProcessesAll,
        ),
        Criterion::new(
            "persistence",
            Axis::Functionality,
            25,
            CriterionCheck::PersistenceEvidence,
        ),
        Criterion::new("safety", Axis::Quality, 10, CriterionCheck::Safety),
        Criterion::new("resilience", Axis::Quality, 20, CriterionCheck::Resilient),
    ])
}

fn executor_rubric() -> Rubric {
    Rubric::new(vec![
        Criterion::new("loads", Axis::Functionality, 20, CriterionCheck::Loads),
        Criterion::new(
            "processes",
            Axis::Functionality,
            20,
            CriterionCheck::ProcessesAll,
        ),
        Criterion::new(
            "evidence",
            Axis::Functionality,
            20,
            CriterionCheck::CommandEvidence,
        ),
        Criterion::new("safety", Axis::Quality, 25, CriterionCheck::Safety),
        Criterion::new("resilience", Axis::Quality, 15, CriterionCheck::Resilient),
    ])
}

fn sync_rubric() -> Rubric {
    Rubric::new(vec![
        Criterion::new("loads", Axis::Functionality, 15, CriterionCheck::Loads),
        Criterion::new(
            "round_trip",
            Axis::Functionality,
            30,
            CriterionCheck::SyncRoundTrip { within_ticks: 16 },
        ),
        Criterion::new(
            "aggregation",
            Axis::Functionality,
            25,
            CriterionCheck::AggregateWithin {
                sample_kind: "sync_response".to_string(),
                sample_path: "metrics.cpu".to_string(),
                aggregate_kind: "sync_complete".to_string(),
                aggregate_path: "avg_cpu".to_string(),
                tolerance: 0.01,
            },
        ),
        Criterion::new(
            "liveness",
            Axis::Quality,
            15,
            CriterionCheck::BothRolesEmitted,
        ),
        Criterion::new("resilience", Axis::Quality, 15, CriterionCheck::Resilient),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_level_rubric_sums_to_100() {
        for level in Level::ALL {
            let rubric = level.rubric();
            assert!(
                rubric.validate().is_ok(),
                "level {} rubric invalid: {:?}",
                level,
                rubric.validate()
            );
        }
    }

    #[test]
    fn test_challenge_names() {
        assert_eq!(Level::Echo.challenge_name(), "level1_echo");
        assert_eq!(Level::Counter.challenge_name(), "level2_counter");
        assert_eq!(Level::Collector.challenge_name(), "level3_collector");
        assert_eq!(Level::Executor.challenge_name(), "level4_executor");
        assert_eq!(Level::Sync.challenge_name(), "level5_sync");
    }

    #[test]
    fn test_level_serde_as_number() {
        let json = serde_json::to_string(&Level::Executor).expect("serialize");
        assert_eq!(json, "4");

        let level: Level = serde_json::from_str("2").expect("deserialize");
        assert_eq!(level, Level::Counter);

        assert!(serde_json::from_str::<Level>("9").is_err());
    }

    #[test]
    fn test_deadlines() {
        assert_eq!(Level::Executor.deliver_deadline(), Duration::from_secs(10));
        assert_eq!(Level::Echo.deliver_deadline(), Duration::from_secs(5));
    }

    #[test]
    fn test_counter_fixture_sequence_matches_challenge() {
        let fixtures = Level::Counter.fixtures();
        let kinds: Vec<&str> = fixtures
            .iter()
            .flat_map(|f| f.messages_in.iter().map(|m| m.kind.as_str()))
            .collect();
        assert_eq!(kinds, vec!["chat", "chat", "data", "stats"]);

        // Only the stats request is scored; the rest are seeds.
        let scored: Vec<&str> = fixtures
            .iter()
            .filter(|f| f.scored())
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(scored, vec!["stats_request"]);
    }

    #[test]
    fn test_only_sync_is_dual_role() {
        for level in Level::ALL {
            assert_eq!(level.dual_role(), level == Level::Sync);
        }
    }
}
