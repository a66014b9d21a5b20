//! Protocol simulation.
//!
//! Drives handler instances through a level's fixtures and, for level
//! 5, a discrete-event relay loop between the two roles. Everything is
//! recorded into the trace as it happens; no wall-clock time is
//! involved, so identical sources produce identical traces.

use crate::sandbox::{DeliverOutcome, HandlerFault, HandlerInstance, HandlerSandbox, LoadResult};
use meshbench_core::domain::{HarnessError, Level, Message, Result, Role, Trace, TraceKind};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Handler source per role.
#[derive(Debug, Clone)]
pub struct SourceSet {
    sources: HashMap<Role, String>,
}

impl SourceSet {
    /// Single-role set for levels 1-4.
    pub fn single(source: impl Into<String>) -> Self {
        let mut sources = HashMap::new();
        sources.insert(Role::Source, source.into());
        Self { sources }
    }

    /// Dual-role set for level 5.
    pub fn dual(source: impl Into<String>, sync: impl Into<String>) -> Self {
        let mut sources = HashMap::new();
        sources.insert(Role::Source, source.into());
        sources.insert(Role::Sync, sync.into());
        Self { sources }
    }

    /// The set a level needs, reusing one handler source for both
    /// roles on level 5.
    pub fn for_level(level: Level, source: &str) -> Self {
        if level.dual_role() {
            Self::dual(source, source)
        } else {
            Self::single(source)
        }
    }

    /// Source text for a role.
    pub fn get(&self, role: Role) -> Option<&str> {
        self.sources.get(&role).map(String::as_str)
    }

    /// Role-ordered (role, source) pairs, for digesting.
    pub fn ordered(&self) -> Vec<(Role, &str)> {
        Role::ORDERED
            .iter()
            .filter_map(|r| self.sources.get(r).map(|s| (*r, s.as_str())))
            .collect()
    }
}

/// Tunables for the discrete-event loop.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Upper bound on level-5 relay ticks when no sync round ever
    /// opens.
    pub max_sync_ticks: u64,

    /// Tick budget for an open sync round. A round still incomplete
    /// past it is recorded as a resilience failure and ends the loop.
    pub round_trip_deadline: u64,

    /// Simulated seconds each level-5 tick advances the instances.
    pub tick_step_seconds: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            max_sync_ticks: 32,
            round_trip_deadline: 16,
            tick_step_seconds: 5,
        }
    }
}

/// Drives one evaluation run and produces its trace.
#[derive(Debug, Clone, Default)]
pub struct ProtocolSimulator {
    config: SimulatorConfig,
}

impl ProtocolSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SimulatorConfig) -> Self {
        Self { config }
    }

    /// Run one level against the given sources and return the
    /// finalized trace. Only infrastructure faults are errors; every
    /// candidate behavior ends up in the trace.
    pub async fn run_level(
        &self,
        sandbox: &dyn HandlerSandbox,
        sources: &SourceSet,
        level: Level,
    ) -> Result<Trace> {
        let mut trace = Trace::new(Uuid::new_v4());
        info!(run_id = %trace.run_id, level = %level, "starting simulation");

        let roles: &[Role] = if level.dual_role() {
            &Role::ORDERED
        } else {
            &[Role::Source]
        };

        // Load every role up front; a rejected load short-circuits the
        // run with a terminal trace entry.
        let mut instances: HashMap<Role, Box<dyn HandlerInstance>> = HashMap::new();
        for role in roles {
            let source = require_source(sources, *role)?;
            match sandbox.load(source, *role).await? {
                LoadResult::Ready(instance) => {
                    instances.insert(*role, instance);
                }
                LoadResult::Rejected(err) => {
                    trace.record(
                        0,
                        *role,
                        TraceKind::LoadFailed {
                            detail: err.to_string(),
                        },
                    );
                    terminate_all(&mut instances).await;
                    return Ok(trace);
                }
            }
        }
        for role in roles {
            trace.record(0, *role, TraceKind::Activated);
        }

        let result = if level.dual_role() {
            self.drive_dual(&mut instances, level, &mut trace).await
        } else {
            self.drive_single(&mut instances, level, &mut trace).await
        };

        if result.is_ok() {
            let final_tick = trace.entries().last().map(|e| e.tick).unwrap_or(0);
            for role in roles {
                if let Some(instance) = instances.get(role) {
                    for (path, bytes) in instance.side_effects() {
                        trace.record(final_tick, *role, TraceKind::SideEffect { path, bytes });
                    }
                }
            }
        }

        // Teardown always runs; a run never leaks an instance.
        terminate_all(&mut instances).await;
        result?;

        info!(run_id = %trace.run_id, summary = %trace.summary(), "simulation finished");
        Ok(trace)
    }

    /// Levels 1-4: deliver fixtures in order, interleaving the level's
    /// periodic tick between them.
    async fn drive_single(
        &self,
        instances: &mut HashMap<Role, Box<dyn HandlerInstance>>,
        level: Level,
        trace: &mut Trace,
    ) -> Result<()> {
        let Some(instance) = instances.get_mut(&Role::Source) else {
            return Err(HarnessError::Infrastructure(
                "source instance missing after load".to_string(),
            ));
        };

        let mut tick = 0u64;

        for (idx, fixture) in level.fixtures().iter().enumerate() {
            debug!(fixture = %fixture.name, "delivering fixture");

            for message in &fixture.messages_in {
                trace.record(
                    tick,
                    Role::Source,
                    TraceKind::Delivered {
                        fixture: Some(idx),
                        message: message.clone(),
                    },
                );
                let outcome = instance.deliver(message).await?;
                if record_outcome(trace, tick, Role::Source, Some(idx), outcome) {
                    // Deadline exceeded: remaining fixtures are
                    // skipped for this instance.
                    return Ok(());
                }
            }

            // Interleave the level's periodic tick so timer-driven
            // broadcasts surface without real sleeping.
            tick += 1;
            let seconds = level.tick_interval();
            trace.record(tick, Role::Source, TraceKind::TickAdvanced { seconds });
            let outcome = instance.tick(seconds).await?;
            if record_outcome(trace, tick, Role::Source, Some(idx), outcome) {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Level 5: seed the source instance, then run the relay loop.
    /// Each tick drains the messages the peer emitted on the previous
    /// tick (one-tick relay latency), then advances both clocks.
    /// Same-tick work is ordered source-before-sync. A round left open
    /// past its tick budget is recorded as incomplete and ends the
    /// loop.
    async fn drive_dual(
        &self,
        instances: &mut HashMap<Role, Box<dyn HandlerInstance>>,
        level: Level,
        trace: &mut Trace,
    ) -> Result<()> {
        let mut next_inbox: HashMap<Role, Vec<Message>> = HashMap::new();
        let mut dead: HashMap<Role, bool> = HashMap::new();
        let mut completed = false;
        let mut round_opened: Option<u64> = None;

        // Seed fixtures go to the source instance at tick 0.
        for (idx, fixture) in level.fixtures().iter().enumerate() {
            let Some(instance) = instances.get_mut(&Role::Source) else {
                break;
            };
            for message in &fixture.messages_in {
                trace.record(
                    0,
                    Role::Source,
                    TraceKind::Delivered {
                        fixture: Some(idx),
                        message: message.clone(),
                    },
                );
                let outcome = instance.deliver(message).await?;
                next_inbox
                    .entry(Role::Sync)
                    .or_default()
                    .extend(outcome.emitted.clone());
                if record_outcome(trace, 0, Role::Source, Some(idx), outcome) {
                    dead.insert(Role::Source, true);
                }
            }
        }

        let mut tick = 0u64;
        while tick < self.config.max_sync_ticks && !completed {
            tick += 1;
            let mut inbox = std::mem::take(&mut next_inbox);

            for role in Role::ORDERED {
                if dead.get(&role).copied().unwrap_or(false) {
                    continue;
                }
                let Some(instance) = instances.get_mut(&role) else {
                    continue;
                };
                let peer = peer_of(role);

                for message in inbox.remove(&role).unwrap_or_default() {
                    trace.record(
                        tick,
                        role,
                        TraceKind::Delivered {
                            fixture: None,
                            message: message.clone(),
                        },
                    );
                    let outcome = instance.deliver(&message).await?;
                    note_sync_round(
                        role,
                        &outcome.emitted,
                        tick,
                        &mut round_opened,
                        &mut completed,
                    );
                    next_inbox
                        .entry(peer)
                        .or_default()
                        .extend(outcome.emitted.clone());
                    if record_outcome(trace, tick, role, None, outcome) {
                        dead.insert(role, true);
                        break;
                    }
                }

                if dead.get(&role).copied().unwrap_or(false) {
                    continue;
                }

                let seconds = self.config.tick_step_seconds;
                trace.record(tick, role, TraceKind::TickAdvanced { seconds });
                let outcome = instance.tick(seconds).await?;
                note_sync_round(role, &outcome.emitted, tick, &mut round_opened, &mut completed);
                next_inbox
                    .entry(peer)
                    .or_default()
                    .extend(outcome.emitted.clone());
                if record_outcome(trace, tick, role, None, outcome) {
                    dead.insert(role, true);
                }
            }

            // Cut a round that can no longer complete within its
            // budget.
            if !completed {
                if let Some(opened) = round_opened {
                    if tick.saturating_sub(opened) >= self.config.round_trip_deadline {
                        trace.record(
                            tick,
                            Role::Sync,
                            TraceKind::SyncRoundIncomplete {
                                deadline_ticks: self.config.round_trip_deadline,
                            },
                        );
                        return Ok(());
                    }
                }
            }
        }

        if !completed {
            trace.record(
                tick,
                Role::Sync,
                TraceKind::SyncRoundIncomplete {
                    deadline_ticks: self.config.round_trip_deadline,
                },
            );
        }

        Ok(())
    }
}

fn peer_of(role: Role) -> Role {
    match role {
        Role::Source => Role::Sync,
        Role::Sync => Role::Source,
    }
}

/// Track sync-round progress from one outcome's emissions. Only the
/// sync role opens and completes rounds; the first request starts the
/// round clock.
fn note_sync_round(
    role: Role,
    emitted: &[Message],
    tick: u64,
    round_opened: &mut Option<u64>,
    completed: &mut bool,
) {
    if role != Role::Sync {
        return;
    }
    for message in emitted {
        match message.kind.as_str() {
            "sync_request" => {
                round_opened.get_or_insert(tick);
            }
            "sync_complete" => *completed = true,
            _ => {}
        }
    }
}

fn require_source(sources: &SourceSet, role: Role) -> Result<&str> {
    sources.get(role).ok_or_else(|| {
        HarnessError::Infrastructure(format!("no handler source for role {}", role.as_str()))
    })
}

async fn terminate_all(instances: &mut HashMap<Role, Box<dyn HandlerInstance>>) {
    for instance in instances.values_mut() {
        instance.terminate().await;
    }
}

/// Fold one deliver/tick outcome into the trace. Returns true when the
/// instance timed out and its remaining deliveries must be skipped.
fn record_outcome(
    trace: &mut Trace,
    tick: u64,
    role: Role,
    fixture: Option<usize>,
    outcome: DeliverOutcome,
) -> bool {
    for message in outcome.emitted {
        trace.record(tick, role, TraceKind::Emitted { message });
    }
    for command in outcome.commands {
        trace.record(
            tick,
            role,
            TraceKind::CommandExecuted {
                command: command.command,
                return_code: command.return_code,
                execution_time_ms: command.execution_time_ms,
            },
        );
    }
    for detail in outcome.violations {
        trace.record(tick, role, TraceKind::SecurityViolation { detail });
    }
    match outcome.fault {
        Some(HandlerFault::Runtime { detail }) => {
            trace.record(tick, role, TraceKind::RuntimeFault { fixture, detail });
            false
        }
        Some(HandlerFault::Timeout { deadline_ms }) => {
            trace.record(
                tick,
                role,
                TraceKind::TimedOut {
                    fixture,
                    deadline_ms,
                },
            );
            true
        }
        None => false,
    }
}
