//! Property tests: random operation sequences never break progression rules.

mod common;

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use common::t0;
use questline::quest::catalog::{AnswerChecker, Task, TaskCatalog};
use questline::quest::engine::{Configuration, ProgressionEngine, SkipOutcome, TeamState};
use questline::quest::gate::Variant;
use questline::quest::progress::{MemoryBackend, TeamId, TeamProgress, TeamProgressStore};
use questline::quest::timer::{ManualClock, TimerPolicy};

#[derive(Debug, Clone)]
enum Op {
    Current,
    Start,
    Answer(bool),
    Skip,
    Wait(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Current),
        Just(Op::Start),
        any::<bool>().prop_map(Op::Answer),
        Just(Op::Skip),
        (0u64..120).prop_map(Op::Wait),
    ]
}

fn engine(dwells: &[u64], max_skips: Option<u32>) -> (ProgressionEngine, Arc<ManualClock>) {
    let tasks = dwells
        .iter()
        .enumerate()
        .map(|(i, &secs)| {
            let task = Task::new(format!("T{i}"), "", AnswerChecker::exact(["ok"], false));
            if secs == 0 {
                task
            } else {
                task.with_dwell(Duration::from_secs(secs))
            }
        })
        .collect();
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = ProgressionEngine::new(
        Variant::Final,
        Arc::new(Configuration {
            catalog: TaskCatalog::new(tasks).unwrap(),
            timer: TimerPolicy::PerTask,
            max_skips,
        }),
        TeamProgressStore::new(Variant::Final, Arc::new(MemoryBackend)),
        clock.clone(),
    );
    (engine, clock)
}

fn snapshot(engine: &ProgressionEngine, team: &TeamId) -> TeamProgress {
    engine.store().load(team).unwrap()
}

proptest! {
    #[test]
    fn progression_rules_hold(
        dwells in prop::collection::vec(prop_oneof![Just(0u64), 1u64..90], 1..6),
        max_skips in prop::option::of(0u32..3),
        ops in prop::collection::vec(op(), 0..60),
    ) {
        let (engine, clock) = engine(&dwells, max_skips);
        let team = TeamId::new("red");
        let len = i64::try_from(dwells.len()).unwrap();

        for op in ops {
            let before = snapshot(&engine, &team);
            match op {
                Op::Current => {
                    engine.current_task(&team).unwrap();
                    prop_assert_eq!(&snapshot(&engine, &team), &before);
                }
                Op::Start => {
                    engine.start_next_task(&team).unwrap();
                }
                Op::Answer(correct) => {
                    let outcome = engine
                        .try_answer(&team, if correct { "ok" } else { "nope" })
                        .unwrap();
                    let active = before.current_index >= 0 && before.current_index < len;
                    prop_assert_eq!(outcome.correct, correct && active);
                    if !outcome.correct {
                        prop_assert_eq!(&snapshot(&engine, &team), &before);
                    }
                }
                Op::Skip => {
                    let (outcome, _) = engine.skip_task(&team).unwrap();
                    let after = snapshot(&engine, &team);
                    match outcome {
                        SkipOutcome::Skipped { skips_used, .. } => {
                            prop_assert_eq!(skips_used, before.skips_used + 1);
                        }
                        _ => prop_assert_eq!(&after, &before),
                    }
                }
                Op::Wait(secs) => clock.advance(Duration::from_secs(secs)),
            }

            let after = snapshot(&engine, &team);
            // Never backwards, never more than one step.
            prop_assert!(after.current_index >= before.current_index);
            prop_assert!(after.current_index - before.current_index <= 1);
            prop_assert!(after.current_index >= -1 && after.current_index <= len);
            prop_assert_eq!(after.completed, after.current_index == len);
            if let Some(max) = max_skips {
                prop_assert!(after.skips_used <= max);
            }
            if before.completed {
                prop_assert_eq!(&after, &before);
            }
            if after.completed {
                prop_assert_eq!(engine.current_task(&team).unwrap(), TeamState::Completed);
            }
        }
    }
}
