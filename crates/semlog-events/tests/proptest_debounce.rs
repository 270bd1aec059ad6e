//! Property tests for the debouncer and the grasp detector.
//!
//! Signal sequences are generated per key as alternating begin/end pulses
//! with random gaps, then replayed in time order with flush ticks between
//! signals, the way a host loop drives the detectors.

use proptest::prelude::*;
use semlog_core::handle::ObjectHandle;
use semlog_core::identity::SemanticEntity;
use semlog_events::debounce::{Debounced, Debouncer};
use semlog_events::event::SemanticEvent;
use semlog_events::grasp::{GraspDetector, OverlapGroup};

const GAP: f64 = 0.12;
const TICK: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
enum Signal {
    Begin(u8, f64),
    End(u8, f64),
}

impl Signal {
    fn time(self) -> f64 {
        match self {
            Signal::Begin(_, t) | Signal::End(_, t) => t,
        }
    }
}

/// Gaps in whole ticks, so timing never lands on a float boundary.
fn pulses(key: u8) -> impl Strategy<Value = Vec<Signal>> {
    prop::collection::vec(1u32..40, 0..12).prop_map(move |gaps| {
        let mut t = 0.0;
        let mut out = Vec::new();
        for (i, g) in gaps.iter().enumerate() {
            t += *g as f64 * TICK + 0.001;
            out.push(if i % 2 == 0 {
                Signal::Begin(key, t)
            } else {
                Signal::End(key, t)
            });
        }
        out
    })
}

fn merged(seqs: Vec<Vec<Signal>>) -> Vec<Signal> {
    let mut all: Vec<Signal> = seqs.into_iter().flatten().collect();
    all.sort_by(|a, b| a.time().total_cmp(&b.time()));
    all
}

/// Replay `signals`, running a flush tick before each one, then finish.
fn replay(signals: &[Signal]) -> (Vec<Debounced<u8>>, usize) {
    let mut d = Debouncer::new(GAP);
    let mut events = Vec::new();
    for s in signals {
        d.flush_due(s.time());
        match *s {
            Signal::Begin(k, t) => {
                d.raw_begin(k, t);
            }
            Signal::End(k, t) => {
                d.raw_end(&k, t);
            }
        }
        events.extend(d.take_events());
    }
    let pending_at_finish = d.pending().len();
    let flushed = d.flush_all();
    assert_eq!(flushed, pending_at_finish);
    assert!(d.pending().is_empty());
    events.extend(d.take_events());
    (events, pending_at_finish)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn begins_and_ends_alternate_per_key(a in pulses(1), b in pulses(2), c in pulses(3)) {
        let signals = merged(vec![a, b, c]);
        let (events, _) = replay(&signals);
        for key in 1u8..=3 {
            let mine: Vec<&Debounced<u8>> = events.iter().filter(|e| *e.key() == key).collect();
            for (i, e) in mine.iter().enumerate() {
                prop_assert_eq!(e.is_begin(), i % 2 == 0, "key {} event {} out of order: {:?}", key, i, mine);
            }
            // Per-key event times never go backwards.
            for w in mine.windows(2) {
                prop_assert!(w[0].time() <= w[1].time());
            }
        }
    }

    #[test]
    fn short_gaps_are_suppressed(seq in pulses(1)) {
        let (events, _) = replay(&seq);
        // An end followed by a begin within the gap leaves no trace.
        for pair in seq.windows(2) {
            if let [Signal::End(_, t0), Signal::Begin(_, t1)] = pair {
                if t1 - t0 < GAP {
                    prop_assert!(!events.iter().any(|e| !e.is_begin() && e.time() == *t0));
                    prop_assert!(!events.iter().any(|e| e.is_begin() && e.time() == *t1));
                }
            }
        }
    }

    #[test]
    fn long_gaps_emit_one_end_with_raw_time(seq in pulses(1)) {
        let (events, _) = replay(&seq);
        for (i, s) in seq.iter().enumerate() {
            if let Signal::End(_, t0) = s {
                let resumed = match seq.get(i + 1) {
                    Some(Signal::Begin(_, t1)) => t1 - t0 < GAP,
                    _ => false,
                };
                let count = events.iter().filter(|e| !e.is_begin() && e.time() == *t0).count();
                prop_assert_eq!(count, usize::from(!resumed));
            }
        }
    }

    #[test]
    fn repeated_begin_emits_once(times in prop::collection::vec(0.0f64..10.0, 1..20)) {
        let mut d = Debouncer::new(GAP);
        for t in times {
            d.raw_begin(7u8, t);
        }
        prop_assert_eq!(d.take_events().len(), 1);
    }

    #[test]
    fn grasped_equals_group_intersection(
        ops in prop::collection::vec((0u8..2, 0u32..4, any::<bool>()), 1..120)
    ) {
        let owner = SemanticEntity::new(ObjectHandle::new(100, 0), "hand", "Hand");
        let objects: Vec<SemanticEntity> = (0..4)
            .map(|i| SemanticEntity::new(ObjectHandle::new(i, 0), format!("obj{i}"), "Thing"))
            .collect();
        let mut det = GraspDetector::new(owner, 0.55);
        let mut t = 0.0;
        for (group, obj, begin) in ops {
            t += 0.05;
            let group = if group == 0 { OverlapGroup::A } else { OverlapGroup::B };
            let o = &objects[obj as usize];
            if begin {
                // One sensor per group: only begin what is not already in.
                if !det.set(group).contains(o) {
                    det.on_group_begin(group, o.clone(), t);
                }
            } else if det.set(group).contains(o) {
                det.on_group_end(group, o, t);
            }
            det.fire_timers(t);
            for o in &objects {
                let both = det.set(OverlapGroup::A).contains(o) && det.set(OverlapGroup::B).contains(o);
                prop_assert_eq!(det.is_grasped(o), both, "object {}", o.id);
            }
        }
        // Begin/end grasp events alternate per object.
        det.finish();
        let events = det.take_events();
        for o in &objects {
            let mut open = false;
            for e in &events {
                match e {
                    SemanticEvent::BeginGrasp { object, .. } if object == o => {
                        prop_assert!(!open);
                        open = true;
                    }
                    SemanticEvent::EndGrasp { object, .. } if object == o => {
                        prop_assert!(open);
                        open = false;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[test]
fn concrete_debounce_scenario() {
    let mut d = Debouncer::new(0.12);
    d.raw_begin("A", 0.0);
    d.raw_end(&"A", 1.0);
    d.raw_begin("A", 1.05);
    d.raw_end(&"A", 3.0);
    d.flush_due(3.10);
    assert_eq!(d.take_events(), vec![Debounced::Begin { key: "A", time: 0.0 }]);
    d.flush_due(3.15);
    assert_eq!(d.take_events(), vec![Debounced::End { key: "A", time: 3.0 }]);
}

#[test]
fn concrete_grasp_scenario() {
    let owner = SemanticEntity::new(ObjectHandle::new(0, 0), "hand", "Hand");
    let cup = SemanticEntity::new(ObjectHandle::new(1, 0), "O", "Cup");
    let mut det = GraspDetector::new(owner, 0.55);
    det.on_group_begin(OverlapGroup::A, cup.clone(), 0.0);
    det.on_group_begin(OverlapGroup::B, cup, 0.02);
    let events = det.take_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], SemanticEvent::BeginGrasp { time, .. } if *time == 0.02));
}
