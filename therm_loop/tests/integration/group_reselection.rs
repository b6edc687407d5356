//! Loop group: environment fan-out, meta-state precedence across loops and
//! the deadline pass.

use std::sync::Arc;
use std::time::Duration;

use therm_common::fixed::from_whole;
use therm_common::meta_state::{MetaStateIndex, MetaStateRecord};
use therm_loop::env::{ArrayKey, EnvironmentStore};
use therm_loop::error::LoopError;
use therm_loop::group::LoopGroup;
use therm_loop::sim::{ActuatorProbe, Probe};

use super::support::{loop_config, rom, secs, LoopRig, AVERAGING, CRITICAL};

// ── Helpers ──

const EXTRA: &str = "\
[averaging]
sample_count = 1

[overtemp]
interval = 1
output_override = 3000
";

struct Member {
    temp: Probe,
    primary: ActuatorProbe,
}

/// Group of loops 0 and 1 with the given variants, started at t = 0.
fn group(variants: [u8; 2]) -> (LoopGroup, [Member; 2]) {
    let env = Arc::new(EnvironmentStore::new());
    let mut group = LoopGroup::new(Arc::clone(&env));
    let members = [0u32, 1].map(|id| {
        let rig = LoopRig::new(&loop_config(id, EXTRA), &rom(variants[id as usize]), Arc::clone(&env));
        group.insert(rig.fan).unwrap();
        Member {
            temp: rig.temp,
            primary: rig.primary,
        }
    });
    let report = group.sensor_registered(Duration::ZERO);
    assert_eq!(report.fired, vec![0, 1]);
    (group, members)
}

fn index(group: &LoopGroup, loop_id: u32) -> Option<MetaStateIndex> {
    group.get(loop_id).and_then(|l| l.meta_state_index())
}

/// Just past the n-th steady deadline of both loops.
fn tick(n: u64) -> Duration {
    secs(n) + Duration::from_millis(1)
}

// ── Tests ──

#[test]
fn duplicate_loop_id_rejected() {
    let env = Arc::new(EnvironmentStore::new());
    let mut group = LoopGroup::new(Arc::clone(&env));
    let a = LoopRig::new(&loop_config(0, ""), &rom(CRITICAL), Arc::clone(&env));
    let b = LoopRig::new(&loop_config(0, ""), &rom(CRITICAL), Arc::clone(&env));

    group.insert(a.fan).unwrap();
    assert_eq!(group.insert(b.fan), Err(LoopError::DuplicateLoop(0)));
    assert_eq!(group.len(), 1);
}

#[test]
fn deadlines_are_staggered_by_loop_id() {
    let (group, _) = group([CRITICAL, CRITICAL]);
    assert_eq!(group.get(0).unwrap().deadline(), Some(secs(1)));
    assert_eq!(
        group.get(1).unwrap().deadline(),
        Some(secs(1) + Duration::from_micros(100))
    );
    assert_eq!(group.next_deadline(), Some(secs(1)));
}

#[test]
fn fire_due_runs_only_expired_loops() {
    let (mut group, _) = group([CRITICAL, CRITICAL]);
    let report = group.fire_due(secs(1));
    assert_eq!(report.fired, vec![0]);
    let report = group.fire_due(tick(1));
    assert_eq!(report.fired, vec![1]);
}

#[test]
fn low_power_entry_moves_every_averaging_loop() {
    let (mut group, members) = group([AVERAGING, AVERAGING]);
    members[0].temp.set(from_whole(78));

    let report = group.fire_due(tick(1));

    assert_eq!(report.fired, vec![0, 1]);
    assert!(report.fanned_out);
    assert!(group.env().array_flag_for_owner(ArrayKey::InternalOvertemp, 0));
    for (id, m) in members.iter().enumerate() {
        assert_eq!(index(&group, id as u32), Some(MetaStateIndex::Overtemp));
        assert_eq!(m.primary.target(), 3000);
    }
}

#[test]
fn leaving_low_power_forces_one_interval_of_full_cooling() {
    let (mut group, members) = group([AVERAGING, AVERAGING]);
    members[0].temp.set(from_whole(78));
    group.fire_due(tick(1));

    members[0].temp.set(from_whole(38));
    let report = group.fire_due(tick(2));

    assert!(report.fanned_out);
    assert_eq!(index(&group, 0), Some(MetaStateIndex::Normal));
    assert_eq!(index(&group, 1), Some(MetaStateIndex::Normal));
    assert_eq!(members[0].primary.target(), 4000);
    // Loop 1 resumes PID from the override: 42 °C is 2 over target.
    assert_eq!(members[1].primary.target(), 3002);

    group.fire_due(tick(3));
    assert_eq!(members[0].primary.target(), 3998);
}

#[test]
fn critical_family_ignores_internal_overtemp_of_others() {
    let (mut group, members) = group([AVERAGING, CRITICAL]);
    members[0].temp.set(from_whole(78));

    let report = group.fire_due(tick(1));

    assert!(report.fanned_out);
    assert_eq!(index(&group, 0), Some(MetaStateIndex::Overtemp));
    assert_eq!(index(&group, 1), Some(MetaStateIndex::Normal));
    assert_ne!(members[1].primary.target(), 3000);
}

#[test]
fn external_overtemp_applies_to_every_family() {
    let (mut group, members) = group([AVERAGING, CRITICAL]);

    assert!(group.set_external_overtemp(7, true));
    assert!(!group.set_external_overtemp(7, true));

    for (id, m) in members.iter().enumerate() {
        assert_eq!(index(&group, id as u32), Some(MetaStateIndex::Overtemp));
        assert_eq!(m.primary.target(), 3000);
    }

    assert!(group.set_external_overtemp(7, false));
    assert_eq!(index(&group, 0), Some(MetaStateIndex::Normal));
    assert_eq!(index(&group, 1), Some(MetaStateIndex::Normal));
}

#[test]
fn uncalibrated_system_selects_overtemp_slot() {
    let (mut group, members) = group([CRITICAL, CRITICAL]);

    group.set_system_uncalibrated(4);

    assert_eq!(index(&group, 0), Some(MetaStateIndex::Overtemp));
    assert_eq!(members[1].primary.target(), 3000);
}

#[test]
fn overtemp_beats_forced_beats_normal() {
    let (mut group, members) = group([CRITICAL, CRITICAL]);
    let fan = group.get_mut(1).unwrap();
    assert!(fan.set_forced_meta_state(Some(MetaStateRecord::override_output(1, 1234))));
    group.broadcast_environment_change();
    assert_eq!(index(&group, 1), Some(MetaStateIndex::Forced));
    assert_eq!(members[1].primary.target(), 1234);

    group.set_external_overtemp(2, true);
    assert_eq!(index(&group, 1), Some(MetaStateIndex::Overtemp));
    assert_eq!(members[1].primary.target(), 3000);

    group.set_external_overtemp(2, false);
    assert_eq!(index(&group, 1), Some(MetaStateIndex::Forced));
    assert_eq!(members[1].primary.target(), 1234);
    assert_eq!(index(&group, 0), Some(MetaStateIndex::Normal));
}

#[test]
fn invalid_forced_state_is_dropped() {
    let (mut group, _) = group([CRITICAL, CRITICAL]);
    let fan = group.get_mut(0).unwrap();

    // Interval 0 cannot be cached.
    assert!(fan.set_forced_meta_state(Some(MetaStateRecord::override_output(0, 1234))));
    assert_eq!(fan.meta_state_index(), Some(MetaStateIndex::Normal));

    // Still normal after the next environment change.
    group.set_external_overtemp(1, true);
    group.set_external_overtemp(1, false);
    assert_eq!(index(&group, 0), Some(MetaStateIndex::Normal));
}
