//! Scripted tabletop episode: a hand reaches for a cup resting on a table,
//! lifts it, puts it back and withdraws.
//!
//! Run with:
//!   cargo run --example tabletop -p semlog-engine [-- config.json]
//!
//! Semantic events are printed as they are published; world state goes to
//! `<output_dir>/<task>/<episode>_ws.json`. Set `RUST_LOG=debug` for the
//! detector logs.

use semlog_engine::prelude::*;

const TABLE_TOP: f64 = 5.0;
const CUP_REST: Vec3 = Vec3::new(0.0, 0.0, TABLE_TOP + 2.0);
const HAND_HOME: Vec3 = Vec3::new(-40.0, 0.0, 30.0);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::from_file(&path)?,
        None => {
            let mut config = SessionConfig::default();
            config.session.task_id = "tabletop".into();
            config.session.seed = Some(7);
            config.world_state.update_rate = 0.05;
            config.world_state.overwrite = true;
            config
        }
    };

    let mut session = LoggingSession::new(config)?;
    let table = session.spawn_object(
        "table",
        "Table",
        ObjectKind::Actor,
        PhysicsBody::new(BodyKind::Static, ColliderShape::Box { hx: 50.0, hy: 50.0, hz: TABLE_TOP }),
        EntityPose::default(),
    )?;
    let cup = session.spawn_object(
        "cup",
        "Cup",
        ObjectKind::Actor,
        PhysicsBody::new(BodyKind::Kinematic, ColliderShape::Box { hx: 2.0, hy: 2.0, hz: 2.0 }),
        EntityPose::at(CUP_REST),
    )?;
    let hand = session.spawn_object(
        "hand",
        "RightHand",
        ObjectKind::SkeletalActor,
        PhysicsBody::new(BodyKind::Kinematic, ColliderShape::Ball { radius: 1.0 }),
        EntityPose::at(HAND_HOME),
    )?;
    session.attach_rig(
        hand,
        vec![
            Bone {
                name: "thumb_01".into(),
                local: EntityPose::at(Vec3::new(0.0, -2.5, 0.0)),
            },
            Bone {
                name: "index_01".into(),
                local: EntityPose::at(Vec3::new(0.0, 2.5, 0.0)),
            },
        ],
    )?;
    session.add_manipulator(
        hand,
        &[
            FingerSensor {
                group: OverlapGroup::A,
                shape: ColliderShape::Ball { radius: 1.5 },
                offset: Vec3::new(0.0, -2.5, 0.0),
            },
            FingerSensor {
                group: OverlapGroup::B,
                shape: ColliderShape::Ball { radius: 1.5 },
                offset: Vec3::new(0.0, 2.5, 0.0),
            },
        ],
    )?;
    session.add_contact_region(cup, ColliderShape::Box { hx: 2.5, hy: 2.5, hz: 2.5 }, Vec3::ZERO)?;
    session.add_contact_region(table, ColliderShape::Box { hx: 50.5, hy: 50.5, hz: TABLE_TOP + 0.5 }, Vec3::ZERO)?;

    session.subscribe(|event| println!("{:>8.3}s  {event:?}", event.time()));
    let init = session.start().clone();
    println!("episode {} started: {init:?}", session.episode_id());
    session.set_grasp_type(0, "GA_Cylindric_Right")?;

    // Reach, lift, put down, withdraw.
    let lift = Vec3::new(0.0, 0.0, 20.0);
    for step in 0..=60 {
        let t = step as f64 / 60.0;
        let at = HAND_HOME.add(CUP_REST.add(HAND_HOME.scale(-1.0)).scale(t));
        session.set_kinematic_pose(hand, EntityPose::at(at));
        session.tick();
    }
    session.run_ticks(30);
    for step in 0..=60 {
        let offset = lift.scale(if step <= 30 { step as f64 / 30.0 } else { (60 - step) as f64 / 30.0 });
        session.set_kinematic_pose(cup, EntityPose::at(CUP_REST.add(offset)));
        session.set_kinematic_pose(hand, EntityPose::at(CUP_REST.add(offset)));
        session.tick();
    }
    session.run_ticks(30);
    session.set_grasp_input(0, 0.0)?;
    session.set_kinematic_pose(hand, EntityPose::at(HAND_HOME));
    session.run_ticks(90);
    session.finish();

    let diag = session.last_diagnostics();
    println!(
        "{} ticks, {:.1} s simulated, last tick {:?}",
        session.tick_count(),
        session.sim_time(),
        diag.total_time
    );
    if let Some(stats) = session.world_state_stats() {
        println!("world state: {stats:?}");
    }
    println!("relations:");
    print!("{}", session.journal().to_json_lines()?);
    Ok(())
}
