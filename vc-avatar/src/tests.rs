use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bevy::math::{Quat, Vec3};

use super::blink::{blink_curve, AutoBlink, BlinkState, BLINK_MAX_INTERVAL, BLINK_MIN_INTERVAL};
use super::controller::{AnimationController, AnimationError, ClipEvent, PlayOptions};
use super::expression::{derive_neutral, ExpressionSet};
use super::frame_queue::FrameQueue;
use super::look_at::LookAt;
use super::rig::{HumanBone, HumanoidRig, NodeId, RigParseError, VrmVersion};
use super::spring::SpringBoneSolver;

const VRM1_FIXTURE: &str = r#"{
  "asset": { "version": "2.0" },
  "nodes": [
    { "name": "hips", "children": [1] },
    { "name": "head", "translation": [0, 1.5, 0], "children": [2, 4] },
    { "name": "hair", "translation": [0, 0.1, 0], "children": [3] },
    { "name": "hair_tip", "translation": [0, 0, 0.1] },
    { "name": "face", "mesh": 0 }
  ],
  "meshes": [
    { "primitives": [ { "attributes": {}, "targets": [ {}, {} ] } ] }
  ],
  "accessors": [ { "count": 2, "min": [0.0], "max": [2.0] } ],
  "animations": [
    { "name": "idle", "samplers": [ { "input": 0, "output": 0 } ], "channels": [] }
  ],
  "extensions": {
    "VRMC_vrm": {
      "humanoid": { "humanBones": { "hips": { "node": 0 }, "head": { "node": 1 } } },
      "expressions": {
        "preset": {
          "happy": { "morphTargetBinds": [ { "node": 4, "index": 0, "weight": 1.0 } ] },
          "blink": { "morphTargetBinds": [ { "node": 4, "index": 1, "weight": 1.0 } ] }
        },
        "custom": {
          "wink": { "morphTargetBinds": [ { "node": 4, "index": 1, "weight": 0.5 } ], "isBinary": true }
        }
      }
    },
    "VRMC_springBone": {
      "springs": [
        { "joints": [
          { "node": 2, "stiffness": 1.0, "dragForce": 0.4, "gravityPower": 1.0, "gravityDir": [0, -1, 0] },
          { "node": 3 }
        ] }
      ]
    }
  }
}"#;

const VRM0_FIXTURE: &str = r#"{
  "nodes": [
    { "name": "root", "children": [1, 2] },
    { "name": "face", "mesh": 0 },
    { "name": "tail", "children": [3] },
    { "name": "tail_tip", "translation": [0, 0, -0.2] }
  ],
  "meshes": [ { "primitives": [ { "targets": [ {}, {}, {} ] } ] } ],
  "extensions": {
    "VRM": {
      "humanoid": { "humanBones": [ { "bone": "head", "node": 0 } ] },
      "blendShapeMaster": {
        "blendShapeGroups": [
          { "name": "Joy", "presetName": "joy", "binds": [ { "mesh": 0, "index": 2, "weight": 100 } ] },
          { "name": "Blink_L", "presetName": "blink_l", "binds": [ { "mesh": 0, "index": 0, "weight": 50 } ] },
          { "name": "Smirk", "presetName": "unknown", "binds": [] }
        ]
      },
      "secondaryAnimation": {
        "boneGroups": [
          { "stiffiness": 0.8, "dragForce": 0.2, "gravityPower": 0.5,
            "gravityDir": { "x": 0, "y": -1, "z": 0 }, "bones": [2] }
        ]
      }
    }
  }
}"#;

fn rig() -> HumanoidRig {
    HumanoidRig::from_gltf_bytes(VRM1_FIXTURE.as_bytes()).unwrap()
}

fn controller_with_clips() -> AnimationController {
    let mut controller = AnimationController::new(AutoBlink::seeded(7));
    controller.set_rig(rig());
    controller.register_clip("idle", 2.0).unwrap();
    controller.register_clip("wave", 1.0).unwrap();
    controller
}

fn clip_time(controller: &AnimationController, name: &str) -> Option<f32> {
    controller
        .clip_poses()
        .into_iter()
        .find(|p| p.name == name)
        .map(|p| p.time)
}

#[test]
fn parses_vrm1_metadata() {
    let rig = rig();
    assert_eq!(rig.vrm, Some(VrmVersion::V1));
    assert_eq!(rig.graph.len(), 5);
    assert_eq!(rig.bone(HumanBone::Head), Some(NodeId(1)));
    assert_eq!(rig.graph.get(NodeId(3)).unwrap().parent, Some(NodeId(2)));
    assert!(rig.has_expression("happy"));
    assert!(rig.expressions["wink"].is_binary);
    assert_eq!(rig.springs.len(), 1);
    assert_eq!(rig.springs[0].joints.len(), 2);
    assert_eq!(rig.springs[0].joints[0].params.gravity_power, 1.0);
    assert_eq!(rig.clips.len(), 1);
    assert_eq!(rig.clips[0].name, "idle");
    assert_eq!(rig.clips[0].duration, 2.0);
    assert_eq!(rig.graph.get(NodeId(4)).unwrap().morph_target_count, 2);
}

#[test]
fn parses_vrm0_metadata() {
    let rig = HumanoidRig::from_gltf_bytes(VRM0_FIXTURE.as_bytes()).unwrap();
    assert_eq!(rig.vrm, Some(VrmVersion::V0));
    let happy = &rig.expressions["happy"];
    assert_eq!(happy.binds[0].node, NodeId(1));
    assert_eq!(happy.binds[0].index, 2);
    assert!((happy.binds[0].weight - 1.0).abs() < 1e-6);
    assert!((rig.expressions["blinkLeft"].binds[0].weight - 0.5).abs() < 1e-6);
    assert!(rig.has_expression("Smirk"));

    assert_eq!(rig.springs.len(), 1);
    let chain = &rig.springs[0];
    assert_eq!(
        chain.joints.iter().map(|j| j.node).collect::<Vec<_>>(),
        vec![NodeId(2), NodeId(3)]
    );
    assert!((chain.joints[0].params.stiffness - 0.8).abs() < 1e-6);
}

#[test]
fn plain_gltf_is_a_rig_without_tables() {
    let rig = HumanoidRig::from_gltf_bytes(br#"{"nodes":[{"name":"root"}]}"#).unwrap();
    assert!(rig.vrm.is_none());
    assert!(rig.expressions.is_empty());
    assert!(rig.springs.is_empty());
}

#[test]
fn rejects_malformed_rig_payloads() {
    assert!(matches!(
        HumanoidRig::from_gltf_bytes(br#"{"nodes":[]}"#),
        Err(RigParseError::NoNodes)
    ));
    assert!(matches!(
        HumanoidRig::from_gltf_bytes(b"not json"),
        Err(RigParseError::Json(_))
    ));
    assert!(matches!(
        HumanoidRig::from_gltf_bytes(b"glTF\x02\x00\x00\x00garbage"),
        Err(RigParseError::Glb(_))
    ));
}

#[test]
fn neutral_is_one_minus_emotions_floored() {
    assert!((derive_neutral([0.0; 5]) - 1.0).abs() < 1e-6);
    assert!((derive_neutral([0.2, 0.1, 0.0, 0.0, 0.3]) - 0.4).abs() < 1e-6);
    assert_eq!(derive_neutral([1.0, 1.0, 0.5, 0.0, 0.0]), 0.0);

    let mut values = 0.0f32;
    for step in 0..500 {
        values = (values + 0.137 * step as f32) % 1.0;
        let emotions = [values, 1.0 - values, values * 0.5, 0.3, values * values];
        let neutral = derive_neutral(emotions);
        let expected = (1.0 - emotions.iter().sum::<f32>()).max(0.0);
        assert!(neutral >= 0.0);
        assert!((neutral - expected).abs() < 1e-6);
    }
}

#[test]
fn missing_emotion_channels_read_as_zero() {
    let mut controller = controller_with_clips();
    controller.set_expression("happy", 0.3);
    controller.update(0.016);
    assert!((controller.expressions().get("neutral") - 0.7).abs() < 1e-5);

    controller.set_expression("sad", 0.9);
    controller.update(0.016);
    assert_eq!(controller.expressions().get("neutral"), 0.0);
}

#[test]
fn morph_weights_follow_bind_table() {
    let rig = rig();
    let mut set = ExpressionSet::default();
    set.set("happy", 0.5);
    set.set("wink", 0.4);
    assert_eq!(set.morph_weights(&rig), vec![(NodeId(4), vec![0.5, 0.0])]);

    set.set("wink", 0.8);
    set.set("blink", 0.7);
    assert_eq!(set.morph_weights(&rig), vec![(NodeId(4), vec![0.5, 1.0])]);
}

#[test]
fn blink_curve_peaks_at_midpoint() {
    assert_eq!(blink_curve(0.0, 0.2), 0.0);
    assert!((blink_curve(0.1, 0.2) - 1.0).abs() < 1e-6);
    assert_eq!(blink_curve(0.2, 0.2), 0.0);
}

#[test]
fn blink_intervals_and_peaks_stay_in_bounds() {
    let dt = 1.0 / 240.0;
    let mut blink = AutoBlink::seeded(42);
    let duration = blink.duration();

    let mut idle_since = 0u32;
    let mut blink_started: Option<u32> = None;
    let mut peak = 0.0f32;
    let mut blinks = 0;

    for frame in 1..=(240 * 300u32) {
        let value = blink.advance(dt);
        match (blink.state(), blink_started) {
            (BlinkState::Blinking { .. }, None) => {
                let interval = (frame - idle_since) as f32 * dt;
                assert!(
                    interval >= BLINK_MIN_INTERVAL - 2.0 * dt
                        && interval <= BLINK_MAX_INTERVAL + 2.0 * dt,
                    "interval {interval} out of range"
                );
                blink_started = Some(frame);
                peak = value.unwrap_or(0.0);
            }
            (BlinkState::Blinking { .. }, Some(_)) => {
                let v = value.unwrap();
                assert!((0.0..=1.0).contains(&v));
                peak = peak.max(v);
            }
            (BlinkState::Idle { .. }, Some(started)) => {
                assert_eq!(value, Some(0.0));
                assert!((frame - started) as f32 * dt <= duration + 2.0 * dt);
                assert!(peak > 0.99, "blink peaked at {peak}");
                blink_started = None;
                idle_since = frame;
                blinks += 1;
            }
            (BlinkState::Idle { .. }, None) => assert_eq!(value, None),
        }
    }
    assert!(blinks >= 40);
}

#[test]
fn disabling_blink_zeroes_channels_and_halts() {
    let mut controller = controller_with_clips();
    let mut blinked = false;
    for _ in 0..2000 {
        controller.update(0.01);
        if controller.expressions().get("blink") > 0.0 {
            blinked = true;
            break;
        }
    }
    assert!(blinked);

    controller.set_auto_blink(false);
    for channel in ["blink", "blinkLeft", "blinkRight"] {
        assert_eq!(controller.expressions().get(channel), 0.0);
    }
    for _ in 0..1000 {
        controller.update(0.01);
        assert_eq!(controller.expressions().get("blink"), 0.0);
    }
}

#[test]
fn play_requires_rig_and_known_clip() {
    let mut controller = AnimationController::new(AutoBlink::seeded(1));
    assert_eq!(
        controller.play("idle", PlayOptions::default()),
        Err(AnimationError::NoRig)
    );
    assert_eq!(controller.register_clip("idle", 1.0), Err(AnimationError::NoRig));

    controller.set_rig(rig());
    assert_eq!(
        controller.play("missing", PlayOptions::default()),
        Err(AnimationError::UnknownClip("missing".to_string()))
    );
}

#[test]
fn update_without_rig_is_a_no_op() {
    let mut controller = AnimationController::new(AutoBlink::seeded(3));
    let before = controller.blink().state();
    assert!(controller.update(10.0).is_empty());
    assert_eq!(controller.blink().state(), before);
}

#[test]
fn replaying_active_clip_is_a_no_op() {
    let mut controller = controller_with_clips();
    assert_eq!(controller.play("idle", PlayOptions::looped()), Ok(true));
    controller.update(0.3);
    assert_eq!(controller.play("idle", PlayOptions::looped()), Ok(false));
    controller.update(0.1);

    let time = clip_time(&controller, "idle").unwrap();
    assert!((time - 0.4).abs() < 1e-5);
    assert_eq!(controller.clip_poses().len(), 1);
    assert_eq!(controller.pending_deferred(), 0);
}

#[test]
fn crossfade_never_drops_total_weight() {
    let mut controller = controller_with_clips();
    controller.play("idle", PlayOptions::looped()).unwrap();
    controller.update(0.2);

    controller.play("wave", PlayOptions::looped()).unwrap();
    assert_eq!(controller.active_clip(), Some("wave"));
    let mut saw_both = false;
    for _ in 0..45 {
        controller.update(1.0 / 60.0);
        let total = controller.total_weight();
        assert!((total - 1.0).abs() < 1e-4, "total weight {total}");
        saw_both |= controller.clip_poses().len() == 2;
    }
    assert!(saw_both);

    let poses = controller.clip_poses();
    assert_eq!(poses.len(), 1);
    assert_eq!(poses[0].name, "wave");
    assert_eq!(poses[0].weight, 1.0);
}

#[test]
fn first_clip_starts_at_full_weight() {
    let mut controller = controller_with_clips();
    controller.play("idle", PlayOptions::looped()).unwrap();
    assert_eq!(controller.total_weight(), 1.0);
    assert_eq!(controller.pending_deferred(), 0);
}

#[test]
fn one_shot_finishes_exactly_once_and_holds_last_pose() {
    let mut controller = controller_with_clips();
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    controller.on_finished(move |clip| {
        assert_eq!(clip, "wave");
        counter.fetch_add(1, Ordering::SeqCst);
    });

    controller.play("wave", PlayOptions::once()).unwrap();
    let mut events = Vec::new();
    for _ in 0..10 {
        events.extend(controller.update(0.25));
    }
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(
        events,
        vec![ClipEvent::Finished {
            clip: "wave".to_string()
        }]
    );
    assert_eq!(controller.active_clip(), None);
    let poses = controller.clip_poses();
    assert_eq!(poses.len(), 1);
    assert_eq!(poses[0].time, 1.0);

    assert_eq!(controller.play("wave", PlayOptions::once()), Ok(true));
}

#[test]
fn loop_callback_fires_per_iteration() {
    let mut controller = controller_with_clips();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    controller.on_loop(move |clip, iteration| {
        sink.lock().unwrap().push((clip.to_string(), iteration));
    });
    controller.register_clip("step", 1.0).unwrap();
    controller.play("step", PlayOptions::looped()).unwrap();
    for _ in 0..10 {
        controller.update(0.25);
    }
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("step".to_string(), 1), ("step".to_string(), 2)]
    );
    assert_eq!(controller.active_clip(), Some("step"));
}

#[test]
fn paused_mixer_keeps_blink_running() {
    let mut controller = controller_with_clips();
    controller.play("idle", PlayOptions::looped()).unwrap();
    controller.set_paused(true);

    let mut blinked = false;
    for _ in 0..100 {
        controller.update(0.1);
        blinked |= matches!(controller.blink().state(), BlinkState::Blinking { .. });
    }
    assert!(blinked);
    assert_eq!(clip_time(&controller, "idle"), Some(0.0));

    controller.set_paused(false);
    controller.update(0.1);
    assert!((clip_time(&controller, "idle").unwrap() - 0.1).abs() < 1e-6);
}

#[test]
fn hard_cut_resets_springs_two_frames_later() {
    let mut controller = controller_with_clips();
    controller.play("idle", PlayOptions::looped()).unwrap();
    controller.play("wave", PlayOptions::looped().with_fade(0.0)).unwrap();
    assert_eq!(controller.pending_deferred(), 1);

    let resets = |c: &mut AnimationController| c.springs_mut().unwrap().reset_count();
    controller.update(1.0 / 60.0);
    assert_eq!(resets(&mut controller), 0);
    controller.update(1.0 / 60.0);
    assert_eq!(resets(&mut controller), 1);
    controller.update(1.0 / 60.0);
    assert_eq!(resets(&mut controller), 1);
    assert_eq!(controller.clip_poses().len(), 1);
}

#[test]
fn explicit_physics_reset_is_deferred_too() {
    let mut controller = controller_with_clips();
    controller.play("idle", PlayOptions::looped()).unwrap();
    controller
        .play("wave", PlayOptions::looped().with_physics_reset())
        .unwrap();
    assert_eq!(controller.pending_deferred(), 1);
    controller.update(0.01);
    controller.update(0.01);
    assert_eq!(controller.springs_mut().unwrap().reset_count(), 1);
}

#[test]
fn large_delta_resets_springs_immediately() {
    let mut controller = controller_with_clips();
    controller.update(0.5);
    assert_eq!(controller.springs_mut().unwrap().reset_count(), 0);
    controller.update(0.75);
    assert_eq!(controller.springs_mut().unwrap().reset_count(), 1);
}

#[test]
fn set_rig_replaces_instead_of_adding() {
    let mut controller = controller_with_clips();
    controller.play("idle", PlayOptions::looped()).unwrap();
    let previous = controller.set_rig(rig());
    assert!(previous.is_some());
    assert!(!controller.has_clip("idle"));
    assert_eq!(controller.active_clip(), None);
    assert!(controller.clip_poses().is_empty());
}

#[test]
fn reregistering_clip_stops_the_old_one() {
    let mut controller = controller_with_clips();
    controller.play("idle", PlayOptions::looped()).unwrap();
    controller.update(0.5);
    controller.register_clip("idle", 3.0).unwrap();
    assert_eq!(controller.active_clip(), None);
    assert!(controller.clip_poses().is_empty());
    assert_eq!(controller.play("idle", PlayOptions::looped()), Ok(true));
    assert!(controller.unregister_clip("idle"));
    assert!(!controller.has_clip("idle"));
}

#[test]
fn frame_queue_counts_frame_boundaries() {
    let mut queue = FrameQueue::default();
    queue.schedule(2, "late");
    queue.schedule(0, "next");
    assert_eq!(queue.tick(), vec!["next"]);
    assert_eq!(queue.tick(), vec!["late"]);
    assert!(queue.tick().is_empty());
    assert!(queue.is_empty());
}

#[test]
fn spring_rests_without_forces_and_sags_under_gravity() {
    let rig = rig();
    let mut solver = SpringBoneSolver::from_rig(&rig);
    assert_eq!(solver.chain_count(), 1);
    assert_eq!(solver.roots().collect::<Vec<_>>(), vec![NodeId(2)]);
    let pose = |_| Some((Vec3::new(0.0, 1.6, 0.0), Quat::IDENTITY));

    let first = solver.step(0.0, pose);
    assert_eq!(first.len(), 1);
    assert!(first[0].1.angle_between(Quat::IDENTITY) < 1e-4);

    let mut last = Quat::IDENTITY;
    for _ in 0..30 {
        last = solver.step(1.0 / 60.0, pose)[0].1;
    }
    assert!(last.angle_between(Quat::IDENTITY) > 1e-3);
    let tip = last * Vec3::new(0.0, 0.0, 0.1);
    assert!(tip.y < 0.0);

    solver.reset();
    let snapped = solver.step(0.0, pose);
    assert!(snapped[0].1.angle_between(Quat::IDENTITY) < 1e-4);
}

#[test]
fn look_at_clamps_to_limits() {
    let mut look = LookAt::default();
    look.aim(Vec3::ZERO, Quat::IDENTITY, Vec3::new(10.0, 0.0, 0.1));
    for _ in 0..30 {
        look.update(1.0);
    }
    let (yaw, pitch) = look.angles();
    assert!((yaw - look.yaw_limit).abs() < 1e-3);
    assert!(pitch.abs() < 1e-3);

    look.enabled = false;
    for _ in 0..30 {
        look.update(1.0);
    }
    assert!(look.angles().0.abs() < 1e-3);
}
