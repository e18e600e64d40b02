use anyhow::{Context, Result};
use glam::{Mat4, Quat, Vec3};
use std::path::Path;
use std::sync::Arc;
use vstage::assets::clip::decode_clip;
use vstage::assets::humanoid::{SkeletonAsset, SkeletonJoint};

fn joint(name: &str, parent: Option<u32>) -> SkeletonJoint {
    SkeletonJoint {
        name: Arc::<str>::from(name.to_string()),
        parent,
        rest_translation: Vec3::new(0.0, 0.1, 0.0),
        rest_rotation: Quat::IDENTITY,
        rest_scale: Vec3::ONE,
        inverse_bind: Mat4::IDENTITY,
    }
}

#[test]
fn decode_spin_fixture_retargets_by_name() -> Result<()> {
    let path = Path::new("fixtures/clips/spin.gltf");
    anyhow::ensure!(path.exists(), "Fixture missing at {}", path.display());

    let skeleton =
        SkeletonAsset::from_joints("rig", vec![joint("hips", None), joint("spine", Some(0))])?;
    let clip = decode_clip(path, &skeleton)
        .with_context(|| format!("Failed to decode {}", path.display()))?;

    assert_eq!(clip.name.as_ref(), "spin");
    assert!((clip.duration - 1.0).abs() < 1e-4);
    assert_eq!(clip.channels.len(), 2);

    let hips = &clip.channels[0];
    assert_eq!(hips.joint_index, skeleton.joint_index("hips").expect("hips joint"));
    let rotation = hips.rotation.as_ref().expect("rotation track");
    assert_eq!(rotation.keyframes.len(), 2);
    let end = rotation.keyframes[1].value;
    let quarter = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
    assert!(end.dot(quarter).abs() > 0.999, "final key should be a quarter turn about Y");
    assert!(hips.translation.is_none());
    assert!(hips.scale.is_none());
    Ok(())
}

#[test]
fn channels_without_matching_joints_are_dropped() -> Result<()> {
    let path = Path::new("fixtures/clips/spin.gltf");
    anyhow::ensure!(path.exists(), "Fixture missing at {}", path.display());

    // Only "hips" exists here, so the fixture's "spine" channel is skipped.
    let skeleton = SkeletonAsset::from_joints("rig", vec![joint("hips", None)])?;
    let clip = decode_clip(path, &skeleton)?;
    assert_eq!(clip.channels.len(), 1);
    assert_eq!(clip.channels[0].joint_index, 0);
    Ok(())
}

#[test]
fn fully_unmatched_clip_is_an_error() -> Result<()> {
    let path = Path::new("fixtures/clips/spin.gltf");
    anyhow::ensure!(path.exists(), "Fixture missing at {}", path.display());

    let skeleton = SkeletonAsset::from_joints("rig", vec![joint("pelvis", None)])?;
    assert!(decode_clip(path, &skeleton).is_err());
    Ok(())
}

#[test]
fn missing_file_is_an_error() -> Result<()> {
    let skeleton = SkeletonAsset::from_joints("rig", vec![joint("hips", None)])?;
    assert!(decode_clip("fixtures/clips/nope.gltf", &skeleton).is_err());
    Ok(())
}
