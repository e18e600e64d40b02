use super::humanoid::SkeletonAsset;
use super::{ClipInterpolation, ClipKeyframe};
use anyhow::{anyhow, bail, Context, Result};
use glam::{Quat, Vec3};
use gltf::animation::util::{ReadOutputs, Rotations};
use gltf::animation::{Interpolation, Property};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct JointVec3Track {
    pub interpolation: ClipInterpolation,
    pub keyframes: Arc<[ClipKeyframe<Vec3>]>,
}

#[derive(Clone)]
pub struct JointQuatTrack {
    pub interpolation: ClipInterpolation,
    pub keyframes: Arc<[ClipKeyframe<Quat>]>,
}

/// All animated tracks for one skeleton joint.
#[derive(Clone)]
pub struct JointCurve {
    pub joint_index: u32,
    pub translation: Option<JointVec3Track>,
    pub rotation: Option<JointQuatTrack>,
    pub scale: Option<JointVec3Track>,
}

/// A decoded dance clip, already retargeted onto the resident skeleton.
/// Channel node names from the clip file are matched against skeleton joint
/// names; channels with no matching joint are dropped at decode time.
#[derive(Clone)]
pub struct DanceClip {
    pub name: Arc<str>,
    pub duration: f32,
    pub channels: Arc<[JointCurve]>,
}

/// Decodes the first animation in a glTF/VRMA file and retargets it onto
/// `skeleton` by joint name. Fails when the file carries no usable channels
/// or resolves to a zero-length clip.
pub fn decode_clip(path: impl AsRef<Path>, skeleton: &SkeletonAsset) -> Result<DanceClip> {
    let path_ref = path.as_ref();
    let (document, buffers, _images) = gltf::import(path_ref)
        .with_context(|| format!("Failed to import clip from {}", path_ref.display()))?;

    let animation = document
        .animations()
        .next()
        .ok_or_else(|| anyhow!("Clip file '{}' contains no animations", path_ref.display()))?;
    let clip_name: Arc<str> = animation
        .name()
        .map(|n| Arc::<str>::from(n.to_string()))
        .unwrap_or_else(|| {
            Arc::<str>::from(
                path_ref.file_stem().and_then(|stem| stem.to_str()).unwrap_or("clip").to_string(),
            )
        });

    let mut curve_builders: HashMap<u32, JointCurveBuilder> = HashMap::new();
    let mut unmatched = 0usize;

    for channel in animation.channels() {
        let target_node = channel.target().node();
        let Some(node_name) = target_node.name() else {
            unmatched += 1;
            continue;
        };
        let Some(joint_index) = skeleton.joint_index(node_name) else {
            unmatched += 1;
            continue;
        };

        let interpolation = match channel.sampler().interpolation() {
            Interpolation::Linear => ClipInterpolation::Linear,
            Interpolation::Step => ClipInterpolation::Step,
            Interpolation::CubicSpline => {
                eprintln!(
                    "[assets] clip '{clip_name}' uses CubicSpline interpolation; skipping channel ('{node_name}')."
                );
                continue;
            }
        };

        let reader = channel.reader(|buffer| Some(&buffers[buffer.index()]));
        let Some(inputs) = reader.read_inputs() else {
            continue;
        };
        let times: Vec<f32> = inputs.collect();
        if times.is_empty() {
            continue;
        }

        let Some(outputs) = reader.read_outputs() else {
            continue;
        };

        let builder = curve_builders.entry(joint_index).or_default();
        match (channel.target().property(), outputs) {
            (Property::Translation, ReadOutputs::Translations(values)) => {
                let vec_values: Vec<Vec3> = values.map(Vec3::from_array).collect();
                if vec_values.len() != times.len() {
                    bail!("Clip '{clip_name}' translation channel count mismatch ('{node_name}')");
                }
                builder.translation = Some(build_vec3_track(&times, vec_values, interpolation)?);
            }
            (Property::Scale, ReadOutputs::Scales(values)) => {
                let vec_values: Vec<Vec3> = values.map(Vec3::from_array).collect();
                if vec_values.len() != times.len() {
                    bail!("Clip '{clip_name}' scale channel count mismatch ('{node_name}')");
                }
                builder.scale = Some(build_vec3_track(&times, vec_values, interpolation)?);
            }
            (Property::Rotation, ReadOutputs::Rotations(rotations)) => {
                let quat_values = convert_rotations(rotations);
                if quat_values.len() != times.len() {
                    bail!("Clip '{clip_name}' rotation channel count mismatch ('{node_name}')");
                }
                builder.rotation = Some(build_quat_track(&times, quat_values, interpolation)?);
            }
            (Property::MorphTargetWeights, _) => {
                // Morph target weights are not consumed by the pose stack.
            }
            _ => {}
        }
    }

    if unmatched > 0 {
        eprintln!(
            "[assets] clip '{clip_name}': {unmatched} channels did not match a joint on '{}' and were dropped.",
            skeleton.name
        );
    }

    let mut curves: Vec<JointCurve> = Vec::new();
    for (joint_index, builder) in curve_builders {
        if let Some(curve) = builder.into_curve(joint_index) {
            curves.push(curve);
        }
    }
    if curves.is_empty() {
        bail!(
            "Clip '{}' from {} has no channels matching skeleton '{}'",
            clip_name,
            path_ref.display(),
            skeleton.name
        );
    }
    // Deterministic channel order regardless of HashMap iteration.
    curves.sort_by_key(|curve| curve.joint_index);

    let mut duration = 0.0_f32;
    for curve in &curves {
        if let Some(track) = &curve.translation {
            duration = duration.max(track.keyframes.last().map(|kf| kf.time).unwrap_or(0.0));
        }
        if let Some(track) = &curve.rotation {
            duration = duration.max(track.keyframes.last().map(|kf| kf.time).unwrap_or(0.0));
        }
        if let Some(track) = &curve.scale {
            duration = duration.max(track.keyframes.last().map(|kf| kf.time).unwrap_or(0.0));
        }
    }
    if duration <= 0.0 {
        bail!("Clip '{}' from {} resolves to zero duration", clip_name, path_ref.display());
    }

    Ok(DanceClip { name: clip_name, duration, channels: Arc::from(curves.into_boxed_slice()) })
}

#[derive(Default)]
struct JointCurveBuilder {
    translation: Option<JointVec3Track>,
    rotation: Option<JointQuatTrack>,
    scale: Option<JointVec3Track>,
}

impl JointCurveBuilder {
    fn into_curve(self, joint_index: u32) -> Option<JointCurve> {
        if self.translation.is_none() && self.rotation.is_none() && self.scale.is_none() {
            None
        } else {
            Some(JointCurve {
                joint_index,
                translation: self.translation,
                rotation: self.rotation,
                scale: self.scale,
            })
        }
    }
}

fn build_vec3_track(
    times: &[f32],
    values: Vec<Vec3>,
    interpolation: ClipInterpolation,
) -> Result<JointVec3Track> {
    Ok(JointVec3Track { interpolation, keyframes: build_keyframes(times, values)? })
}

fn build_quat_track(
    times: &[f32],
    values: Vec<Quat>,
    interpolation: ClipInterpolation,
) -> Result<JointQuatTrack> {
    Ok(JointQuatTrack { interpolation, keyframes: build_keyframes(times, values)? })
}

fn build_keyframes<T: Clone>(times: &[f32], values: Vec<T>) -> Result<Arc<[ClipKeyframe<T>]>> {
    if times.len() != values.len() {
        bail!("Animation channel time/value count mismatch ({} vs {})", times.len(), values.len());
    }
    let mut frames: Vec<ClipKeyframe<T>> = Vec::with_capacity(times.len());
    for (time, value) in times.iter().copied().zip(values.into_iter()) {
        if !time.is_finite() {
            bail!("Animation channel contains non-finite time value");
        }
        if time < 0.0 {
            bail!("Animation channel time cannot be negative");
        }
        if let Some(last) = frames.last_mut() {
            if (time - last.time).abs() <= f32::EPSILON {
                last.value = value;
                continue;
            }
        }
        frames.push(ClipKeyframe { time, value });
    }
    Ok(Arc::from(frames.into_boxed_slice()))
}

fn convert_rotations(rotations: Rotations) -> Vec<Quat> {
    rotations
        .into_f32()
        .map(|components| {
            let quat = Quat::from_xyzw(components[0], components[1], components[2], components[3]);
            if quat.length_squared() > 0.0 {
                quat.normalize()
            } else {
                Quat::IDENTITY
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn test_clip(name: &str, duration: f32) -> DanceClip {
    let keyframes: Arc<[ClipKeyframe<Quat>]> = Arc::from(
        vec![
            ClipKeyframe { time: 0.0, value: Quat::IDENTITY },
            ClipKeyframe { time: duration, value: Quat::from_rotation_y(0.5) },
        ]
        .into_boxed_slice(),
    );
    let channels = vec![JointCurve {
        joint_index: 0,
        translation: None,
        rotation: Some(JointQuatTrack { interpolation: ClipInterpolation::Linear, keyframes }),
        scale: None,
    }];
    DanceClip {
        name: Arc::<str>::from(name.to_string()),
        duration,
        channels: Arc::from(channels.into_boxed_slice()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyframes_collapse_duplicate_times() {
        let frames = build_keyframes(&[0.0, 0.0, 1.0], vec![1.0_f32, 2.0, 3.0]).expect("build");
        assert_eq!(frames.len(), 2);
        assert!((frames[0].value - 2.0).abs() < 1e-6);
        assert!((frames[1].time - 1.0).abs() < 1e-6);
    }

    #[test]
    fn keyframes_reject_negative_time() {
        assert!(build_keyframes(&[-0.5], vec![Vec3::ZERO]).is_err());
    }
}
