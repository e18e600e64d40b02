use crate::assets::clip::{DanceClip, JointQuatTrack, JointVec3Track};
use crate::assets::humanoid::SkeletonAsset;
use crate::assets::ClipInterpolation;
use glam::{Mat4, Quat, Vec3};

/// Local TRS state for every joint of a skeleton. Starts at the rest pose;
/// clips and blends overwrite per-joint entries in place.
#[derive(Clone)]
pub struct Pose {
    pub translations: Vec<Vec3>,
    pub rotations: Vec<Quat>,
    pub scales: Vec<Vec3>,
}

impl Pose {
    pub fn rest(skeleton: &SkeletonAsset) -> Self {
        let mut pose = Self {
            translations: Vec::with_capacity(skeleton.joint_count()),
            rotations: Vec::with_capacity(skeleton.joint_count()),
            scales: Vec::with_capacity(skeleton.joint_count()),
        };
        for joint in skeleton.joints.iter() {
            pose.translations.push(joint.rest_translation);
            pose.rotations.push(joint.rest_rotation);
            pose.scales.push(joint.rest_scale);
        }
        pose
    }

    pub fn reset_to_rest(&mut self, skeleton: &SkeletonAsset) {
        for (idx, joint) in skeleton.joints.iter().enumerate() {
            self.translations[idx] = joint.rest_translation;
            self.rotations[idx] = joint.rest_rotation;
            self.scales[idx] = joint.rest_scale;
        }
    }

    /// Samples `clip` at `time` (seconds, caller wraps looping) onto this
    /// pose. Joints without channels keep their current values.
    pub fn apply_clip(&mut self, clip: &DanceClip, time: f32) {
        for curve in clip.channels.iter() {
            let idx = curve.joint_index as usize;
            if idx >= self.rotations.len() {
                continue;
            }
            if let Some(track) = &curve.translation {
                self.translations[idx] = sample_vec3(track, time);
            }
            if let Some(track) = &curve.rotation {
                self.rotations[idx] = sample_quat(track, time);
            }
            if let Some(track) = &curve.scale {
                self.scales[idx] = sample_vec3(track, time);
            }
        }
    }

    /// Blends this pose toward `target`. `weight` of 0 keeps self, 1 lands
    /// on target. Rotations take the shorter arc.
    pub fn blend_toward(&mut self, target: &Pose, weight: f32) {
        let weight = weight.clamp(0.0, 1.0);
        for idx in 0..self.rotations.len().min(target.rotations.len()) {
            self.translations[idx] = self.translations[idx].lerp(target.translations[idx], weight);
            self.scales[idx] = self.scales[idx].lerp(target.scales[idx], weight);
            let mut to = target.rotations[idx];
            if self.rotations[idx].dot(to) < 0.0 {
                to = -to;
            }
            self.rotations[idx] = self.rotations[idx].lerp(to, weight).normalize();
        }
    }

    pub fn local_matrix(&self, joint: usize) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            self.scales[joint],
            self.rotations[joint],
            self.translations[joint],
        )
    }
}

fn sample_vec3(track: &JointVec3Track, time: f32) -> Vec3 {
    let frames = &track.keyframes;
    match locate(frames, time) {
        Location::Before => frames[0].value,
        Location::After => frames[frames.len() - 1].value,
        Location::Between(i, t) => match track.interpolation {
            ClipInterpolation::Step => frames[i].value,
            ClipInterpolation::Linear => frames[i].value.lerp(frames[i + 1].value, t),
        },
    }
}

fn sample_quat(track: &JointQuatTrack, time: f32) -> Quat {
    let frames = &track.keyframes;
    match locate(frames, time) {
        Location::Before => frames[0].value,
        Location::After => frames[frames.len() - 1].value,
        Location::Between(i, t) => match track.interpolation {
            ClipInterpolation::Step => frames[i].value,
            ClipInterpolation::Linear => {
                let a = frames[i].value;
                let mut b = frames[i + 1].value;
                if a.dot(b) < 0.0 {
                    b = -b;
                }
                a.lerp(b, t).normalize()
            }
        },
    }
}

enum Location {
    Before,
    After,
    /// Segment index plus normalized position inside it.
    Between(usize, f32),
}

fn locate<T>(frames: &[crate::assets::ClipKeyframe<T>], time: f32) -> Location {
    debug_assert!(!frames.is_empty());
    if time <= frames[0].time {
        return Location::Before;
    }
    let upper = frames.partition_point(|kf| kf.time <= time);
    if upper >= frames.len() {
        return Location::After;
    }
    let i = upper - 1;
    let span = (frames[upper].time - frames[i].time).max(f32::EPSILON);
    Location::Between(i, (time - frames[i].time) / span)
}

/// Composes world matrices in skeleton traversal order. `worlds` is resized
/// to the joint count.
pub fn world_matrices(skeleton: &SkeletonAsset, pose: &Pose, worlds: &mut Vec<Mat4>) {
    worlds.resize(skeleton.joint_count(), Mat4::IDENTITY);
    for &joint in skeleton.order.iter() {
        let idx = joint as usize;
        let local = pose.local_matrix(idx);
        worlds[idx] = match skeleton.joints[idx].parent {
            Some(parent) => worlds[parent as usize] * local,
            None => local,
        };
    }
}

/// Skinning palette: world transform times inverse bind, one entry per joint.
pub fn skinning_palette(skeleton: &SkeletonAsset, worlds: &[Mat4], palette: &mut Vec<Mat4>) {
    palette.clear();
    palette.reserve(skeleton.joint_count());
    for (joint, world) in skeleton.joints.iter().zip(worlds) {
        palette.push(*world * joint.inverse_bind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::humanoid::test_skeleton;
    use crate::assets::ClipKeyframe;
    use std::sync::Arc;

    fn vec3_track(interpolation: ClipInterpolation, frames: &[(f32, Vec3)]) -> JointVec3Track {
        JointVec3Track {
            interpolation,
            keyframes: Arc::from(
                frames
                    .iter()
                    .map(|&(time, value)| ClipKeyframe { time, value })
                    .collect::<Vec<_>>()
                    .into_boxed_slice(),
            ),
        }
    }

    #[test]
    fn linear_sampling_interpolates_and_clamps() {
        let track = vec3_track(
            ClipInterpolation::Linear,
            &[(0.0, Vec3::ZERO), (2.0, Vec3::new(2.0, 0.0, 0.0))],
        );
        assert_eq!(sample_vec3(&track, -1.0), Vec3::ZERO);
        assert!((sample_vec3(&track, 1.0).x - 1.0).abs() < 1e-5);
        assert!((sample_vec3(&track, 5.0).x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn step_sampling_holds_previous_key() {
        let track = vec3_track(
            ClipInterpolation::Step,
            &[(0.0, Vec3::ZERO), (1.0, Vec3::ONE), (2.0, Vec3::splat(5.0))],
        );
        assert_eq!(sample_vec3(&track, 0.5), Vec3::ZERO);
        assert_eq!(sample_vec3(&track, 1.5), Vec3::ONE);
    }

    #[test]
    fn blend_midpoint_splits_translation() {
        let skeleton = test_skeleton(&[("hips", None)]);
        let mut a = Pose::rest(&skeleton);
        let mut b = Pose::rest(&skeleton);
        a.translations[0] = Vec3::ZERO;
        b.translations[0] = Vec3::new(2.0, 0.0, 0.0);
        a.blend_toward(&b, 0.5);
        assert!((a.translations[0].x - 1.0).abs() < 1e-5);
        assert!(a.rotations[0].is_normalized());
    }

    #[test]
    fn world_matrices_compose_down_the_chain() {
        let skeleton = test_skeleton(&[("hips", None), ("spine", Some(0)), ("chest", Some(1))]);
        let pose = Pose::rest(&skeleton);
        let mut worlds = Vec::new();
        world_matrices(&skeleton, &pose, &mut worlds);
        // test_skeleton stacks joints 0.1 apart on Y.
        let chest = worlds[2].to_scale_rotation_translation().2;
        assert!((chest.y - 0.3).abs() < 1e-5);

        let mut palette = Vec::new();
        skinning_palette(&skeleton, &worlds, &mut palette);
        assert_eq!(palette.len(), 3);
    }
}
