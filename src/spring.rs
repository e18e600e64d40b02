use crate::assets::humanoid::{SkeletonAsset, SpringChain};
use crate::pose::Pose;
use glam::{Mat4, Quat, Vec3};

/// One simulated bone: `joint` swings so that its child lands on the
/// Verlet-integrated tail position.
struct SpringSegment {
    joint: u32,
    child: u32,
    rest_length: f32,
    /// Child offset direction in the joint's local space.
    bone_axis: Vec3,
    prev_tail: Vec3,
    curr_tail: Vec3,
}

struct SpringStrand {
    segments: Vec<SpringSegment>,
    stiffness: f32,
    drag: f32,
    gravity_power: f32,
}

/// Secondary-motion rig for hair, skirts and tails. Runs after clip pose
/// composition each frame: it integrates tail positions in world space and
/// writes corrected local rotations back into the pose, updating the world
/// matrices of the affected joints as it walks each strand root-first.
pub struct SpringRig {
    strands: Vec<SpringStrand>,
    seeded: bool,
}

impl SpringRig {
    pub fn new(skeleton: &SkeletonAsset, chains: &[SpringChain]) -> Self {
        let mut strands = Vec::with_capacity(chains.len());
        for chain in chains {
            let mut segments = Vec::with_capacity(chain.joints.len().saturating_sub(1));
            for pair in chain.joints.windows(2) {
                let child = &skeleton.joints[pair[1] as usize];
                let rest_length = child.rest_translation.length();
                if rest_length <= 1e-5 {
                    continue;
                }
                segments.push(SpringSegment {
                    joint: pair[0],
                    child: pair[1],
                    rest_length,
                    bone_axis: child.rest_translation / rest_length,
                    prev_tail: Vec3::ZERO,
                    curr_tail: Vec3::ZERO,
                });
            }
            if !segments.is_empty() {
                strands.push(SpringStrand {
                    segments,
                    stiffness: chain.stiffness,
                    drag: chain.drag,
                    gravity_power: chain.gravity_power,
                });
            }
        }
        Self { strands, seeded: false }
    }

    pub fn is_empty(&self) -> bool {
        self.strands.is_empty()
    }

    pub fn step(
        &mut self,
        skeleton: &SkeletonAsset,
        pose: &mut Pose,
        worlds: &mut [Mat4],
        delta: f32,
    ) {
        if !self.seeded {
            for strand in &mut self.strands {
                for segment in &mut strand.segments {
                    let tail = worlds[segment.child as usize].to_scale_rotation_translation().2;
                    segment.prev_tail = tail;
                    segment.curr_tail = tail;
                }
            }
            self.seeded = true;
        }
        if delta <= 0.0 {
            return;
        }

        for strand in &mut self.strands {
            for segment in &mut strand.segments {
                let joint_idx = segment.joint as usize;
                let child_idx = segment.child as usize;
                let (_, head_rotation, head_position) =
                    worlds[joint_idx].to_scale_rotation_translation();

                let animated_dir = (head_rotation * segment.bone_axis).normalize_or_zero();
                let inertia = (segment.curr_tail - segment.prev_tail) * (1.0 - strand.drag);
                let mut next_tail = segment.curr_tail
                    + inertia
                    + animated_dir * (strand.stiffness * delta * segment.rest_length)
                    + Vec3::NEG_Y * (strand.gravity_power * delta);

                // Tail stays on the sphere of the bone's rest length.
                let offset = next_tail - head_position;
                let dir = offset.normalize_or_zero();
                let dir = if dir == Vec3::ZERO { animated_dir } else { dir };
                next_tail = head_position + dir * segment.rest_length;

                segment.prev_tail = segment.curr_tail;
                segment.curr_tail = next_tail;

                if animated_dir == Vec3::ZERO {
                    continue;
                }
                let correction = Quat::from_rotation_arc(animated_dir, dir);
                let corrected_world = (correction * head_rotation).normalize();
                let parent_rotation = skeleton.joints[joint_idx]
                    .parent
                    .map(|p| worlds[p as usize].to_scale_rotation_translation().1)
                    .unwrap_or(Quat::IDENTITY);
                pose.rotations[joint_idx] = (parent_rotation.inverse() * corrected_world).normalize();

                // Refresh this joint and its child so the next segment down
                // the strand reads post-correction positions.
                let parent_world = skeleton.joints[joint_idx]
                    .parent
                    .map(|p| worlds[p as usize])
                    .unwrap_or(Mat4::IDENTITY);
                worlds[joint_idx] = parent_world * pose.local_matrix(joint_idx);
                worlds[child_idx] = worlds[joint_idx] * pose.local_matrix(child_idx);
            }
        }
    }
}
