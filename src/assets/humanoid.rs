use anyhow::{anyhow, bail, Context, Result};
use glam::{Mat4, Quat, Vec2, Vec3};
use gltf::mesh::Mode;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Joint-name fragments that mark secondary-motion chains in common
/// humanoid rigs (hair strands, skirts, tails, chest bones).
const SPRING_NAME_HINTS: [&str; 4] = ["hair", "skirt", "tail", "bust"];

const DEFAULT_SPRING_STIFFNESS: f32 = 0.65;
const DEFAULT_SPRING_DRAG: f32 = 0.4;
const DEFAULT_SPRING_GRAVITY: f32 = 0.02;

#[derive(Clone)]
pub struct SkeletonJoint {
    pub name: Arc<str>,
    pub parent: Option<u32>,
    pub rest_translation: Vec3,
    pub rest_rotation: Quat,
    pub rest_scale: Vec3,
    pub inverse_bind: Mat4,
}

impl SkeletonJoint {
    pub fn rest_local(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.rest_scale, self.rest_rotation, self.rest_translation)
    }
}

#[derive(Clone)]
pub struct SkeletonAsset {
    pub name: Arc<str>,
    pub joints: Arc<[SkeletonJoint]>,
    pub roots: Arc<[u32]>,
    /// Parent-before-child traversal order for world-matrix composition.
    pub order: Arc<[u32]>,
    index: HashMap<Arc<str>, u32>,
}

impl SkeletonAsset {
    /// Builds a skeleton from an explicit joint list. Joints must reference
    /// parents by index within the list; orphaned or cyclic parents fail.
    pub fn from_joints(name: &str, joints: Vec<SkeletonJoint>) -> Result<Self> {
        let mut roots = Vec::new();
        let mut index = HashMap::with_capacity(joints.len());
        for (idx, joint) in joints.iter().enumerate() {
            if let Some(parent) = joint.parent {
                if parent as usize >= joints.len() {
                    bail!("Joint '{}' references missing parent {parent}", joint.name);
                }
            } else {
                roots.push(idx as u32);
            }
            index.insert(Arc::clone(&joint.name), idx as u32);
        }
        let order = traversal_order(&joints, &roots);
        if order.len() != joints.len() {
            bail!("Skeleton '{name}' has a joint cycle or orphaned joints");
        }
        Ok(Self {
            name: Arc::<str>::from(name.to_string()),
            joints: Arc::from(joints.into_boxed_slice()),
            roots: Arc::from(roots.into_boxed_slice()),
            order: Arc::from(order.into_boxed_slice()),
            index,
        })
    }

    pub fn joint_index(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AvatarVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub joints: [u16; 4],
    pub weights: [f32; 4],
}

impl AvatarVertex {
    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<AvatarVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 24,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: 32,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Uint16x4,
                },
                wgpu::VertexAttribute {
                    offset: 40,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

#[derive(Clone)]
pub struct AvatarTexture {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Clone)]
pub struct AvatarMaterial {
    pub base_color_factor: [f32; 4],
    pub base_color_texture: Option<usize>,
}

#[derive(Clone, Copy)]
pub struct AvatarSubset {
    pub index_offset: u32,
    pub index_count: u32,
    pub material: usize,
}

#[derive(Clone, Debug)]
pub struct SpringChain {
    /// Joint indices along the chain, root first. At least two entries.
    pub joints: Vec<u32>,
    pub stiffness: f32,
    pub drag: f32,
    pub gravity_power: f32,
}

pub struct HumanoidAsset {
    pub name: Arc<str>,
    pub skeleton: Arc<SkeletonAsset>,
    pub vertices: Vec<AvatarVertex>,
    pub indices: Vec<u32>,
    pub subsets: Vec<AvatarSubset>,
    pub materials: Vec<AvatarMaterial>,
    pub textures: Vec<AvatarTexture>,
    pub spring_chains: Vec<SpringChain>,
}

/// Imports a humanoid glTF/VRM asset: the first skin becomes the skeleton,
/// every triangle primitive skinned to it is merged into one vertex/index
/// set, and spring chains are resolved from `explicit_chains` or joint-name
/// heuristics. Non-triangle primitives, unskinned nodes and morph data are
/// dropped at import.
pub fn load_humanoid(path: impl AsRef<Path>, explicit_chains: &[Vec<String>]) -> Result<HumanoidAsset> {
    let path_ref = path.as_ref();
    let (document, buffers, images) = gltf::import(path_ref)
        .with_context(|| format!("Failed to import humanoid model from {}", path_ref.display()))?;

    let mut skins = document.skins();
    let skin = skins
        .next()
        .ok_or_else(|| anyhow!("Model '{}' has no skin; cannot animate it", path_ref.display()))?;
    if skins.next().is_some() {
        eprintln!(
            "[assets] model '{}' contains multiple skins; only the first is used.",
            path_ref.display()
        );
    }

    let model_name: Arc<str> = Arc::<str>::from(
        path_ref.file_stem().and_then(|stem| stem.to_str()).unwrap_or("avatar").to_string(),
    );

    let skeleton = Arc::new(import_skeleton(&document, &skin, &buffers, &model_name)?);

    let mut vertices: Vec<AvatarVertex> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut subsets: Vec<AvatarSubset> = Vec::new();
    let mut skipped_unskinned = 0usize;
    let mut skipped_primitives = 0usize;

    let default_material = document.materials().len();

    for node in document.nodes() {
        let Some(mesh) = node.mesh() else {
            continue;
        };
        let skinned_here = node.skin().map(|s| s.index()) == Some(skin.index());
        if !skinned_here {
            skipped_unskinned += 1;
            continue;
        }
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                skipped_primitives += 1;
                continue;
            }
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
            let positions: Vec<Vec3> = reader
                .read_positions()
                .ok_or_else(|| anyhow!("POSITION attribute missing in {}", path_ref.display()))?
                .map(Vec3::from_array)
                .collect();
            if positions.is_empty() {
                continue;
            }

            let normals: Vec<Vec3> = reader
                .read_normals()
                .map(|it| it.map(Vec3::from_array).collect())
                .unwrap_or_else(|| vec![Vec3::Y; positions.len()]);
            let tex_coords: Vec<Vec2> = reader
                .read_tex_coords(0)
                .map(|coords| coords.into_f32().map(Vec2::from_array).collect())
                .unwrap_or_else(|| vec![Vec2::ZERO; positions.len()]);
            let joints: Vec<[u16; 4]> = reader
                .read_joints(0)
                .map(|it| it.into_u16().collect())
                .unwrap_or_else(|| vec![[0; 4]; positions.len()]);
            let weights: Vec<[f32; 4]> = reader
                .read_weights(0)
                .map(|it| it.into_f32().collect())
                .unwrap_or_else(|| vec![[1.0, 0.0, 0.0, 0.0]; positions.len()]);

            let local_indices: Vec<u32> = reader
                .read_indices()
                .map(|read| read.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());

            let base_vertex = vertices.len() as u32;
            for (i, position) in positions.iter().enumerate() {
                let normal = normals.get(i).copied().unwrap_or(Vec3::Y).normalize_or_zero();
                vertices.push(AvatarVertex {
                    position: position.to_array(),
                    normal: normal.to_array(),
                    uv: tex_coords.get(i).copied().unwrap_or(Vec2::ZERO).to_array(),
                    joints: joints.get(i).copied().unwrap_or([0; 4]),
                    weights: weights.get(i).copied().unwrap_or([1.0, 0.0, 0.0, 0.0]),
                });
            }

            let index_offset = indices.len() as u32;
            indices.extend(local_indices.iter().map(|idx| idx + base_vertex));
            let index_count = indices.len() as u32 - index_offset;
            let material = primitive.material().index().unwrap_or(default_material);
            subsets.push(AvatarSubset { index_offset, index_count, material });
        }
    }

    if subsets.is_empty() {
        bail!("Model '{}' has no triangle primitives bound to its skin", path_ref.display());
    }

    let mut textures: Vec<AvatarTexture> = Vec::with_capacity(document.textures().len());
    let mut texture_slots: HashMap<usize, usize> = HashMap::new();
    for texture in document.textures() {
        let source = texture.source().index();
        let image_data = images
            .get(source)
            .ok_or_else(|| anyhow!("Image index {} missing in {}", source, path_ref.display()))?;
        texture_slots.insert(texture.index(), textures.len());
        textures.push(AvatarTexture {
            width: image_data.width,
            height: image_data.height,
            rgba: convert_image_to_rgba(image_data)?,
        });
    }

    let mut materials: Vec<AvatarMaterial> = Vec::new();
    for material in document.materials() {
        let pbr = material.pbr_metallic_roughness();
        let base_color_texture = pbr
            .base_color_texture()
            .and_then(|info| texture_slots.get(&info.texture().index()).copied());
        materials.push(AvatarMaterial {
            base_color_factor: pbr.base_color_factor(),
            base_color_texture,
        });
    }
    // Slot for primitives with no material reference.
    materials.push(AvatarMaterial { base_color_factor: [1.0; 4], base_color_texture: None });

    let spring_chains = if explicit_chains.is_empty() {
        discover_spring_chains(&skeleton)
    } else {
        resolve_spring_chains(&skeleton, explicit_chains)
    };

    eprintln!(
        "[assets] imported '{}': {} joints, {} vertices, {} subsets, {} spring chains ({} unskinned nodes, {} non-triangle primitives dropped)",
        model_name,
        skeleton.joint_count(),
        vertices.len(),
        subsets.len(),
        spring_chains.len(),
        skipped_unskinned,
        skipped_primitives,
    );

    Ok(HumanoidAsset {
        name: model_name,
        skeleton,
        vertices,
        indices,
        subsets,
        materials,
        textures,
        spring_chains,
    })
}

fn import_skeleton(
    document: &gltf::Document,
    skin: &gltf::Skin,
    buffers: &[gltf::buffer::Data],
    model_name: &Arc<str>,
) -> Result<SkeletonAsset> {
    let joint_nodes: Vec<_> = skin.joints().collect();
    if joint_nodes.is_empty() {
        bail!("Skin in '{model_name}' has no joints");
    }

    let node_to_joint: HashMap<usize, u32> =
        joint_nodes.iter().enumerate().map(|(idx, node)| (node.index(), idx as u32)).collect();

    let mut node_trs: HashMap<usize, (Vec3, Quat, Vec3)> = HashMap::new();
    for node in document.nodes() {
        let (t, r, s) = node.transform().decomposed();
        let rotation = Quat::from_xyzw(r[0], r[1], r[2], r[3]);
        let rotation = if rotation.length_squared() > 0.0 { rotation.normalize() } else { Quat::IDENTITY };
        node_trs.insert(node.index(), (Vec3::from_array(t), rotation, Vec3::from_array(s)));
    }

    let mut inverse_bind = vec![Mat4::IDENTITY; joint_nodes.len()];
    let skin_reader = skin.reader(|buffer| Some(&buffers[buffer.index()]));
    if let Some(reader) = skin_reader.read_inverse_bind_matrices() {
        for (idx, matrix) in reader.enumerate() {
            if idx < inverse_bind.len() {
                inverse_bind[idx] = Mat4::from_cols_array_2d(&matrix);
            }
        }
    }

    let mut parent_by_joint: Vec<Option<u32>> = vec![None; joint_nodes.len()];
    for (parent_idx, node) in joint_nodes.iter().enumerate() {
        for child in node.children() {
            if let Some(&child_joint) = node_to_joint.get(&child.index()) {
                parent_by_joint[child_joint as usize] = Some(parent_idx as u32);
            }
        }
    }

    let mut joints: Vec<SkeletonJoint> = Vec::with_capacity(joint_nodes.len());
    let mut roots: Vec<u32> = Vec::new();
    let mut index: HashMap<Arc<str>, u32> = HashMap::with_capacity(joint_nodes.len());
    for (joint_idx, node) in joint_nodes.iter().enumerate() {
        let parent = parent_by_joint[joint_idx];
        if parent.is_none() {
            roots.push(joint_idx as u32);
        }
        let name: Arc<str> = Arc::<str>::from(
            node.name().map(|n| n.to_string()).unwrap_or_else(|| format!("joint_{joint_idx}")),
        );
        let (rest_translation, rest_rotation, rest_scale) =
            node_trs.get(&node.index()).copied().unwrap_or((Vec3::ZERO, Quat::IDENTITY, Vec3::ONE));
        index.insert(Arc::clone(&name), joint_idx as u32);
        joints.push(SkeletonJoint {
            name,
            parent,
            rest_translation,
            rest_rotation,
            rest_scale,
            inverse_bind: inverse_bind[joint_idx],
        });
    }

    let order = traversal_order(&joints, &roots);
    if order.len() != joints.len() {
        bail!("Skin in '{model_name}' has a joint cycle or orphaned joints");
    }

    Ok(SkeletonAsset {
        name: Arc::clone(model_name),
        joints: Arc::from(joints.into_boxed_slice()),
        roots: Arc::from(roots.into_boxed_slice()),
        order: Arc::from(order.into_boxed_slice()),
        index,
    })
}

fn traversal_order(joints: &[SkeletonJoint], roots: &[u32]) -> Vec<u32> {
    let mut order: Vec<u32> = Vec::with_capacity(joints.len());
    let mut placed = vec![false; joints.len()];
    for &root in roots {
        order.push(root);
        placed[root as usize] = true;
    }
    // Joint lists are small; a quadratic fixpoint keeps this simple.
    loop {
        let before = order.len();
        for (idx, joint) in joints.iter().enumerate() {
            if placed[idx] {
                continue;
            }
            if let Some(parent) = joint.parent {
                if placed[parent as usize] {
                    order.push(idx as u32);
                    placed[idx] = true;
                }
            }
        }
        if order.len() == before {
            break;
        }
    }
    order
}

fn convert_image_to_rgba(image: &gltf::image::Data) -> Result<Vec<u8>> {
    match image.format {
        gltf::image::Format::R8 => {
            let mut out = Vec::with_capacity(image.pixels.len() * 4);
            for &value in &image.pixels {
                out.extend_from_slice(&[value, value, value, 255]);
            }
            Ok(out)
        }
        gltf::image::Format::R8G8 => {
            let mut out = Vec::with_capacity(image.pixels.len() / 2 * 4);
            for chunk in image.pixels.chunks_exact(2) {
                out.extend_from_slice(&[chunk[0], chunk[1], 0, 255]);
            }
            Ok(out)
        }
        gltf::image::Format::R8G8B8 => {
            let mut out = Vec::with_capacity(image.pixels.len() / 3 * 4);
            for chunk in image.pixels.chunks_exact(3) {
                out.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
            Ok(out)
        }
        gltf::image::Format::R8G8B8A8 => Ok(image.pixels.clone()),
        other => bail!("Unsupported image format {other:?}"),
    }
}

/// Walks the skeleton for chains of joints whose names carry the usual
/// secondary-motion markers. A chain starts at a marked joint whose parent
/// is unmarked and follows marked children.
fn discover_spring_chains(skeleton: &SkeletonAsset) -> Vec<SpringChain> {
    let marked: Vec<bool> = skeleton
        .joints
        .iter()
        .map(|joint| {
            let lower = joint.name.to_lowercase();
            SPRING_NAME_HINTS.iter().any(|hint| lower.contains(hint))
        })
        .collect();

    let mut children: Vec<Vec<u32>> = vec![Vec::new(); skeleton.joints.len()];
    for (idx, joint) in skeleton.joints.iter().enumerate() {
        if let Some(parent) = joint.parent {
            children[parent as usize].push(idx as u32);
        }
    }

    let mut chains = Vec::new();
    for (idx, joint) in skeleton.joints.iter().enumerate() {
        if !marked[idx] {
            continue;
        }
        let parent_marked = joint.parent.map(|p| marked[p as usize]).unwrap_or(false);
        if parent_marked {
            continue;
        }
        let mut chain = vec![idx as u32];
        let mut cursor = idx as u32;
        while let Some(&next) =
            children[cursor as usize].iter().find(|&&child| marked[child as usize])
        {
            chain.push(next);
            cursor = next;
        }
        if chain.len() >= 2 {
            chains.push(SpringChain {
                joints: chain,
                stiffness: DEFAULT_SPRING_STIFFNESS,
                drag: DEFAULT_SPRING_DRAG,
                gravity_power: DEFAULT_SPRING_GRAVITY,
            });
        }
    }
    chains
}

fn resolve_spring_chains(skeleton: &SkeletonAsset, explicit: &[Vec<String>]) -> Vec<SpringChain> {
    let mut chains = Vec::new();
    for names in explicit {
        let mut joints = Vec::with_capacity(names.len());
        let mut missing = None;
        for name in names {
            match skeleton.joint_index(name) {
                Some(idx) => joints.push(idx),
                None => {
                    missing = Some(name.clone());
                    break;
                }
            }
        }
        if let Some(name) = missing {
            eprintln!("[assets] spring chain references unknown joint '{name}', skipping chain.");
            continue;
        }
        if joints.len() < 2 {
            eprintln!("[assets] spring chain {names:?} is too short, skipping chain.");
            continue;
        }
        chains.push(SpringChain {
            joints,
            stiffness: DEFAULT_SPRING_STIFFNESS,
            drag: DEFAULT_SPRING_DRAG,
            gravity_power: DEFAULT_SPRING_GRAVITY,
        });
    }
    chains
}

#[cfg(test)]
pub(crate) fn test_skeleton(names: &[(&str, Option<u32>)]) -> SkeletonAsset {
    let mut joints = Vec::new();
    let mut roots = Vec::new();
    let mut index = HashMap::new();
    for (idx, (name, parent)) in names.iter().enumerate() {
        let name: Arc<str> = Arc::<str>::from(name.to_string());
        if parent.is_none() {
            roots.push(idx as u32);
        }
        index.insert(Arc::clone(&name), idx as u32);
        joints.push(SkeletonJoint {
            name,
            parent: *parent,
            rest_translation: Vec3::new(0.0, 0.1, 0.0),
            rest_rotation: Quat::IDENTITY,
            rest_scale: Vec3::ONE,
            inverse_bind: Mat4::IDENTITY,
        });
    }
    let order = traversal_order(&joints, &roots);
    SkeletonAsset {
        name: Arc::<str>::from("test"),
        joints: Arc::from(joints.into_boxed_slice()),
        roots: Arc::from(roots.into_boxed_slice()),
        order: Arc::from(order.into_boxed_slice()),
        index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_order_places_parents_first() {
        let skeleton = test_skeleton(&[
            ("hips", None),
            ("spine", Some(0)),
            ("chest", Some(1)),
            ("hair_root", Some(2)),
            ("hair_1", Some(3)),
        ]);
        let order = skeleton.order.as_ref();
        assert_eq!(order.len(), 5);
        let position = |j: u32| order.iter().position(|&o| o == j).unwrap();
        for (idx, joint) in skeleton.joints.iter().enumerate() {
            if let Some(parent) = joint.parent {
                assert!(position(parent) < position(idx as u32));
            }
        }
    }

    #[test]
    fn discovers_hair_chain_by_name() {
        let skeleton = test_skeleton(&[
            ("hips", None),
            ("head", Some(0)),
            ("HairRoot", Some(1)),
            ("Hair_01", Some(2)),
            ("Hair_02", Some(3)),
        ]);
        let chains = discover_spring_chains(&skeleton);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].joints, vec![2, 3, 4]);
    }

    #[test]
    fn explicit_chain_with_unknown_joint_is_skipped() {
        let skeleton = test_skeleton(&[("hips", None), ("tail_0", Some(0)), ("tail_1", Some(1))]);
        let chains = resolve_spring_chains(
            &skeleton,
            &[
                vec!["tail_0".to_string(), "tail_1".to_string()],
                vec!["tail_0".to_string(), "nope".to_string()],
            ],
        );
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].joints, vec![1, 2]);
    }
}
