use std::path::{Path, PathBuf};

use glam::{Mat3, Mat4, Vec2, Vec3};

use super::import::{ImportedMaterial, ImportedMesh, ImportedScene, SceneNode};
use crate::error::LoadError;
use crate::shader::{Material, Vertex};

/// Normal used for vertices of meshes without normals.
const DEFAULT_NORMAL: Vec3 = Vec3::Z;
const DEFAULT_DIFFUSE: Vec3 = Vec3::splat(0.5);
const DEFAULT_SPECULAR: Vec3 = Vec3::splat(0.03);
const DEFAULT_SHININESS: f32 = 20.0;

/// A scene flattened into the arrays uploaded for one object.
#[derive(Clone, Debug, Default)]
pub struct FlatScene {
    pub vertices: Vec<Vertex>,
    /// Three indices per triangle, valid across the whole vertex array.
    pub indices: Vec<u32>,
    pub materials: Vec<Material>,
    /// One material index per triangle.
    pub material_indices: Vec<i32>,
    /// Texture files, resolved against the scene file's directory.
    pub textures: Vec<PathBuf>,
}

impl FlatScene {
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.material_indices.len()
    }

    /// The three vertex positions of triangle `triangle`.
    #[must_use]
    pub fn triangle(&self, triangle: usize) -> [Vec3; 3] {
        let corner = |i: usize| self.vertices[self.indices[3 * triangle + i] as usize].position;
        [corner(0), corner(1), corner(2)]
    }
}

/// Flattens an imported scene.
///
/// The node hierarchy is walked depth first, baking each node's accumulated
/// transform into its meshes' vertices. `scene_path` is the file the scene was
/// imported from; texture paths are resolved next to it.
pub fn flatten(
    scene: &ImportedScene,
    root_transform: Mat4,
    scene_path: &Path,
) -> Result<FlatScene, LoadError> {
    let root = scene
        .root
        .as_ref()
        .ok_or_else(|| LoadError::NoRootNode(scene_path.to_path_buf()))?;

    let mut flat = FlatScene::default();
    let directory = scene_path.parent().unwrap_or_else(|| Path::new(""));
    for material in &scene.materials {
        let material = import_material(material, directory, &mut flat.textures);
        flat.materials.push(material);
    }

    flatten_node(scene, root, root_transform, &mut flat)?;

    Ok(flat)
}

/// Builds the material table entry for one source material.
///
/// Emitters skip the diffuse/specular import: the shading path multiplies
/// emitted radiance by the diffuse colour, so it is forced to white.
fn import_material(
    material: &ImportedMaterial,
    directory: &Path,
    textures: &mut Vec<PathBuf>,
) -> Material {
    let emission = material.emission.unwrap_or(Vec3::ZERO);

    let mut imported = if emission.length_squared() > 0.0 {
        Material {
            diffuse: Vec3::ONE,
            specular: Vec3::ZERO,
            emission,
            shininess: 0.0,
            texture_id: Material::UNTEXTURED,
        }
    } else {
        Material {
            diffuse: material.diffuse.unwrap_or(DEFAULT_DIFFUSE),
            specular: material.specular.unwrap_or(DEFAULT_SPECULAR),
            emission: Vec3::ZERO,
            shininess: material.shininess.unwrap_or(DEFAULT_SHININESS),
            texture_id: Material::UNTEXTURED,
        }
    };

    if let Some(texture) = &material.diffuse_texture {
        imported.texture_id = i32::try_from(textures.len()).unwrap_or(i32::MAX);
        textures.push(directory.join(texture));
    }

    imported
}

fn flatten_node(
    scene: &ImportedScene,
    node: &SceneNode,
    parent_transform: Mat4,
    flat: &mut FlatScene,
) -> Result<(), LoadError> {
    let transform = parent_transform * node.transform;
    // TODO: inverse transpose, normals skew under non-uniform scale
    let normal_transform = Mat3::from_mat4(transform);

    for &mesh_index in &node.meshes {
        let mesh = scene.meshes.get(mesh_index).ok_or(LoadError::InvalidMesh {
            mesh: mesh_index,
            mesh_count: scene.meshes.len(),
        })?;
        if mesh.material >= scene.materials.len() {
            return Err(LoadError::InvalidMaterial {
                mesh: mesh_index,
                material: mesh.material,
                material_count: scene.materials.len(),
            });
        }
        flatten_mesh(mesh_index, mesh, transform, normal_transform, flat)?;
    }

    for child in &node.children {
        flatten_node(scene, child, transform, flat)?;
    }

    Ok(())
}

fn flatten_mesh(
    mesh_index: usize,
    mesh: &ImportedMesh,
    transform: Mat4,
    normal_transform: Mat3,
    flat: &mut FlatScene,
) -> Result<(), LoadError> {
    let vertex_offset = u32::try_from(flat.vertices.len()).map_err(|_| LoadError::TooManyVertices)?;
    u32::try_from(flat.vertices.len() + mesh.positions.len())
        .map_err(|_| LoadError::TooManyVertices)?;

    flat.vertices
        .extend(mesh.positions.iter().enumerate().map(|(i, &position)| Vertex {
            position: transform.transform_point3(position),
            normal: mesh
                .normals
                .get(i)
                .map_or(DEFAULT_NORMAL, |&normal| normal_transform * normal),
            tex_coord: mesh.tex_coords.get(i).copied().unwrap_or(Vec2::ZERO),
        }));

    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    let material = mesh.material as i32;
    for face in mesh.faces() {
        if let Some(&index) = face.iter().find(|&&index| index as usize >= mesh.positions.len()) {
            return Err(LoadError::InvalidFaceIndex {
                mesh: mesh_index,
                index,
                vertex_count: mesh.positions.len(),
            });
        }
        // Fan triangulation around the first vertex of the face
        for i in 2..face.len() {
            flat.indices.extend([
                face[0] + vertex_offset,
                face[i - 1] + vertex_offset,
                face[i] + vertex_offset,
            ]);
            flat.material_indices.push(material);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn triangle_scene(root: Mat4) -> ImportedScene {
        ImportedScene {
            root: Some(SceneNode::new(root, vec![0])),
            meshes: vec![ImportedMesh {
                positions: vec![
                    Vec3::new(0.0, 0.0, 0.0),
                    Vec3::new(1.0, 0.0, 0.0),
                    Vec3::new(0.0, 1.0, 0.0),
                ],
                normals: vec![Vec3::Z; 3],
                tex_coords: vec![Vec2::ZERO, Vec2::X, Vec2::Y],
                indices: vec![0, 1, 2],
                face_arities: Vec::new(),
                material: 0,
            }],
            materials: vec![ImportedMaterial::default()],
        }
    }

    #[test]
    fn test_identity_keeps_positions() {
        let scene = triangle_scene(Mat4::IDENTITY);
        let flat = flatten(&scene, Mat4::IDENTITY, Path::new("scene.obj")).unwrap();
        for (vertex, source) in flat.vertices.iter().zip(&scene.meshes[0].positions) {
            assert!(vertex.position.abs_diff_eq(*source, EPSILON));
        }
        assert_eq!(flat.indices, vec![0, 1, 2]);
        assert_eq!(flat.material_indices, vec![0]);
    }

    #[test]
    fn test_translation_moves_positions_not_normals() {
        let offset = Vec3::new(2.0, -3.0, 5.0);
        let scene = triangle_scene(Mat4::IDENTITY);
        let flat = flatten(&scene, Mat4::from_translation(offset), Path::new("scene.obj")).unwrap();
        for (vertex, source) in flat.vertices.iter().zip(&scene.meshes[0].positions) {
            assert!(vertex.position.abs_diff_eq(*source + offset, EPSILON));
            assert!(vertex.normal.abs_diff_eq(Vec3::Z, EPSILON));
        }
    }

    #[test]
    fn test_hierarchy_accumulates_transforms() {
        let mut scene = triangle_scene(Mat4::from_translation(Vec3::X));
        let child = SceneNode::new(Mat4::from_translation(Vec3::Y), vec![0]);
        scene.root = scene.root.map(|root| root.with_child(child));

        let flat = flatten(&scene, Mat4::from_translation(Vec3::Z), Path::new("scene.obj")).unwrap();
        assert_eq!(flat.vertices.len(), 6);
        assert!(flat.vertices[0].position.abs_diff_eq(Vec3::new(1.0, 0.0, 1.0), EPSILON));
        assert!(flat.vertices[3].position.abs_diff_eq(Vec3::new(1.0, 1.0, 1.0), EPSILON));
        // Indices of the second mesh instance are offset past the first
        assert_eq!(flat.indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_fan_triangulation() {
        for sides in 3..8u32 {
            let scene = ImportedScene {
                root: Some(SceneNode::new(Mat4::IDENTITY, vec![0])),
                meshes: vec![ImportedMesh {
                    positions: (0..sides)
                        .map(|i| {
                            let angle = i as f32 / sides as f32 * std::f32::consts::TAU;
                            Vec3::new(angle.cos(), angle.sin(), 0.0)
                        })
                        .collect(),
                    indices: (0..sides).collect(),
                    face_arities: vec![sides],
                    ..Default::default()
                }],
                materials: vec![ImportedMaterial::default()],
            };
            let flat = flatten(&scene, Mat4::IDENTITY, Path::new("polygon.obj")).unwrap();
            assert_eq!(flat.triangle_count(), sides as usize - 2);
            for triangle in flat.indices.chunks_exact(3) {
                assert_eq!(triangle[0], 0);
            }
        }
    }

    #[test]
    fn test_missing_attributes_use_defaults() {
        let mut scene = triangle_scene(Mat4::IDENTITY);
        scene.meshes[0].normals.clear();
        scene.meshes[0].tex_coords.clear();
        let flat = flatten(&scene, Mat4::IDENTITY, Path::new("scene.obj")).unwrap();
        for vertex in &flat.vertices {
            assert_eq!(vertex.normal, Vec3::Z);
            assert_eq!(vertex.tex_coord, Vec2::ZERO);
        }
    }

    #[test]
    fn test_emissive_material_forced_white() {
        let mut scene = triangle_scene(Mat4::IDENTITY);
        scene.materials = vec![ImportedMaterial {
            diffuse: Some(Vec3::new(0.2, 0.3, 0.4)),
            specular: Some(Vec3::ONE),
            emission: Some(Vec3::splat(5.0)),
            shininess: Some(80.0),
            ..Default::default()
        }];
        let flat = flatten(&scene, Mat4::IDENTITY, Path::new("scene.obj")).unwrap();
        let material = flat.materials[0];
        assert_eq!(material.diffuse, Vec3::ONE);
        assert_eq!(material.specular, Vec3::ZERO);
        assert_eq!(material.emission, Vec3::splat(5.0));
    }

    #[test]
    fn test_material_defaults() {
        let scene = triangle_scene(Mat4::IDENTITY);
        let flat = flatten(&scene, Mat4::IDENTITY, Path::new("scene.obj")).unwrap();
        let material = flat.materials[0];
        assert_eq!(material.diffuse, DEFAULT_DIFFUSE);
        assert_eq!(material.specular, DEFAULT_SPECULAR);
        assert_eq!(material.shininess, DEFAULT_SHININESS);
        assert_eq!(material.texture_id, Material::UNTEXTURED);
    }

    #[test]
    fn test_textures_resolved_next_to_scene() {
        let mut scene = triangle_scene(Mat4::IDENTITY);
        scene.materials = vec![
            ImportedMaterial {
                diffuse_texture: Some("wood.png".to_string()),
                ..Default::default()
            },
            ImportedMaterial::default(),
            ImportedMaterial {
                diffuse_texture: Some("tiles/floor.png".to_string()),
                ..Default::default()
            },
        ];
        let flat = flatten(&scene, Mat4::IDENTITY, Path::new("assets/room/room.obj")).unwrap();
        assert_eq!(
            flat.textures,
            vec![
                PathBuf::from("assets/room/wood.png"),
                PathBuf::from("assets/room/tiles/floor.png"),
            ]
        );
        assert_eq!(flat.materials[0].texture_id, 0);
        assert_eq!(flat.materials[1].texture_id, Material::UNTEXTURED);
        assert_eq!(flat.materials[2].texture_id, 1);
    }

    #[test]
    fn test_material_table_independent_of_mesh_count() {
        let mut scene = triangle_scene(Mat4::IDENTITY);
        scene.materials.push(ImportedMaterial::default());
        scene.root = Some(SceneNode::new(Mat4::IDENTITY, vec![0, 0, 0]));
        let flat = flatten(&scene, Mat4::IDENTITY, Path::new("scene.obj")).unwrap();
        assert_eq!(flat.materials.len(), 2);
        assert_eq!(flat.material_indices.len(), 3);
    }

    #[test]
    fn test_errors() {
        let mut scene = triangle_scene(Mat4::IDENTITY);
        scene.root = None;
        assert!(matches!(
            flatten(&scene, Mat4::IDENTITY, Path::new("scene.obj")),
            Err(LoadError::NoRootNode(_))
        ));

        let mut scene = triangle_scene(Mat4::IDENTITY);
        scene.meshes[0].indices = vec![0, 1, 7];
        assert!(matches!(
            flatten(&scene, Mat4::IDENTITY, Path::new("scene.obj")),
            Err(LoadError::InvalidFaceIndex { index: 7, .. })
        ));

        let mut scene = triangle_scene(Mat4::IDENTITY);
        scene.meshes[0].material = 3;
        assert!(matches!(
            flatten(&scene, Mat4::IDENTITY, Path::new("scene.obj")),
            Err(LoadError::InvalidMaterial { material: 3, .. })
        ));
    }
}
