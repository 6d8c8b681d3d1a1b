//! The mesh import boundary.
//!
//! An importer turns a file into an [`ImportedScene`]: a node hierarchy with
//! local transforms, meshes with raw vertex arrays and polygon faces, and raw
//! material records. Flattening never looks at file formats.

use std::path::Path;

use glam::{Mat4, Vec2, Vec3};

use crate::error::LoadError;

/// A node of the imported hierarchy.
#[derive(Clone, Debug)]
pub struct SceneNode {
    /// Transform relative to the parent node.
    pub transform: Mat4,
    /// Indices into [`ImportedScene::meshes`].
    pub meshes: Vec<usize>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    #[must_use]
    pub fn new(transform: Mat4, meshes: Vec<usize>) -> Self {
        Self {
            transform,
            meshes,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct ImportedMesh {
    pub positions: Vec<Vec3>,
    /// Empty when the source has no normals.
    pub normals: Vec<Vec3>,
    /// Empty when the source has no texture coordinates.
    pub tex_coords: Vec<Vec2>,
    /// Face vertex indices, faces stored back to back.
    pub indices: Vec<u32>,
    /// Vertex count of each face. Empty means every face is a triangle.
    pub face_arities: Vec<u32>,
    /// Index into [`ImportedScene::materials`].
    pub material: usize,
}

impl ImportedMesh {
    /// Iterates over the faces of the mesh as slices of vertex indices.
    pub fn faces(&self) -> impl Iterator<Item = &[u32]> + '_ {
        let mut start = 0;
        let arities: Box<dyn Iterator<Item = usize> + '_> = if self.face_arities.is_empty() {
            Box::new(std::iter::repeat(3).take(self.indices.len() / 3))
        } else {
            Box::new(self.face_arities.iter().map(|&arity| arity as usize))
        };
        arities.map_while(move |arity| {
            let face = self.indices.get(start..start + arity)?;
            start += arity;
            Some(face)
        })
    }
}

/// Raw material properties, `None` where the source does not define them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportedMaterial {
    pub name: String,
    pub diffuse: Option<Vec3>,
    pub specular: Option<Vec3>,
    pub emission: Option<Vec3>,
    pub shininess: Option<f32>,
    /// Diffuse texture path, relative to the scene file.
    pub diffuse_texture: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ImportedScene {
    pub root: Option<SceneNode>,
    pub meshes: Vec<ImportedMesh>,
    pub materials: Vec<ImportedMaterial>,
}

/// An external scene importer.
pub trait SceneImporter {
    fn import(&self, path: &Path) -> Result<ImportedScene, LoadError>;
}

/// Imports Wavefront OBJ files and their MTL libraries through `tobj`.
///
/// OBJ has no hierarchy: every model becomes a mesh of a single identity root.
/// Emission is read from the MTL `Ke` statement.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjImporter;

impl SceneImporter for ObjImporter {
    fn import(&self, path: &Path) -> Result<ImportedScene, LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let (models, materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                single_index: true,
                triangulate: false,
                ignore_points: true,
                ignore_lines: true,
                ..Default::default()
            },
        )
        .map_err(|err| LoadError::Import {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let mut materials = match materials {
            Ok(materials) => materials.iter().map(import_material).collect::<Vec<_>>(),
            Err(err) => {
                tracing::warn!("No materials for {}: {}", path.display(), err);
                Vec::new()
            }
        };

        // Meshes without a material share one default entry
        let mut default_material = None;
        let meshes = models
            .into_iter()
            .map(|model| {
                let mesh = model.mesh;
                let material = match mesh.material_id {
                    Some(id) if id < materials.len() => id,
                    _ => *default_material.get_or_insert_with(|| {
                        materials.push(ImportedMaterial {
                            name: "default".to_string(),
                            ..Default::default()
                        });
                        materials.len() - 1
                    }),
                };

                ImportedMesh {
                    positions: mesh
                        .positions
                        .chunks_exact(3)
                        .map(Vec3::from_slice)
                        .collect(),
                    normals: mesh.normals.chunks_exact(3).map(Vec3::from_slice).collect(),
                    tex_coords: mesh
                        .texcoords
                        .chunks_exact(2)
                        .map(Vec2::from_slice)
                        .collect(),
                    indices: mesh.indices,
                    face_arities: mesh.face_arities,
                    material,
                }
            })
            .collect::<Vec<_>>();

        let root = SceneNode::new(Mat4::IDENTITY, (0..meshes.len()).collect());

        Ok(ImportedScene {
            root: Some(root),
            meshes,
            materials,
        })
    }
}

fn import_material(material: &tobj::Material) -> ImportedMaterial {
    ImportedMaterial {
        name: material.name.clone(),
        diffuse: material.diffuse.map(Vec3::from_array),
        specular: material.specular.map(Vec3::from_array),
        emission: material.emissive.map(Vec3::from_array),
        shininess: material.shininess,
        diffuse_texture: material.diffuse_texture.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faces_default_to_triangles() {
        let mesh = ImportedMesh {
            indices: vec![0, 1, 2, 2, 1, 3],
            ..Default::default()
        };
        let faces = mesh.faces().collect::<Vec<_>>();
        assert_eq!(faces, vec![&[0, 1, 2][..], &[2, 1, 3][..]]);
    }

    #[test]
    fn test_faces_with_arities() {
        let mesh = ImportedMesh {
            indices: vec![0, 1, 2, 3, 4, 5, 6],
            face_arities: vec![4, 3],
            ..Default::default()
        };
        let faces = mesh.faces().collect::<Vec<_>>();
        assert_eq!(faces, vec![&[0, 1, 2, 3][..], &[4, 5, 6][..]]);
    }

    #[test]
    fn test_faces_stop_at_truncated_face() {
        let mesh = ImportedMesh {
            indices: vec![0, 1, 2, 3],
            face_arities: vec![3, 3],
            ..Default::default()
        };
        assert_eq!(mesh.faces().count(), 1);
    }

    #[test]
    fn test_material_emission_from_ke() {
        let lamp = import_material(&tobj::Material {
            name: "lamp".to_string(),
            diffuse: Some([0.2, 0.3, 0.4]),
            emissive: Some([5.0, 5.0, 5.0]),
            ..Default::default()
        });
        assert_eq!(lamp.emission, Some(Vec3::splat(5.0)));
        assert_eq!(lamp.diffuse, Some(Vec3::new(0.2, 0.3, 0.4)));

        let plain = import_material(&tobj::Material::default());
        assert_eq!(plain.emission, None);
    }

    #[test]
    fn test_missing_file() {
        let err = ObjImporter
            .import(Path::new("does/not/exist.obj"))
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }
}
