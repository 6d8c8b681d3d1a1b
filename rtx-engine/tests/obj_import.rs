use std::{fs, path::Path};

use glam::{Mat4, Vec3};
use rtx_engine::{
    model::{
        emitter,
        import::{ObjImporter, SceneImporter},
        load,
    },
    shader::Material,
};

const QUAD_OBJ: &str = "\
mtllib quad.mtl
v 0 0 0
v 2 0 0
v 2 3 0
v 0 3 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
usemtl lamp
f 1/1 2/2 3/3 4/4
";

const QUAD_MTL: &str = "\
newmtl lamp
Kd 0.2 0.3 0.4
Ke 5 5 5
map_Kd lamp.png
";

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-5,
        "{actual} is not close to {expected}"
    );
}

fn write_quad(directory: &Path) -> std::path::PathBuf {
    fs::write(directory.join("quad.mtl"), QUAD_MTL).unwrap();
    let path = directory.join("quad.obj");
    fs::write(&path, QUAD_OBJ).unwrap();
    path
}

#[test]
fn test_import_quad_with_emission() {
    let directory = tempfile::tempdir().unwrap();
    let path = write_quad(directory.path());

    let scene = ObjImporter.import(&path).unwrap();

    assert_eq!(scene.meshes.len(), 1);
    assert_eq!(scene.meshes[0].positions.len(), 4);
    assert!(scene.meshes[0].normals.is_empty());
    assert_eq!(scene.meshes[0].faces().count(), 1);
    assert_eq!(scene.materials[0].emission, Some(Vec3::splat(5.0)));
    assert_eq!(scene.materials[0].diffuse_texture.as_deref(), Some("lamp.png"));
}

#[test]
fn test_flatten_imported_quad() {
    let directory = tempfile::tempdir().unwrap();
    let path = write_quad(directory.path());

    let scene = ObjImporter.import(&path).unwrap();
    let flat = load::flatten(&scene, Mat4::IDENTITY, &path).unwrap();

    assert_eq!(flat.vertices.len(), 4);
    assert_eq!(flat.indices, vec![0, 1, 2, 0, 2, 3]);
    assert_eq!(flat.material_indices, vec![0, 0]);
    assert_eq!(flat.textures, vec![directory.path().join("lamp.png")]);
    assert!(flat.vertices.iter().all(|vertex| vertex.normal == Vec3::Z));

    // Emissive materials shade as white
    let material = flat.materials[0];
    assert_eq!(material.diffuse, Vec3::ONE);
    assert_eq!(material.emission, Vec3::splat(5.0));
    assert_eq!(material.texture_id, 0);

    let emitters = emitter::extract_emitters(&flat);
    assert_eq!(emitters.len(), 2);
    assert_close(emitter::total_area(&emitters), 6.0);
}

#[test]
fn test_missing_material_library() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("bare.obj");
    fs::write(&path, "mtllib nowhere.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();

    let scene = ObjImporter.import(&path).unwrap();
    let flat = load::flatten(&scene, Mat4::IDENTITY, &path).unwrap();

    assert_eq!(flat.materials.len(), 1);
    assert_eq!(flat.materials[0].texture_id, Material::UNTEXTURED);
    assert!(emitter::extract_emitters(&flat).is_empty());
}

#[test]
fn test_emissive_triangle_yields_one_emitter() {
    let directory = tempfile::tempdir().unwrap();
    fs::write(directory.path().join("light.mtl"), "newmtl light\nKe 1 0.5 0.25\n").unwrap();
    let path = directory.path().join("light.obj");
    fs::write(
        &path,
        "mtllib light.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl light\nf 1 2 3\n",
    )
    .unwrap();

    let scene = ObjImporter.import(&path).unwrap();
    let flat = load::flatten(&scene, Mat4::IDENTITY, &path).unwrap();
    let emitters = emitter::extract_emitters(&flat);

    assert_eq!(emitters.len(), 1);
    assert_eq!(emitters[0].emission, Vec3::new(1.0, 0.5, 0.25));
    assert_close(emitters[0].area, 0.5);
}
