use std::{
    cell::{Cell, RefCell},
    path::{Path, PathBuf},
};

use glam::{Mat4, Vec3};
use rtx_engine::{
    device::{
        Accelerator, BufferRole, DeviceAddress, DeviceBuffer, RayTracingProperties,
    },
    error::{DeviceError, Error, LoadError},
    model::{
        import::{ImportedMaterial, ImportedMesh, ImportedScene, SceneImporter, SceneNode},
        SceneState,
    },
    shader::{Emitter, ObjectDescriptor},
};

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-5,
        "{actual} is not close to {expected}"
    );
}

/// Decodes an upload without relying on the alignment of its bytes.
fn read_back<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

#[derive(Clone, Debug)]
struct MockBuffer {
    address: DeviceAddress,
    size: u64,
}

impl DeviceBuffer for MockBuffer {
    fn device_address(&self) -> DeviceAddress {
        self.address
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Hands out increasing addresses and remembers every upload.
#[derive(Default)]
struct MockAccelerator {
    next_address: Cell<u64>,
    uploads: RefCell<Vec<(BufferRole, Vec<u8>)>>,
    /// Upload count after which every upload fails.
    fail_after: Cell<Option<usize>>,
}

impl MockAccelerator {
    fn uploads_of(&self, role: BufferRole) -> Vec<Vec<u8>> {
        self.uploads
            .borrow()
            .iter()
            .filter(|(uploaded, _)| *uploaded == role)
            .map(|(_, data)| data.clone())
            .collect()
    }
}

impl Accelerator for MockAccelerator {
    type Buffer = MockBuffer;
    type Texture = PathBuf;

    fn ray_tracing_properties(&self) -> RayTracingProperties {
        RayTracingProperties {
            handle_size: 32,
            handle_alignment: 32,
            base_alignment: 64,
        }
    }

    fn upload(&self, role: BufferRole, data: &[u8]) -> Result<MockBuffer, DeviceError> {
        let mut uploads = self.uploads.borrow_mut();
        if self
            .fail_after
            .get()
            .is_some_and(|limit| uploads.len() >= limit)
        {
            return Err(DeviceError::Vulkan {
                operation: "upload",
                message: "out of device memory".to_string(),
            });
        }
        uploads.push((role, data.to_vec()));

        let address = self.next_address.get() + 0x1000;
        self.next_address.set(address);
        Ok(MockBuffer {
            address: DeviceAddress::new(address),
            size: data.len() as u64,
        })
    }

    fn load_texture(&self, path: &Path) -> Result<PathBuf, DeviceError> {
        Ok(path.to_path_buf())
    }
}

/// Serves a single 2x3 quad in the XY plane.
struct QuadImporter {
    emission: Option<Vec3>,
}

impl SceneImporter for QuadImporter {
    fn import(&self, _path: &Path) -> Result<ImportedScene, LoadError> {
        Ok(ImportedScene {
            root: Some(SceneNode::new(Mat4::IDENTITY, vec![0])),
            meshes: vec![ImportedMesh {
                positions: vec![
                    Vec3::new(0.0, 0.0, 0.0),
                    Vec3::new(2.0, 0.0, 0.0),
                    Vec3::new(2.0, 3.0, 0.0),
                    Vec3::new(0.0, 3.0, 0.0),
                ],
                indices: vec![0, 1, 2, 3],
                face_arities: vec![4],
                material: 0,
                ..Default::default()
            }],
            materials: vec![ImportedMaterial {
                name: "quad".to_string(),
                emission: self.emission,
                ..Default::default()
            }],
        })
    }
}

fn load_quad(
    scene: &mut SceneState<MockAccelerator>,
    accelerator: &MockAccelerator,
    emission: Option<Vec3>,
    transform: Mat4,
) -> Result<u32, Error> {
    scene.load_object(
        accelerator,
        &QuadImporter { emission },
        Path::new("quad.obj"),
        transform,
    )
}

#[test]
fn test_load_plain_quad() {
    let accelerator = MockAccelerator::default();
    let mut scene = SceneState::new();

    let index = load_quad(&mut scene, &accelerator, None, Mat4::IDENTITY).unwrap();

    assert_eq!(index, 0);
    assert_eq!(scene.objects().len(), 1);
    assert_eq!(scene.objects()[0].vertex_count, 4);
    assert_eq!(scene.objects()[0].index_count, 6);
    assert!(scene.emitters().is_empty());
    assert_eq!(scene.instances()[0].object_index, 0);

    let indices = accelerator.uploads_of(BufferRole::Indices);
    assert_eq!(read_back::<u32>(&indices[0]), vec![0, 1, 2, 0, 2, 3]);
}

#[test]
fn test_emissive_quad_becomes_two_emitters() {
    let accelerator = MockAccelerator::default();
    let mut scene = SceneState::new();

    load_quad(
        &mut scene,
        &accelerator,
        Some(Vec3::splat(5.0)),
        Mat4::IDENTITY,
    )
    .unwrap();

    assert_eq!(scene.emitters().len(), 2);
    assert_close(scene.total_emitter_area(), 6.0);
    for emitter in scene.emitters() {
        assert_eq!(emitter.emission, Vec3::splat(5.0));
        assert_close(emitter.area, 3.0);
    }

    let uploaded = accelerator.uploads_of(BufferRole::Emitters);
    let emitters = read_back::<Emitter>(uploaded.last().unwrap());
    assert_eq!(emitters, scene.emitters());
}

#[test]
fn test_emitters_are_placed_in_world_space() {
    let accelerator = MockAccelerator::default();
    let mut scene = SceneState::new();
    let offset = Vec3::new(0.0, -3.0, -10.0);

    load_quad(
        &mut scene,
        &accelerator,
        Some(Vec3::ONE),
        Mat4::from_translation(offset),
    )
    .unwrap();

    let first = scene.emitters()[0];
    assert_eq!(first.v0, offset);
    assert_eq!(first.normal, Vec3::Z);
    assert_close(scene.total_emitter_area(), 6.0);

    // Vertices stay in object space, the instance carries the placement
    let vertices = accelerator.uploads_of(BufferRole::Vertices);
    let positions = read_back::<f32>(&vertices[0]);
    assert_eq!(positions[..3], [0.0, 0.0, 0.0]);
    assert_eq!(scene.instances()[0].transform, Mat4::from_translation(offset));
}

#[test]
fn test_second_load_appends() {
    let accelerator = MockAccelerator::default();
    let mut scene = SceneState::new();

    assert_eq!(
        load_quad(&mut scene, &accelerator, Some(Vec3::ONE), Mat4::IDENTITY).unwrap(),
        0
    );
    let first = *scene.descriptors().get(0).unwrap();

    assert_eq!(
        load_quad(&mut scene, &accelerator, Some(Vec3::ONE), Mat4::IDENTITY).unwrap(),
        1
    );

    assert_eq!(scene.descriptors().len(), 2);
    assert_eq!(scene.descriptors().get(0), Some(&first));
    assert_ne!(
        scene.descriptors().get(1).unwrap().vertex_address,
        first.vertex_address
    );
    assert_eq!(scene.emitters().len(), 4);
    assert_eq!(
        scene
            .instances()
            .iter()
            .map(|instance| instance.object_index)
            .collect::<Vec<_>>(),
        vec![0, 1]
    );

    let tables = accelerator.uploads_of(BufferRole::ObjectDescriptors);
    assert_eq!(tables.len(), 2);
    let table = read_back::<ObjectDescriptor>(&tables[1]);
    assert_eq!(table, scene.descriptors().as_slice());
    assert_eq!(
        scene.descriptor_buffer().unwrap().size(),
        (2 * std::mem::size_of::<ObjectDescriptor>()) as u64
    );
}

#[test]
fn test_failed_upload_leaves_scene_untouched() {
    let accelerator = MockAccelerator::default();
    let mut scene = SceneState::new();
    load_quad(&mut scene, &accelerator, Some(Vec3::ONE), Mat4::IDENTITY).unwrap();
    let descriptor_address = scene.descriptor_buffer().unwrap().device_address();

    // The second object's geometry uploads, its descriptor table does not
    accelerator
        .fail_after
        .set(Some(accelerator.uploads.borrow().len() + 4));
    let err = load_quad(&mut scene, &accelerator, Some(Vec3::ONE), Mat4::IDENTITY).unwrap_err();

    assert!(matches!(err, Error::Device(DeviceError::Vulkan { .. })));
    assert_eq!(scene.objects().len(), 1);
    assert_eq!(scene.instances().len(), 1);
    assert_eq!(scene.descriptors().len(), 1);
    assert_eq!(scene.emitters().len(), 2);
    assert_eq!(
        scene.descriptor_buffer().unwrap().device_address(),
        descriptor_address
    );
}

#[test]
fn test_import_failure_is_fatal() {
    struct Missing;

    impl SceneImporter for Missing {
        fn import(&self, path: &Path) -> Result<ImportedScene, LoadError> {
            Err(LoadError::NotFound(path.to_path_buf()))
        }
    }

    let accelerator = MockAccelerator::default();
    let mut scene = SceneState::new();
    let err = scene
        .load_object(&accelerator, &Missing, Path::new("missing.obj"), Mat4::IDENTITY)
        .unwrap_err();

    assert!(matches!(err, Error::Load(LoadError::NotFound(_))));
    assert!(accelerator.uploads.borrow().is_empty());
    assert!(scene.descriptor_buffer().is_none());
}
