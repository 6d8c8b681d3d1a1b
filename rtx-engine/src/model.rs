use std::path::{Path, PathBuf};

use glam::Mat4;

use crate::{
    device::{Accelerator, BufferRole, DeviceBuffer},
    error::{LoadError, Result},
    shader::{Emitter, ObjectDescriptor},
};

pub mod emitter;
pub mod import;
pub mod load;

use import::SceneImporter;

/// A model file placed in the scene.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelDescriptor {
    pub path: PathBuf,
    pub transform: Mat4,
}

/// The models to load at startup, in load order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneDescriptor {
    pub models: Vec<ModelDescriptor>,
}

/// The device buffers of one loaded model.
pub struct Object<B> {
    pub vertices: B,
    pub indices: B,
    pub materials: B,
    pub material_indices: B,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl<B: DeviceBuffer> Object<B> {
    /// The shader-visible record pointing at this object's buffers.
    #[must_use]
    pub fn descriptor(&self, texture_offset: i32) -> ObjectDescriptor {
        ObjectDescriptor {
            texture_offset,
            _padding: 0,
            vertex_address: self.vertices.device_address(),
            index_address: self.indices.device_address(),
            material_address: self.materials.device_address(),
            material_index_address: self.material_indices.device_address(),
        }
    }
}

/// A placement of a loaded object in the world.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectInstance {
    pub transform: Mat4,
    /// Index of the object in the descriptor table.
    pub object_index: u32,
}

/// Append-only table of object descriptors.
///
/// An object's index in the table never changes once assigned.
#[derive(Clone, Debug, Default)]
pub struct ObjectDescriptorTable {
    descriptors: Vec<ObjectDescriptor>,
}

impl ObjectDescriptorTable {
    /// Appends a descriptor and returns its index.
    pub fn push(&mut self, descriptor: ObjectDescriptor) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let index = self.descriptors.len() as u32;
        self.descriptors.push(descriptor);
        index
    }

    #[must_use]
    pub fn get(&self, index: u32) -> Option<&ObjectDescriptor> {
        self.descriptors.get(index as usize)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ObjectDescriptor] {
        &self.descriptors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Everything loaded into the scene so far.
///
/// Loads are all-or-nothing: every fallible step of [`SceneState::load_object`]
/// runs before the state is touched, so a failed load leaves it as it was.
pub struct SceneState<A: Accelerator> {
    objects: Vec<Object<A::Buffer>>,
    instances: Vec<ObjectInstance>,
    descriptors: ObjectDescriptorTable,
    textures: Vec<A::Texture>,
    texture_paths: Vec<PathBuf>,
    /// World space emitters of every loaded object.
    emitters: Vec<Emitter>,
    descriptor_buffer: Option<A::Buffer>,
    emitter_buffer: Option<A::Buffer>,
}

impl<A: Accelerator> Default for SceneState<A> {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            instances: Vec::new(),
            descriptors: ObjectDescriptorTable::default(),
            textures: Vec::new(),
            texture_paths: Vec::new(),
            emitters: Vec::new(),
            descriptor_buffer: None,
            emitter_buffer: None,
        }
    }
}

impl<A: Accelerator> SceneState<A> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every model of `descriptor`, in order, into a fresh scene.
    pub fn load(
        accelerator: &A,
        importer: &impl SceneImporter,
        descriptor: &SceneDescriptor,
    ) -> Result<Self> {
        let mut scene = Self::new();
        for model in &descriptor.models {
            scene.load_object(accelerator, importer, &model.path, model.transform)?;
        }
        Ok(scene)
    }

    /// Imports, flattens and uploads the model at `path`, and places one
    /// instance of it with `transform`.
    ///
    /// Returns the index of the new object, which is the length of the
    /// descriptor table before the call.
    pub fn load_object(
        &mut self,
        accelerator: &A,
        importer: &impl SceneImporter,
        path: &Path,
        transform: Mat4,
    ) -> Result<u32> {
        let start = std::time::Instant::now();

        let scene = importer.import(path)?;
        let flat = load::flatten(&scene, Mat4::IDENTITY, path)?;

        let emitters = emitter::extract_emitters(&flat)
            .iter()
            .map(|emitter| emitter.transformed(transform))
            .collect::<Vec<_>>();
        let degenerate = emitters.iter().filter(|emitter| emitter.area <= 0.0).count();
        if degenerate > 0 {
            tracing::warn!(
                "{} has {} emissive triangles with zero area",
                path.display(),
                degenerate
            );
        }

        let object = Object {
            vertices: accelerator.upload(BufferRole::Vertices, bytemuck::cast_slice(&flat.vertices))?,
            indices: accelerator.upload(BufferRole::Indices, bytemuck::cast_slice(&flat.indices))?,
            materials: accelerator
                .upload(BufferRole::Materials, bytemuck::cast_slice(&flat.materials))?,
            material_indices: accelerator.upload(
                BufferRole::MaterialIndices,
                bytemuck::cast_slice(&flat.material_indices),
            )?,
            vertex_count: u32::try_from(flat.vertices.len())
                .map_err(|_| LoadError::TooManyVertices)?,
            index_count: u32::try_from(flat.indices.len())
                .map_err(|_| LoadError::TooManyVertices)?,
        };
        tracing::trace!("Buffers of {} uploaded", path.display());

        let textures = flat
            .textures
            .iter()
            .map(|texture| accelerator.load_texture(texture))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let texture_offset = self.textures.len() as i32;
        let descriptor = object.descriptor(texture_offset);

        // Both shader tables are replaced as a whole
        let mut descriptors = self.descriptors.as_slice().to_vec();
        descriptors.push(descriptor);
        let descriptor_buffer = accelerator.upload(
            BufferRole::ObjectDescriptors,
            bytemuck::cast_slice(&descriptors),
        )?;
        let mut all_emitters = self.emitters.clone();
        all_emitters.extend_from_slice(&emitters);
        let emitter_buffer =
            accelerator.upload(BufferRole::Emitters, bytemuck::cast_slice(&all_emitters))?;

        let object_index = self.descriptors.push(descriptor);
        self.instances.push(ObjectInstance {
            transform,
            object_index,
        });
        tracing::info!(
            "Loaded {} as object {} in {:?}: {} vertices, {} indices, {} materials, {} textures, {} emitters",
            path.display(),
            object_index,
            start.elapsed(),
            object.vertex_count,
            object.index_count,
            flat.materials.len(),
            textures.len(),
            emitters.len(),
        );
        self.objects.push(object);
        self.textures.extend(textures);
        self.texture_paths.extend(flat.textures);
        self.emitters = all_emitters;
        self.descriptor_buffer = Some(descriptor_buffer);
        self.emitter_buffer = Some(emitter_buffer);

        Ok(object_index)
    }

    #[must_use]
    pub fn objects(&self) -> &[Object<A::Buffer>] {
        &self.objects
    }

    #[must_use]
    pub fn instances(&self) -> &[ObjectInstance] {
        &self.instances
    }

    #[must_use]
    pub const fn descriptors(&self) -> &ObjectDescriptorTable {
        &self.descriptors
    }

    /// Textures of all objects, in the order object texture offsets refer to.
    #[must_use]
    pub fn textures(&self) -> &[A::Texture] {
        &self.textures
    }

    #[must_use]
    pub fn texture_paths(&self) -> &[PathBuf] {
        &self.texture_paths
    }

    #[must_use]
    pub fn emitters(&self) -> &[Emitter] {
        &self.emitters
    }

    #[must_use]
    pub fn total_emitter_area(&self) -> f32 {
        emitter::total_area(&self.emitters)
    }

    /// The uploaded descriptor table, `None` before the first load.
    #[must_use]
    pub const fn descriptor_buffer(&self) -> Option<&A::Buffer> {
        self.descriptor_buffer.as_ref()
    }

    /// The uploaded emitter list, `None` before the first load.
    #[must_use]
    pub const fn emitter_buffer(&self) -> Option<&A::Buffer> {
        self.emitter_buffer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceAddress;

    struct FakeBuffer(u64);

    impl DeviceBuffer for FakeBuffer {
        fn device_address(&self) -> DeviceAddress {
            DeviceAddress::new(self.0)
        }

        fn size(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_object_descriptor() {
        let object = Object {
            vertices: FakeBuffer(0x1000),
            indices: FakeBuffer(0x2000),
            materials: FakeBuffer(0x3000),
            material_indices: FakeBuffer(0x4000),
            vertex_count: 4,
            index_count: 6,
        };
        let descriptor = object.descriptor(3);
        assert_eq!(descriptor.texture_offset, 3);
        assert_eq!(descriptor.vertex_address.get(), 0x1000);
        assert_eq!(descriptor.index_address.get(), 0x2000);
        assert_eq!(descriptor.material_address.get(), 0x3000);
        assert_eq!(descriptor.material_index_address.get(), 0x4000);
    }

    #[test]
    fn test_descriptor_table_indices() {
        let mut table = ObjectDescriptorTable::default();
        assert!(table.is_empty());
        let first = ObjectDescriptor {
            texture_offset: 1,
            ..Default::default()
        };
        assert_eq!(table.push(first), 0);
        assert_eq!(table.push(ObjectDescriptor::default()), 1);
        assert_eq!(table.get(0), Some(&first));
        assert_eq!(table.len(), 2);
        assert!(table.get(2).is_none());
    }
}
