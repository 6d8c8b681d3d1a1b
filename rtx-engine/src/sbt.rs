//! The shader binding table.
//!
//! The table holds one region per shader group kind, in the order raygen, miss,
//! hit, callable. Handles inside a region are padded to the device's handle
//! alignment and every region starts on, and is sized to, the base alignment.

use crate::{
    device::{Accelerator, BufferRole, DeviceAddress, DeviceBuffer, RayTracingProperties},
    error::DeviceError,
};

/// Rounds `value` up to the next multiple of `alignment`, a power of two.
#[must_use]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// One region of the table, relative to its start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SbtRegion {
    pub offset: u64,
    pub stride: u64,
    pub size: u64,
}

/// Byte layout of a shader binding table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderBindingTableLayout {
    pub handle_size: u32,
    pub miss_count: u32,
    pub hit_count: u32,
    pub raygen: SbtRegion,
    pub miss: SbtRegion,
    pub hit: SbtRegion,
    /// Always empty.
    pub callable: SbtRegion,
}

impl ShaderBindingTableLayout {
    /// Computes the layout for one raygen handle, `miss_count` miss handles and
    /// `hit_count` hit group handles.
    #[must_use]
    pub fn new(properties: RayTracingProperties, miss_count: u32, hit_count: u32) -> Self {
        let handle_alignment = u64::from(properties.handle_alignment.max(1));
        let base_alignment = u64::from(properties.base_alignment.max(1));
        let handle_stride = align_up(u64::from(properties.handle_size), handle_alignment);

        // The raygen region's size must equal its stride
        let raygen_size = align_up(handle_stride, base_alignment);
        let raygen = SbtRegion {
            offset: 0,
            stride: raygen_size,
            size: raygen_size,
        };
        let miss = SbtRegion {
            offset: raygen.size,
            stride: handle_stride,
            size: align_up(u64::from(miss_count) * handle_stride, base_alignment),
        };
        let hit = SbtRegion {
            offset: raygen.size + miss.size,
            stride: handle_stride,
            size: align_up(u64::from(hit_count) * handle_stride, base_alignment),
        };

        let layout = Self {
            handle_size: properties.handle_size,
            miss_count,
            hit_count,
            raygen,
            miss,
            hit,
            callable: SbtRegion::default(),
        };

        tracing::debug!(
            "SBT layout: handle size {}, handle alignment {}, base alignment {}, {} miss, {} hit",
            properties.handle_size,
            handle_alignment,
            base_alignment,
            miss_count,
            hit_count
        );
        for (name, region) in [("raygen", raygen), ("miss", miss), ("hit", hit)] {
            tracing::debug!(
                "SBT {:>6}: offset {:>5} stride:size {}:{}",
                name,
                region.offset,
                region.stride,
                region.size
            );
        }

        layout
    }

    /// Size in bytes of the whole table.
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.raygen.size + self.miss.size + self.hit.size + self.callable.size
    }

    /// Number of shader group handles the table holds.
    #[must_use]
    pub const fn handle_count(&self) -> u32 {
        1 + self.miss_count + self.hit_count
    }

    /// Writes the handles into a zeroed table image.
    ///
    /// `handles` holds the handles of every group back to back, in pipeline
    /// group order: raygen, then misses, then hits.
    pub fn populate(&self, handles: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let handle_size = self.handle_size as usize;
        let expected = self.handle_count() as usize * handle_size;
        if handles.len() < expected {
            return Err(DeviceError::ShaderGroupHandles {
                expected,
                actual: handles.len(),
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let mut table = vec![0; self.total_size() as usize];
        let mut handles = handles.chunks_exact(handle_size);
        for (region, count) in [
            (self.raygen, 1),
            (self.miss, self.miss_count),
            (self.hit, self.hit_count),
        ] {
            for i in 0..u64::from(count) {
                #[allow(clippy::cast_possible_truncation)]
                let offset = (region.offset + i * region.stride) as usize;
                if let Some(handle) = handles.next() {
                    table[offset..offset + handle_size].copy_from_slice(handle);
                }
            }
        }

        Ok(table)
    }

    /// The regions of a table stored at `base`.
    #[must_use]
    pub fn regions(&self, base: DeviceAddress) -> ShaderBindingTableRegions {
        let region = |region: SbtRegion| StridedRegion {
            device_address: base.offset(region.offset),
            stride: region.stride,
            size: region.size,
        };
        ShaderBindingTableRegions {
            raygen: region(self.raygen),
            miss: region(self.miss),
            hit: region(self.hit),
            callable: StridedRegion::default(),
        }
    }
}

/// A table region as handed to the trace rays command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StridedRegion {
    pub device_address: DeviceAddress,
    pub stride: u64,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderBindingTableRegions {
    pub raygen: StridedRegion,
    pub miss: StridedRegion,
    pub hit: StridedRegion,
    pub callable: StridedRegion,
}

/// A populated table resident on the device.
pub struct ShaderBindingTable<B> {
    buffer: B,
    layout: ShaderBindingTableLayout,
    regions: ShaderBindingTableRegions,
}

impl<B: DeviceBuffer> ShaderBindingTable<B> {
    /// Populates the table from the pipeline's group handles and uploads it.
    pub fn new<A>(
        accelerator: &A,
        layout: ShaderBindingTableLayout,
        handles: &[u8],
    ) -> Result<Self, DeviceError>
    where
        A: Accelerator<Buffer = B>,
    {
        let table = layout.populate(handles)?;
        let buffer = accelerator.upload(BufferRole::ShaderBindingTable, &table)?;
        let regions = layout.regions(buffer.device_address());

        tracing::debug!("Shader binding table created ({} bytes)", table.len());

        Ok(Self {
            buffer,
            layout,
            regions,
        })
    }

    #[must_use]
    pub const fn regions(&self) -> &ShaderBindingTableRegions {
        &self.regions
    }

    #[must_use]
    pub const fn layout(&self) -> &ShaderBindingTableLayout {
        &self.layout
    }

    #[must_use]
    pub const fn buffer(&self) -> &B {
        &self.buffer
    }
}
