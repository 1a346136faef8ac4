//! Resource Registry
//!
//! Textures, vertex buffers and shaders live in generation-checked arenas.
//! A handle is an index plus the generation of the slot it was issued
//! from, so a handle that outlives its object is detected instead of
//! aliasing whatever reuses the slot.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use tracing::{debug, error, warn};

use super::draw::AttributeLayout;
use super::shader::Shader;
use super::types::{PixelFormat, Primitive};
use super::GraphicsContext;
use crate::error::{ErrorChannel, ErrorSource, RESULT_INVALID_HANDLE, RESULT_OUT_OF_MEMORY};
use crate::platform::{DisplayTransfer, DmaBlock, GpuEvent, Placement, Platform, TransferFlags};

/// DMA alignment for vertex, index and texture blocks.
pub const BLOCK_ALIGN: usize = 0x80;

// =============================================================================
// Handles and arenas
// =============================================================================

/// Opaque handle to an object of kind `T`. The default value is the null
/// handle, which every operation accepts as a silent no-op.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _kind: PhantomData<fn() -> T>,
}

pub type TextureHandle = Handle<Texture>;
pub type VboHandle = Handle<Vbo>;
pub type ShaderHandle = Handle<Shader>;

impl<T> Handle<T> {
    pub const NULL: Self = Self {
        index: 0,
        generation: 0,
        _kind: PhantomData,
    };

    pub fn is_null(&self) -> bool {
        self.generation == 0
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Handle(null)")
        } else {
            write!(f, "Handle({}v{})", self.index, self.generation)
        }
    }
}

/// A handle whose object has been freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleHandle;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generation-checked object pool.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    value: Some(value),
                });
                (self.slots.len() - 1) as u32
            }
        };

        Handle {
            index,
            generation: self.slots[index as usize].generation,
            _kind: PhantomData,
        }
    }

    /// `Ok(None)` for the null handle, `Err` for a stale one.
    pub fn get(&self, handle: Handle<T>) -> Result<Option<&T>, StaleHandle> {
        if handle.is_null() {
            return Ok(None);
        }
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => {
                slot.value.as_ref().map(Some).ok_or(StaleHandle)
            }
            _ => Err(StaleHandle),
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<Option<&mut T>, StaleHandle> {
        if handle.is_null() {
            return Ok(None);
        }
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => {
                slot.value.as_mut().map(Some).ok_or(StaleHandle)
            }
            _ => Err(StaleHandle),
        }
    }

    /// Remove an object. Its slot's generation moves on, so every copy of
    /// the handle becomes stale.
    pub fn remove(&mut self, handle: Handle<T>) -> Result<Option<T>, StaleHandle> {
        if handle.is_null() {
            return Ok(None);
        }
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
            .ok_or(StaleHandle)?;

        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(handle.index);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every live object, invalidating all handles.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1).max(1);
                self.free.push(index as u32);
                values.push(value);
            }
        }
        values
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a handle for an operation. Null resolves to `None` silently; a
/// stale handle resolves to `None` and is reported.
pub(crate) fn live<'a, T>(
    arena: &'a mut Arena<T>,
    errors: &mut ErrorChannel,
    handle: Handle<T>,
    kind: &str,
) -> Option<&'a mut T> {
    match arena.get_mut(handle) {
        Ok(value) => value,
        Err(StaleHandle) => {
            warn!("Ignoring stale {} handle {:?}", kind, handle);
            errors.raise(ErrorSource::InvalidHandle, RESULT_INVALID_HANDLE);
            None
        }
    }
}

// =============================================================================
// DMA block sizing
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sizing {
    Reused,
    Reallocated,
    Failed,
}

/// Make `slot` hold a block of at least `size` bytes in `placement`. The
/// old block is released only after its replacement exists; on failure it
/// stays in place.
pub(crate) fn ensure_block<P: Platform>(
    platform: &mut P,
    slot: &mut Option<DmaBlock>,
    size: usize,
    placement: Placement,
    what: &str,
) -> Sizing {
    if let Some(block) = slot {
        if block.size() >= size && block.placement() == placement {
            return Sizing::Reused;
        }
    }

    let Some(block) = platform.alloc(placement, size, BLOCK_ALIGN) else {
        error!(
            "Failed to allocate {} bytes of {:?} memory for {}",
            size, placement, what
        );
        return Sizing::Failed;
    };

    debug!(
        "Allocated {} block at 0x{:08X} ({} bytes, {:?})",
        what,
        block.phys(),
        size,
        placement
    );

    if let Some(old) = slot.replace(block) {
        platform.free(old);
    }
    Sizing::Reallocated
}

// =============================================================================
// Textures
// =============================================================================

#[derive(Debug, Default)]
pub struct Texture {
    pub(crate) block: Option<DmaBlock>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) format: PixelFormat,
    pub(crate) params: u32,
    pub(crate) placement: Placement,
    pub(crate) border_color: u32,
}

impl Texture {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn params(&self) -> u32 {
        self.params
    }

    /// Physical address of the pixel block, if allocated.
    pub fn phys(&self) -> Option<u32> {
        self.block.as_ref().map(DmaBlock::phys)
    }

    fn matches(&self, width: u32, height: u32, format: PixelFormat, params: u32, place: Placement) -> bool {
        self.block.is_some()
            && self.width == width
            && self.height == height
            && self.format == format
            && self.params == params
            && self.placement == place
    }
}

// =============================================================================
// Vertex buffers
// =============================================================================

#[derive(Debug, Default)]
pub struct Vbo {
    pub(crate) data: Option<DmaBlock>,
    pub(crate) num_vertices: u32,
    pub(crate) primitive: Primitive,
    pub(crate) indices: Option<DmaBlock>,
    pub(crate) indices_size: usize,
    pub(crate) layout: AttributeLayout,
}

impl Vbo {
    pub fn num_vertices(&self) -> u32 {
        self.num_vertices
    }

    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    pub fn layout(&self) -> &AttributeLayout {
        &self.layout
    }

    pub fn data_phys(&self) -> Option<u32> {
        self.data.as_ref().map(DmaBlock::phys)
    }

    pub fn indices_phys(&self) -> Option<u32> {
        self.indices.as_ref().map(DmaBlock::phys)
    }

    /// Bytes needed for the current vertex count and layout.
    pub fn data_size(&self) -> usize {
        self.num_vertices as usize * self.layout.bytes_per_vertex() as usize
    }
}

// =============================================================================
// Context operations
// =============================================================================

impl<P: Platform> GraphicsContext<P> {
    pub fn create_texture(&mut self) -> TextureHandle {
        self.textures.insert(Texture::default())
    }

    /// Release a texture. Units it is bound to are re-emitted as empty.
    pub fn free_texture(&mut self, texture: TextureHandle) {
        match self.textures.remove(texture) {
            Ok(Some(tex)) => {
                self.state.mark_texture_dirty(texture);
                if let Some(block) = tex.block {
                    self.platform.free(block);
                }
            }
            Ok(None) => {}
            Err(StaleHandle) => {
                warn!("Ignoring stale texture handle {:?} on free", texture);
                self.errors
                    .raise(ErrorSource::InvalidHandle, RESULT_INVALID_HANDLE);
            }
        }
    }

    pub fn texture(&mut self, texture: TextureHandle) -> Option<&Texture> {
        live(&mut self.textures, &mut self.errors, texture, "texture").map(|t| &*t)
    }

    /// Tiled pixel contents of a texture.
    pub fn texture_data(&mut self, texture: TextureHandle) -> Option<&[u8]> {
        let tex = live(&mut self.textures, &mut self.errors, texture, "texture")?;
        let block = tex.block.as_ref()?;
        Some(self.platform.bytes(block))
    }

    /// Size a texture's storage. Identical settings on an allocated texture
    /// do nothing; otherwise the block grows if needed and every unit the
    /// texture is bound to is re-emitted.
    pub fn set_texture_info(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        format: PixelFormat,
        params: u32,
        place: Placement,
    ) {
        let Some(tex) = live(&mut self.textures, &mut self.errors, texture, "texture") else {
            return;
        };
        if tex.matches(width, height, format, params, place) {
            return;
        }

        let size = format.image_size(width, height);
        if size != 0
            && ensure_block(&mut self.platform, &mut tex.block, size, place, "texture") == Sizing::Failed
        {
            self.errors
                .raise(ErrorSource::AllocateBuffer, RESULT_OUT_OF_MEMORY);
            return;
        }

        tex.width = width;
        tex.height = height;
        tex.format = format;
        tex.params = params;
        tex.placement = place;

        self.state.mark_texture_dirty(texture);
    }

    /// Size a texture and upload linear pixels, swizzled into tile order by
    /// the transfer engine.
    #[allow(clippy::too_many_arguments)]
    pub fn set_texture_data(
        &mut self,
        texture: TextureHandle,
        data: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        params: u32,
        place: Placement,
    ) {
        self.set_texture_info(texture, width, height, format, params, place);

        let Ok(Some(tex)) = self.textures.get(texture) else {
            return;
        };
        if tex.width != width || tex.height != height || tex.format != format {
            return;
        }
        let Some(dst) = tex.phys() else {
            return;
        };

        let size = format.image_size(width, height);
        if size == 0 {
            return;
        }
        if data.len() < size {
            warn!(
                "Texture upload of {} bytes is short of {}x{} {:?} ({} bytes)",
                data.len(),
                width,
                height,
                format,
                size
            );
            return;
        }

        let Some(staging) = self.platform.alloc(Placement::Linear, size, BLOCK_ALIGN) else {
            error!("Failed to allocate {} byte texture staging block", size);
            self.errors
                .raise(ErrorSource::AllocateBuffer, RESULT_OUT_OF_MEMORY);
            return;
        };

        self.platform.bytes_mut(&staging)[..size].copy_from_slice(&data[..size]);
        self.platform.flush_data_cache(&staging);
        self.platform.display_transfer(DisplayTransfer {
            src: staging.phys(),
            src_width: width,
            src_height: height,
            dst,
            dst_width: width,
            dst_height: height,
            in_format: format,
            out_format: format,
            flags: TransferFlags::OUT_TILED,
        });
        self.safe_wait(GpuEvent::Ppf);
        self.platform.free(staging);

        debug!("Uploaded {}x{} {:?} texture to 0x{:08X}", width, height, format, dst);
    }

    pub fn set_texture_border_color(&mut self, texture: TextureHandle, red: u8, green: u8, blue: u8, alpha: u8) {
        let Some(tex) = live(&mut self.textures, &mut self.errors, texture, "texture") else {
            return;
        };
        tex.border_color = crate::protocol::pack_rgba(red, green, blue, alpha);
        self.state.mark_texture_dirty(texture);
    }

    pub fn create_vbo(&mut self) -> VboHandle {
        self.vbos.insert(Vbo::default())
    }

    pub fn free_vbo(&mut self, vbo: VboHandle) {
        match self.vbos.remove(vbo) {
            Ok(Some(v)) => {
                if let Some(block) = v.data {
                    self.platform.free(block);
                }
                if let Some(block) = v.indices {
                    self.platform.free(block);
                }
            }
            Ok(None) => {}
            Err(StaleHandle) => {
                warn!("Ignoring stale vbo handle {:?} on free", vbo);
                self.errors
                    .raise(ErrorSource::InvalidHandle, RESULT_INVALID_HANDLE);
            }
        }
    }

    pub fn vbo(&mut self, vbo: VboHandle) -> Option<&Vbo> {
        live(&mut self.vbos, &mut self.errors, vbo, "vbo").map(|v| &*v)
    }

    /// Describe the interleaved vertex layout. `attributes` packs one
    /// nibble per slot (see [`super::types::vbo_attribute`]).
    pub fn set_vbo_attributes(&mut self, vbo: VboHandle, attributes: u64, count: u8) {
        let Some(v) = live(&mut self.vbos, &mut self.errors, vbo, "vbo") else {
            return;
        };
        v.layout = AttributeLayout::new(attributes, count);
    }

    /// Size the vertex block for `num_vertices` without copying data. The
    /// block only ever grows.
    pub fn set_vbo_data_info(&mut self, vbo: VboHandle, num_vertices: u32, primitive: Primitive) {
        let Some(v) = live(&mut self.vbos, &mut self.errors, vbo, "vbo") else {
            return;
        };

        let size = num_vertices as usize * v.layout.bytes_per_vertex() as usize;
        if size != 0
            && ensure_block(&mut self.platform, &mut v.data, size, Placement::Linear, "vertex")
                == Sizing::Failed
        {
            self.errors
                .raise(ErrorSource::AllocateBuffer, RESULT_OUT_OF_MEMORY);
            return;
        }

        v.num_vertices = num_vertices;
        v.primitive = primitive;
    }

    pub fn set_vbo_data(&mut self, vbo: VboHandle, data: &[u8], num_vertices: u32, primitive: Primitive) {
        self.set_vbo_data_info(vbo, num_vertices, primitive);

        let Ok(Some(v)) = self.vbos.get(vbo) else {
            return;
        };
        if v.num_vertices != num_vertices {
            return;
        }
        let Some(block) = v.data.as_ref() else {
            return;
        };

        let size = v.data_size().min(data.len());
        if size < v.data_size() {
            warn!(
                "Vertex data of {} bytes is short of {} vertices ({} bytes)",
                data.len(),
                num_vertices,
                v.data_size()
            );
        }
        self.platform.bytes_mut(block)[..size].copy_from_slice(&data[..size]);
    }

    pub fn vbo_data(&mut self, vbo: VboHandle) -> Option<&[u8]> {
        let v = live(&mut self.vbos, &mut self.errors, vbo, "vbo")?;
        let block = v.data.as_ref()?;
        Some(self.platform.bytes(block))
    }

    /// Writable view of the vertex block for in-place updates.
    pub fn vbo_data_mut(&mut self, vbo: VboHandle) -> Option<&mut [u8]> {
        let v = live(&mut self.vbos, &mut self.errors, vbo, "vbo")?;
        let block = v.data.as_ref()?;
        Some(self.platform.bytes_mut(block))
    }

    /// Size the index block. Zero releases it, switching draws back to
    /// non-indexed.
    pub fn set_vbo_indices_info(&mut self, vbo: VboHandle, size: usize) {
        let Some(v) = live(&mut self.vbos, &mut self.errors, vbo, "vbo") else {
            return;
        };

        if size == 0 {
            if let Some(block) = v.indices.take() {
                self.platform.free(block);
            }
            v.indices_size = 0;
            return;
        }

        if ensure_block(&mut self.platform, &mut v.indices, size, Placement::Linear, "index")
            == Sizing::Failed
        {
            self.errors
                .raise(ErrorSource::AllocateBuffer, RESULT_OUT_OF_MEMORY);
            return;
        }
        v.indices_size = size;
    }

    /// Upload 16-bit indices. An empty slice removes the index block.
    pub fn set_vbo_indices(&mut self, vbo: VboHandle, data: &[u8]) {
        self.set_vbo_indices_info(vbo, data.len());
        if data.is_empty() {
            return;
        }

        let Ok(Some(v)) = self.vbos.get(vbo) else {
            return;
        };
        if v.indices_size != data.len() {
            return;
        }
        if let Some(block) = v.indices.as_ref() {
            self.platform.bytes_mut(block)[..data.len()].copy_from_slice(data);
        }
    }

    pub fn vbo_indices(&mut self, vbo: VboHandle) -> Option<&[u8]> {
        let v = live(&mut self.vbos, &mut self.errors, vbo, "vbo")?;
        let block = v.indices.as_ref()?;
        self.platform.bytes(block).get(..v.indices_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::description;
    use crate::gpu::types::{vbo_attribute, AttributeType, TexUnit};
    use crate::gpu::test_context;

    #[test]
    fn test_arena_null_and_stale() {
        let mut arena: Arena<u32> = Arena::new();
        assert_eq!(arena.get(Handle::NULL), Ok(None));

        let handle = arena.insert(7);
        assert_eq!(arena.get(handle), Ok(Some(&7)));
        assert_eq!(arena.remove(handle), Ok(Some(7)));
        assert_eq!(arena.get(handle), Err(StaleHandle));

        // The slot is reused under a new generation.
        let reused = arena.insert(9);
        assert_ne!(reused, handle);
        assert_eq!(arena.get(handle), Err(StaleHandle));
        assert_eq!(arena.get(reused), Ok(Some(&9)));
    }

    #[test]
    fn test_arena_drain() {
        let mut arena: Arena<&str> = Arena::new();
        let a = arena.insert("a");
        arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.drain().len(), 2);
        assert!(arena.is_empty());
        assert_eq!(arena.get(a), Err(StaleHandle));
    }

    #[test]
    fn test_texture_reinfo_is_noop() {
        let mut ctx = test_context();
        let tex = ctx.create_texture();
        ctx.set_texture_info(tex, 64, 64, PixelFormat::Rgba8, 0, Placement::Linear);
        let before = ctx.texture(tex).and_then(Texture::phys);
        assert!(before.is_some());

        ctx.set_texture_info(tex, 64, 64, PixelFormat::Rgba8, 0, Placement::Linear);
        assert_eq!(ctx.texture(tex).and_then(Texture::phys), before);
    }

    #[test]
    fn test_texture_grows_and_moves_placement() {
        let mut ctx = test_context();
        let tex = ctx.create_texture();
        ctx.set_texture_info(tex, 32, 32, PixelFormat::Rgba8, 0, Placement::Linear);
        let small = ctx.texture(tex).and_then(Texture::phys);

        // Smaller image reuses the block.
        ctx.set_texture_info(tex, 16, 16, PixelFormat::Rgba8, 0, Placement::Linear);
        assert_eq!(ctx.texture(tex).and_then(Texture::phys), small);

        ctx.set_texture_info(tex, 64, 64, PixelFormat::Rgba8, 0, Placement::Linear);
        let grown = ctx.texture(tex).and_then(Texture::phys);
        assert_ne!(grown, small);

        ctx.set_texture_info(tex, 64, 64, PixelFormat::Rgba8, 0, Placement::Vram);
        let vram = ctx.texture(tex).and_then(Texture::phys);
        assert_ne!(vram, grown);
        assert!(vram.is_some_and(|phys| phys < 0x2000_0000));
    }

    #[test]
    fn test_texture_info_redirties_bound_unit() {
        let mut ctx = test_context();
        let tex = ctx.create_texture();
        ctx.bind_texture(TexUnit::Unit2, tex);
        ctx.update_state();
        assert_eq!(ctx.state().dirty_textures, 0);

        ctx.set_texture_info(tex, 8, 8, PixelFormat::Rgba8, 0, Placement::Linear);
        assert_eq!(ctx.state().dirty_textures, 1 << 2);
    }

    #[test]
    fn test_texture_upload_is_tiled() {
        let mut ctx = test_context();
        let tex = ctx.create_texture();
        let pixels: Vec<u8> = (0..16 * 16 * 4).map(|i| (i / 4) as u8).collect();
        ctx.set_texture_data(tex, &pixels, 16, 16, PixelFormat::Rgba8, 0, Placement::Linear);

        let data = ctx.texture_data(tex).map(<[u8]>::to_vec).unwrap_or_default();
        // Pixel (0, 1) lands at tile index 2.
        assert_eq!(data[2 * 4], 16);
        // Pixel (8, 0) starts the second tile.
        assert_eq!(data[64 * 4], 8);
    }

    #[test]
    fn test_vbo_grows_but_never_shrinks() {
        let mut ctx = test_context();
        let vbo = ctx.create_vbo();
        ctx.set_vbo_attributes(vbo, vbo_attribute(0, 3, AttributeType::Float), 1);

        ctx.set_vbo_data_info(vbo, 100, Primitive::Triangles);
        let first = ctx.vbo(vbo).and_then(Vbo::data_phys);
        assert!(first.is_some());

        ctx.set_vbo_data_info(vbo, 30, Primitive::Triangles);
        assert_eq!(ctx.vbo(vbo).and_then(Vbo::data_phys), first);
        assert_eq!(ctx.vbo(vbo).map(Vbo::num_vertices), Some(30));

        ctx.set_vbo_data_info(vbo, 101, Primitive::Triangles);
        assert_ne!(ctx.vbo(vbo).and_then(Vbo::data_phys), first);
    }

    #[test]
    fn test_vbo_data_copy() {
        let mut ctx = test_context();
        let vbo = ctx.create_vbo();
        ctx.set_vbo_attributes(vbo, vbo_attribute(0, 2, AttributeType::Short), 1);
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        ctx.set_vbo_data(vbo, &data, 2, Primitive::TriangleStrip);
        assert_eq!(ctx.vbo_data(vbo).map(|d| d[..8].to_vec()), Some(data.to_vec()));

        if let Some(bytes) = ctx.vbo_data_mut(vbo) {
            bytes[0] = 0xAA;
        }
        assert_eq!(ctx.vbo_data(vbo).map(|d| d[0]), Some(0xAA));
    }

    #[test]
    fn test_vbo_indices_lifecycle() {
        let mut ctx = test_context();
        let vbo = ctx.create_vbo();
        ctx.set_vbo_indices(vbo, &[0, 0, 1, 0, 2, 0]);
        assert_eq!(ctx.vbo_indices(vbo), Some(&[0u8, 0, 1, 0, 2, 0][..]));

        ctx.set_vbo_indices(vbo, &[]);
        assert_eq!(ctx.vbo_indices(vbo), None);
        assert_eq!(ctx.vbo(vbo).and_then(Vbo::indices_phys), None);
    }

    #[test]
    fn test_null_handles_are_silent() {
        let mut ctx = test_context();
        ctx.set_texture_info(TextureHandle::NULL, 8, 8, PixelFormat::Rgba8, 0, Placement::Linear);
        ctx.set_vbo_data(VboHandle::NULL, &[0; 12], 1, Primitive::Triangles);
        ctx.free_texture(TextureHandle::NULL);
        ctx.free_vbo(VboHandle::NULL);
        assert!(ctx.texture_data(TextureHandle::NULL).is_none());
        assert!(!ctx.errors().has_error());
    }

    #[test]
    fn test_stale_handle_is_reported() {
        let mut ctx = test_context();
        let tex = ctx.create_texture();
        ctx.free_texture(tex);
        ctx.set_texture_info(tex, 8, 8, PixelFormat::Rgba8, 0, Placement::Linear);

        let err = ctx.errors_mut().get_error();
        assert_eq!(err.source, ErrorSource::InvalidHandle);
        assert_eq!(err.description, description::INVALID_HANDLE);
    }

    #[test]
    fn test_allocation_failure_keeps_old_block() {
        let mut ctx = test_context();
        let vbo = ctx.create_vbo();
        ctx.set_vbo_attributes(vbo, vbo_attribute(0, 4, AttributeType::Float), 1);
        ctx.set_vbo_data_info(vbo, 16, Primitive::Triangles);
        let before = ctx.vbo(vbo).and_then(Vbo::data_phys);

        // Far beyond the linear heap budget.
        ctx.set_vbo_data_info(vbo, 64 * 1024 * 1024, Primitive::Triangles);
        assert_eq!(ctx.vbo(vbo).and_then(Vbo::data_phys), before);
        assert_eq!(ctx.vbo(vbo).map(Vbo::num_vertices), Some(16));

        let err = ctx.errors_mut().get_error();
        assert_eq!(err.source, ErrorSource::AllocateBuffer);
        assert_eq!(err.description, description::OUT_OF_MEMORY);
    }

    #[test]
    fn test_failed_texture_grow_skips_upload() {
        let mut ctx = test_context();
        let tex = ctx.create_texture();
        let small = vec![0x11; 8 * 8 * 4];
        ctx.set_texture_data(tex, &small, 8, 8, PixelFormat::Rgba8, 0, Placement::Vram);
        let before = ctx.texture(tex).and_then(Texture::phys);
        let transfers = ctx.platform().transfers();

        // 16 MiB does not fit in VRAM.
        let large = vec![0x22; 2048 * 2048 * 4];
        ctx.set_texture_data(tex, &large, 2048, 2048, PixelFormat::Rgba8, 0, Placement::Vram);

        assert_eq!(ctx.platform().transfers(), transfers);
        assert_eq!(ctx.texture(tex).and_then(Texture::phys), before);
        assert_eq!(ctx.texture(tex).map(|t| (t.width, t.height)), Some((8, 8)));
        let data = ctx.texture_data(tex).map(<[u8]>::to_vec).unwrap_or_default();
        assert_eq!(data.len(), 8 * 8 * 4);
        assert!(data.iter().all(|&b| b == 0x11));

        let err = ctx.errors_mut().get_error();
        assert_eq!(err.source, ErrorSource::AllocateBuffer);
        assert_eq!(err.description, description::OUT_OF_MEMORY);
    }

    #[test]
    fn test_empty_texture_info_allocates_nothing() {
        let mut ctx = test_context();
        let tex = ctx.create_texture();
        ctx.set_texture_info(tex, 0, 16, PixelFormat::Rgba8, 0, Placement::Linear);

        assert!(!ctx.errors().has_error());
        assert_eq!(ctx.texture(tex).and_then(Texture::phys), None);
        assert_eq!(ctx.texture(tex).map(|t| (t.width, t.height)), Some((0, 16)));

        ctx.set_texture_data(tex, &[], 0, 16, PixelFormat::Rgba8, 0, Placement::Linear);
        assert!(!ctx.errors().has_error());
    }
}
