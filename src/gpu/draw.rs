//! Vertex layout and draw submission.

use tracing::trace;

use super::resources::{live, VboHandle};
use super::types::{AttributeType, Primitive};
use super::GraphicsContext;
use crate::command_buffer::CommandBuffer;
use crate::platform::Platform;
use crate::protocol::{
    ATTRIBBUFFERS_WORDS, REG_ATTRIBBUFFERS_LOC, REG_DRAWARRAYS, REG_DRAWELEMENTS,
    REG_GEOSTAGE_CONFIG2, REG_INDEXBUFFER_CONFIG, REG_NUMVERTICES, REG_PRIMITIVE_CONFIG,
    REG_RESTART_PRIMITIVE, REG_START_DRAW_FUNC0, REG_VERTEX_OFFSET, REG_VSH_NUM_ATTR,
    REG_VTX_FUNC, VSH_REGS,
};

/// Attribute slots available to one vertex buffer.
pub const MAX_ATTRIBUTES: u8 = 12;

/// Index buffer config bit selecting 16-bit indices.
const INDEX_16BIT: u32 = 0x8000_0000;

/// Interleaved vertex layout: one nibble per attribute slot, each holding
/// the component count minus one in bits 2-3 and the element type in bits
/// 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributeLayout {
    formats: u64,
    count: u8,
}

impl AttributeLayout {
    pub fn new(formats: u64, count: u8) -> Self {
        let count = count.min(MAX_ATTRIBUTES);
        let used = if count == 0 { 0 } else { u64::MAX >> (64 - 4 * count as u32) };
        Self {
            formats: formats & used,
            count,
        }
    }

    pub fn formats(&self) -> u64 {
        self.formats
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    /// Component count and element type of slot `index`.
    pub fn attribute(&self, index: u8) -> Option<(u32, AttributeType)> {
        if index >= self.count {
            return None;
        }
        let nibble = (self.formats >> (index as u32 * 4)) as u32 & 0xF;
        Some(((nibble >> 2) + 1, AttributeType::from_bits(nibble)))
    }

    pub fn bytes_per_vertex(&self) -> u32 {
        (0..self.count)
            .filter_map(|i| self.attribute(i))
            .map(|(components, ty)| components * ty.size_bytes())
            .sum()
    }

    /// Slots past `count` are fed a fixed value instead of buffer data.
    pub fn fixed_mask(&self) -> u32 {
        0xFFF & !((1u32 << self.count) - 1)
    }

    /// Identity mapping of buffer component `i` to shader input `i`.
    pub fn permutation(&self) -> u64 {
        (0..self.count as u64).fold(0, |perm, i| perm | (i << (4 * i)))
    }
}

/// Point the single attribute loader at `base` and describe the layout.
pub(crate) fn emit_attribute_buffers(
    cmd: &mut CommandBuffer,
    layout: &AttributeLayout,
    base: u32,
    buffer_offset: u32,
) {
    let count = layout.count() as u32;
    let formats = layout.formats();
    let permutation = layout.permutation();

    let mut words = [0u32; ATTRIBBUFFERS_WORDS];
    words[0] = base >> 3;
    words[1] = formats as u32;
    words[2] = ((count - 1) << 28) | ((layout.fixed_mask() & 0xFFF) << 16) | ((formats >> 32) as u32 & 0xFFFF);
    words[3] = buffer_offset;
    words[4] = permutation as u32;
    words[5] = (count << 28) | ((layout.bytes_per_vertex() & 0xFFF) << 16) | ((permutation >> 32) as u32 & 0xFFFF);
    cmd.write_incremental(REG_ATTRIBBUFFERS_LOC, &words);

    cmd.write_masked(VSH_REGS.input_buffer_config, 0xB, 0xA000_0000 | (count - 1));
    cmd.write(REG_VSH_NUM_ATTR, count - 1);
    cmd.write_incremental(
        VSH_REGS.attributes_permutation_low,
        &[permutation as u32, (permutation >> 32) as u32 & 0xFFFF],
    );
}

/// Kick a draw of `count` vertices. `index_offset` is the index array's
/// offset from the attribute base for indexed draws.
pub(crate) fn emit_draw(cmd: &mut CommandBuffer, primitive: Primitive, count: u32, index_offset: Option<u32>) {
    cmd.write_masked(REG_PRIMITIVE_CONFIG, 0x2, primitive as u32);
    cmd.write_masked(REG_RESTART_PRIMITIVE, 0x2, 0x1);
    cmd.write(REG_INDEXBUFFER_CONFIG, INDEX_16BIT | index_offset.unwrap_or(0));
    cmd.write(REG_NUMVERTICES, count);
    cmd.write(REG_VERTEX_OFFSET, 0);

    cmd.write_masked(REG_GEOSTAGE_CONFIG2, 0x1, 0x1);
    cmd.write_masked(REG_START_DRAW_FUNC0, 0x1, 0x0);
    let kick = if index_offset.is_some() { REG_DRAWELEMENTS } else { REG_DRAWARRAYS };
    cmd.write(kick, 1);
    cmd.write_masked(REG_START_DRAW_FUNC0, 0x1, 0x1);
    cmd.write_masked(REG_GEOSTAGE_CONFIG2, 0x1, 0x0);
    cmd.write(REG_VTX_FUNC, 1);
}

impl<P: Platform> GraphicsContext<P> {
    /// Bring the hardware up to date and draw `vbo`. Buffers without vertex
    /// data, vertices or attributes draw nothing.
    pub fn draw_vbo(&mut self, vbo: VboHandle) {
        let Some(v) = live(&mut self.vbos, &mut self.errors, vbo, "vbo") else {
            return;
        };
        let Some(data_phys) = v.data_phys() else {
            return;
        };
        if v.num_vertices == 0 || v.layout.count() == 0 {
            return;
        }

        let layout = v.layout;
        let primitive = v.primitive;
        let num_vertices = v.num_vertices;
        let indices_phys = v.indices_phys();

        self.update_state();

        let base = indices_phys.map_or(data_phys, |i| i.min(data_phys));
        trace!(
            "Draw {} vertices ({:?}) from 0x{:08X}, indexed: {}",
            num_vertices,
            primitive,
            data_phys,
            indices_phys.is_some()
        );

        emit_attribute_buffers(&mut self.cmd, &layout, base, data_phys - base);
        emit_draw(&mut self.cmd, primitive, num_vertices, indices_phys.map(|i| i - base));
    }
}
