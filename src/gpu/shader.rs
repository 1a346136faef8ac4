//! Shader binaries and per-shader uniform storage.
//!
//! A shader binary (DVLB) holds one shared program blob (DVLP) and one or
//! more entry descriptors (DVLE). The first entry drives the vertex unit,
//! an optional second entry drives the geometry unit.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use super::resources::{live, ShaderHandle};
use super::state::DirtyFlags;
use super::types::ShaderStage;
use super::GraphicsContext;
use crate::command_buffer::CommandBuffer;
use crate::error::{ErrorSource, RESULT_INVALID_SHADER};
use crate::platform::Platform;
use crate::protocol::{
    ShaderUnitRegs, BOOL_UNIFORM_UPPER, FLOAT_UNIFORM_32BIT, GSH_REGS, REG_GEOSTAGE_CONFIG,
    REG_PRIMITIVE_CONFIG, REG_SH_OUTMAP_TOTAL, REG_VSH_COM_MODE, VSH_REGS,
};

const MAGIC_DVLB: u32 = 0x424C_5644;
const MAGIC_DVLP: u32 = 0x504C_5644;
const MAGIC_DVLE: u32 = 0x454C_5644;

/// Words in a DVLE header.
const DVLE_HEADER_WORDS: usize = 16;

/// Float uniform registers occupy 0x10..0x70 of the input register space.
const FLOAT_UNIFORM_FIRST: u16 = 0x10;
const FLOAT_UNIFORM_END: u16 = 0x70;

/// Maximum number of boolean uniforms per stage.
pub const BOOL_UNIFORM_COUNT: u8 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShaderParseError {
    #[error("shader binary is truncated")]
    Truncated,

    #[error("bad {0} magic")]
    BadMagic(&'static str),

    #[error("shader binary has no entry points")]
    NoEntries,

    #[error("uniform symbol at offset {0} is not terminated")]
    BadSymbol(usize),
}

/// Output semantic written by a shader output register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Position,
    NormalQuat,
    Color,
    TexCoord0,
    TexCoord0W,
    TexCoord1,
    TexCoord2,
    View,
    Other(u16),
}

impl OutputKind {
    fn from_raw(raw: u16) -> Self {
        match raw {
            0 => OutputKind::Position,
            1 => OutputKind::NormalQuat,
            2 => OutputKind::Color,
            3 => OutputKind::TexCoord0,
            4 => OutputKind::TexCoord0W,
            5 => OutputKind::TexCoord1,
            6 => OutputKind::TexCoord2,
            8 => OutputKind::View,
            other => OutputKind::Other(other),
        }
    }

    /// Rasterizer attribute ids fed by each component (x, y, z, w), one
    /// byte per component; 0x1F is unused.
    fn semantic_word(self) -> u32 {
        match self {
            OutputKind::Position => 0x0302_0100,
            OutputKind::NormalQuat => 0x0706_0504,
            OutputKind::Color => 0x0B0A_0908,
            OutputKind::TexCoord0 => 0x1F1F_0D0C,
            OutputKind::TexCoord0W => 0x1010_1010,
            OutputKind::TexCoord1 => 0x1F1F_0F0E,
            OutputKind::TexCoord2 => 0x1F1F_1716,
            OutputKind::View => 0x1F14_1312,
            OutputKind::Other(_) => 0x1F1F_1F1F,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderOutput {
    pub kind: OutputKind,
    pub register: u16,
    /// Component mask, bit 0 = x.
    pub mask: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantValue {
    Bool(bool),
    Int([u8; 4]),
    /// Four 24-bit floats, x first.
    Float24([u32; 4]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderConstant {
    pub id: u16,
    pub value: ConstantValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformSymbol {
    pub name: String,
    pub start_reg: u16,
    pub end_reg: u16,
}

/// Output register routing for the rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outmap {
    /// Number of output registers in use.
    pub total: u32,
    pub registers: [u32; 7],
    /// Bit per output register written.
    pub mask: u32,
}

impl Outmap {
    /// Words for the incremental write starting at the total register.
    pub fn words(&self) -> [u32; 8] {
        let mut words = [0u32; 8];
        words[0] = self.total;
        words[1..].copy_from_slice(&self.registers);
        words
    }
}

/// One DVLE entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderEntry {
    pub stage: ShaderStage,
    pub main_offset: u32,
    pub end_offset: u32,
    pub constants: Vec<ShaderConstant>,
    pub outputs: Vec<ShaderOutput>,
    pub uniforms: Vec<UniformSymbol>,
}

impl ShaderEntry {
    /// Float uniform register index for `name`, if this entry declares it.
    pub fn uniform_location(&self, name: &str) -> Option<u32> {
        self.uniforms
            .iter()
            .find(|u| u.name == name)
            .filter(|u| (FLOAT_UNIFORM_FIRST..FLOAT_UNIFORM_END).contains(&u.start_reg))
            .map(|u| (u.start_reg - FLOAT_UNIFORM_FIRST) as u32)
    }

    pub fn outmap(&self) -> Outmap {
        let mut registers = [0x1F1F_1F1Fu32; 7];
        let mut total = 0;
        let mut mask = 0;

        for output in &self.outputs {
            let reg = output.register as usize;
            if reg >= registers.len() {
                continue;
            }

            let component_mask = (0..4)
                .filter(|c| output.mask & (1 << c) != 0)
                .fold(0u32, |m, c| m | (0xFF << (c * 8)));

            if registers[reg] == 0x1F1F_1F1F {
                total += 1;
            }
            registers[reg] =
                (registers[reg] & !component_mask) | (output.kind.semantic_word() & component_mask);
            mask |= 1 << reg;
        }

        Outmap {
            total,
            registers,
            mask,
        }
    }

    /// Boolean uniform bits preset by the binary.
    pub fn constant_bools(&self) -> u16 {
        self.constants
            .iter()
            .filter_map(|c| match c.value {
                ConstantValue::Bool(true) if c.id < BOOL_UNIFORM_COUNT as u16 => Some(1u16 << c.id),
                _ => None,
            })
            .fold(0, |bits, bit| bits | bit)
    }
}

/// A parsed DVLB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinary {
    pub code: Vec<u32>,
    pub opdescs: Vec<u32>,
    pub entries: Vec<ShaderEntry>,
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn word(&self, byte_offset: usize) -> Result<u32, ShaderParseError> {
        self.bytes
            .get(byte_offset..byte_offset + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or(ShaderParseError::Truncated)
    }

    fn words(&self, byte_offset: usize, count: usize) -> Result<Vec<u32>, ShaderParseError> {
        (0..count).map(|i| self.word(byte_offset + i * 4)).collect()
    }

    /// Element count of a `count` x `size` byte table at `byte_offset`,
    /// checked against the end of the binary.
    fn table(&self, byte_offset: usize, count: u32, size: usize) -> Result<usize, ShaderParseError> {
        let count = count as usize;
        count
            .checked_mul(size)
            .and_then(|len| len.checked_add(byte_offset))
            .filter(|&end| end <= self.bytes.len())
            .map(|_| count)
            .ok_or(ShaderParseError::Truncated)
    }

    fn c_str(&self, byte_offset: usize) -> Result<String, ShaderParseError> {
        let tail = self
            .bytes
            .get(byte_offset..)
            .ok_or(ShaderParseError::BadSymbol(byte_offset))?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(ShaderParseError::BadSymbol(byte_offset))?;
        Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
    }
}

impl ShaderBinary {
    pub fn parse(bytes: &[u8]) -> Result<Self, ShaderParseError> {
        let r = Reader { bytes };
        if r.word(0)? != MAGIC_DVLB {
            return Err(ShaderParseError::BadMagic("DVLB"));
        }

        let num_entries = r.word(4)? as usize;
        if num_entries == 0 {
            return Err(ShaderParseError::NoEntries);
        }
        let entry_offsets = r.words(8, num_entries)?;

        // Program blob follows the entry offset table.
        let dvlp = 8 + num_entries * 4;
        if r.word(dvlp)? != MAGIC_DVLP {
            return Err(ShaderParseError::BadMagic("DVLP"));
        }
        let code_offset = r.word(dvlp + 8)? as usize;
        let code_len = r.word(dvlp + 12)? as usize;
        let opdesc_offset = r.word(dvlp + 16)? as usize;
        let opdesc_len = r.word(dvlp + 20)? as usize;

        let code = r.words(dvlp + code_offset, code_len)?;
        // Operand descriptors are 8 bytes each; only the low word is used.
        let opdescs = (0..opdesc_len)
            .map(|i| r.word(dvlp + opdesc_offset + i * 8))
            .collect::<Result<Vec<_>, _>>()?;

        let entries = entry_offsets
            .iter()
            .map(|&offset| Self::parse_entry(&r, offset as usize))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            code,
            opdescs,
            entries,
        })
    }

    fn parse_entry(r: &Reader<'_>, base: usize) -> Result<ShaderEntry, ShaderParseError> {
        if r.word(base)? != MAGIC_DVLE {
            return Err(ShaderParseError::BadMagic("DVLE"));
        }
        let header = r.words(base, DVLE_HEADER_WORDS)?;

        let stage = if (header[1] >> 16) & 0xFF == 1 {
            ShaderStage::Geometry
        } else {
            ShaderStage::Vertex
        };

        let count = r.table(base + header[6] as usize, header[7], 20)?;
        let mut constants = Vec::with_capacity(count);
        for i in 0..count {
            let at = base + header[6] as usize + i * 20;
            let head = r.word(at)?;
            let data = r.words(at + 4, 4)?;
            let value = match head & 0xFFFF {
                0 => ConstantValue::Bool(data[0] & 1 != 0),
                1 => ConstantValue::Int(data[0].to_le_bytes()),
                _ => ConstantValue::Float24([data[0], data[1], data[2], data[3]]),
            };
            constants.push(ShaderConstant {
                id: (head >> 16) as u16,
                value,
            });
        }

        let count = r.table(base + header[10] as usize, header[11], 8)?;
        let mut outputs = Vec::with_capacity(count);
        for i in 0..count {
            let at = base + header[10] as usize + i * 8;
            let head = r.word(at)?;
            outputs.push(ShaderOutput {
                kind: OutputKind::from_raw(head as u16),
                register: (head >> 16) as u16,
                mask: r.word(at + 4)? as u8,
            });
        }

        let symbols = base + header[14] as usize;
        let count = r.table(base + header[12] as usize, header[13], 8)?;
        let mut uniforms = Vec::with_capacity(count);
        for i in 0..count {
            let at = base + header[12] as usize + i * 8;
            let symbol = (r.word(at)? & 0xFFFF) as usize;
            let regs = r.word(at + 4)?;
            uniforms.push(UniformSymbol {
                name: r.c_str(symbols + symbol)?,
                start_reg: regs as u16,
                end_reg: (regs >> 16) as u16,
            });
        }

        Ok(ShaderEntry {
            stage,
            main_offset: header[2],
            end_offset: header[3],
            constants,
            outputs,
            uniforms,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct StageUniforms {
    /// Stored in register order (w, z, y, x).
    floats: BTreeMap<String, Vec<[f32; 4]>>,
    bools: u16,
    bools_set: u16,
}

/// A shader object: optional loaded binary plus the uniform values set on
/// it.
#[derive(Debug, Default)]
pub struct Shader {
    binary: Option<ShaderBinary>,
    geometry_stride: u8,
    stages: [StageUniforms; 2],
}

impl Shader {
    pub fn is_loaded(&self) -> bool {
        self.binary.is_some()
    }

    pub fn binary(&self) -> Option<&ShaderBinary> {
        self.binary.as_ref()
    }

    fn entry(&self, stage: ShaderStage) -> Option<&ShaderEntry> {
        self.binary.as_ref()?.entries.get(stage.index())
    }

    fn set_uniform(&mut self, stage: ShaderStage, name: &str, data: &[[f32; 4]]) {
        let reversed = data.iter().map(|v| [v[3], v[2], v[1], v[0]]).collect();
        self.stages[stage.index()]
            .floats
            .insert(name.to_string(), reversed);
    }

    fn uniform(&self, stage: ShaderStage, name: &str) -> Option<Vec<[f32; 4]>> {
        self.stages[stage.index()]
            .floats
            .get(name)
            .map(|values| values.iter().map(|v| [v[3], v[2], v[1], v[0]]).collect())
    }

    fn bools(&self, stage: ShaderStage) -> u16 {
        let uniforms = &self.stages[stage.index()];
        let preset = self.entry(stage).map_or(0, ShaderEntry::constant_bools);
        (preset & !uniforms.bools_set) | (uniforms.bools & uniforms.bools_set)
    }

    /// Upload program code, operand descriptors, entry points, constants
    /// and the output map. Returns false if nothing is loaded.
    pub(crate) fn emit_program(&self, cmd: &mut CommandBuffer) -> bool {
        let Some(binary) = &self.binary else {
            return false;
        };
        let Some(vertex) = binary.entries.first() else {
            return false;
        };
        let geometry = binary.entries.get(1);

        match geometry {
            Some(_) => {
                cmd.write_masked(REG_GEOSTAGE_CONFIG, 0x1, 0x2);
                cmd.write_masked(REG_VSH_COM_MODE, 0x1, 0x1);
                let stride = self.geometry_stride.max(1) as u32;
                cmd.write(GSH_REGS.input_buffer_config, 0x0800_0000 | (stride - 1));
            }
            None => {
                cmd.write_masked(REG_GEOSTAGE_CONFIG, 0x1, 0x0);
                cmd.write_masked(REG_VSH_COM_MODE, 0x1, 0x0);
            }
        }

        upload_stage(cmd, &VSH_REGS, binary, vertex);
        if let Some(entry) = geometry {
            upload_stage(cmd, &GSH_REGS, binary, entry);
        }

        let outmap = geometry.unwrap_or(vertex).outmap();
        cmd.write_masked(REG_PRIMITIVE_CONFIG, 0x1, outmap.total.saturating_sub(1));
        cmd.write_incremental(REG_SH_OUTMAP_TOTAL, &outmap.words());
        true
    }

    /// Write every recorded float uniform the binary declares. Unknown
    /// names are skipped.
    pub(crate) fn emit_float_uniforms(&self, cmd: &mut CommandBuffer) {
        for stage in [ShaderStage::Vertex, ShaderStage::Geometry] {
            let Some(entry) = self.entry(stage) else {
                continue;
            };
            let regs = stage_regs(stage);

            for (name, values) in &self.stages[stage.index()].floats {
                let Some(location) = entry.uniform_location(name) else {
                    continue;
                };
                let words: Vec<u32> = values.iter().flatten().map(|f| f.to_bits()).collect();
                cmd.write(regs.float_uniform_config, FLOAT_UNIFORM_32BIT | location);
                cmd.write_repeated(regs.float_uniform_data, &words);
            }
        }
    }

    pub(crate) fn emit_bool_uniforms(&self, cmd: &mut CommandBuffer) {
        for stage in [ShaderStage::Vertex, ShaderStage::Geometry] {
            if self.entry(stage).is_some() {
                cmd.write(
                    stage_regs(stage).bool_uniform,
                    BOOL_UNIFORM_UPPER | self.bools(stage) as u32,
                );
            }
        }
    }
}

fn stage_regs(stage: ShaderStage) -> &'static ShaderUnitRegs {
    match stage {
        ShaderStage::Vertex => &VSH_REGS,
        ShaderStage::Geometry => &GSH_REGS,
    }
}

fn upload_stage(cmd: &mut CommandBuffer, regs: &ShaderUnitRegs, binary: &ShaderBinary, entry: &ShaderEntry) {
    cmd.write(regs.codetransfer_config, 0);
    cmd.write_repeated(regs.codetransfer_data, &binary.code);
    cmd.write(regs.codetransfer_end, 1);

    cmd.write(regs.opdescs_config, 0);
    cmd.write_repeated(regs.opdescs_data, &binary.opdescs);

    cmd.write(regs.entrypoint, 0x7FFF_0000 | (entry.main_offset & 0xFFFF));
    cmd.write(regs.outmap_mask, entry.outmap().mask);

    for constant in &entry.constants {
        match constant.value {
            ConstantValue::Float24(d) => {
                let packed = [
                    (d[3] << 8) | (d[2] >> 16),
                    (d[2] << 16) | (d[1] >> 8),
                    (d[1] << 24) | d[0],
                ];
                cmd.write(regs.float_uniform_config, constant.id as u32);
                cmd.write_repeated(regs.float_uniform_data, &packed);
            }
            ConstantValue::Int(v) if constant.id < 4 => {
                cmd.write(regs.int_uniform + constant.id, u32::from_le_bytes(v));
            }
            // Boolean constants are folded into the boolean uniform word.
            _ => {}
        }
    }
}

// =============================================================================
// Context operations
// =============================================================================

impl<P: Platform> GraphicsContext<P> {
    pub fn create_shader(&mut self) -> ShaderHandle {
        self.shaders.insert(Shader::default())
    }

    /// Release a shader. Freeing the active shader unbinds it.
    pub fn free_shader(&mut self, shader: ShaderHandle) {
        match self.shaders.remove(shader) {
            Ok(Some(_)) if self.state.active_shader == shader => {
                self.state.active_shader = ShaderHandle::NULL;
            }
            Ok(_) => {}
            Err(_) => {
                warn!("Ignoring stale shader handle {:?} on free", shader);
                self.errors
                    .raise(ErrorSource::InvalidHandle, crate::error::RESULT_INVALID_HANDLE);
            }
        }
    }

    /// Parse and attach a shader binary, replacing any previous one. A
    /// binary that fails to parse leaves the shader unloaded.
    pub fn load_shader(&mut self, shader: ShaderHandle, data: &[u8], geometry_stride: u8) {
        let Some(shdr) = live(&mut self.shaders, &mut self.errors, shader, "shader") else {
            return;
        };

        match ShaderBinary::parse(data) {
            Ok(binary) => {
                debug!(
                    "Loaded shader: {} code words, {} operand descriptors, {} entries",
                    binary.code.len(),
                    binary.opdescs.len(),
                    binary.entries.len()
                );
                shdr.binary = Some(binary);
                shdr.geometry_stride = geometry_stride;
            }
            Err(e) => {
                warn!("Rejected shader binary: {}", e);
                shdr.binary = None;
                self.errors.raise(ErrorSource::Generic, RESULT_INVALID_SHADER);
            }
        }

        if self.state.active_shader == shader {
            self.state.set_active_shader(shader);
        }
    }

    pub fn shader_loaded(&mut self, shader: ShaderHandle) -> bool {
        live(&mut self.shaders, &mut self.errors, shader, "shader").is_some_and(|s| s.is_loaded())
    }

    /// Make `shader` the active program. A shader without a binary may be
    /// bound; it emits nothing until loaded.
    pub fn use_shader(&mut self, shader: ShaderHandle) {
        if live(&mut self.shaders, &mut self.errors, shader, "shader").is_none() {
            return;
        }
        self.state.set_active_shader(shader);
    }

    pub fn active_shader(&self) -> ShaderHandle {
        self.state.active_shader
    }

    /// Record a float vector uniform. Takes effect now if the shader is
    /// active, otherwise the next time it is bound.
    pub fn set_uniform(&mut self, shader: ShaderHandle, stage: ShaderStage, name: &str, data: &[[f32; 4]]) {
        let Some(shdr) = live(&mut self.shaders, &mut self.errors, shader, "shader") else {
            return;
        };
        shdr.set_uniform(stage, name, data);

        if self.state.active_shader == shader {
            self.state.dirty |= DirtyFlags::SHADER_UNIFORMS;
        }
    }

    pub fn uniform(&mut self, shader: ShaderHandle, stage: ShaderStage, name: &str) -> Option<Vec<[f32; 4]>> {
        live(&mut self.shaders, &mut self.errors, shader, "shader")?.uniform(stage, name)
    }

    pub fn set_uniform_bool(&mut self, shader: ShaderHandle, stage: ShaderStage, id: u8, value: bool) {
        if id >= BOOL_UNIFORM_COUNT {
            return;
        }
        let Some(shdr) = live(&mut self.shaders, &mut self.errors, shader, "shader") else {
            return;
        };

        let uniforms = &mut shdr.stages[stage.index()];
        let bit = 1u16 << id;
        uniforms.bools_set |= bit;
        if value {
            uniforms.bools |= bit;
        } else {
            uniforms.bools &= !bit;
        }

        if self.state.active_shader == shader {
            self.state.dirty |= DirtyFlags::SHADER_UNIFORM_BOOLS;
        }
    }

    pub fn uniform_bool(&mut self, shader: ShaderHandle, stage: ShaderStage, id: u8) -> Option<bool> {
        if id >= BOOL_UNIFORM_COUNT {
            return None;
        }
        let shdr = live(&mut self.shaders, &mut self.errors, shader, "shader")?;
        Some(shdr.bools(stage) & (1 << id) != 0)
    }
}

/// Assembles shader binaries for tests.
#[cfg(test)]
pub(crate) mod test_binary {
    use super::*;

    pub struct EntryDesc {
        pub stage: ShaderStage,
        pub main: u32,
        pub uniforms: Vec<(&'static str, u16)>,
        pub outputs: Vec<(u16, u16, u8)>,
        pub bool_constants: Vec<(u16, bool)>,
    }

    impl EntryDesc {
        pub fn vertex(uniforms: Vec<(&'static str, u16)>) -> Self {
            Self {
                stage: ShaderStage::Vertex,
                main: 0,
                uniforms,
                // position -> o0, colour -> o1
                outputs: vec![(0, 0, 0xF), (2, 1, 0xF)],
                bool_constants: Vec::new(),
            }
        }
    }

    fn push_bytes(words: &mut Vec<u32>, bytes: &[u8]) {
        for chunk in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            words.push(u32::from_le_bytes(word));
        }
    }

    pub fn build(code: &[u32], opdescs: &[u32], entries: &[EntryDesc]) -> Vec<u8> {
        let mut dvlp = vec![
            MAGIC_DVLP,
            0,
            0x28,
            code.len() as u32,
            0x28 + code.len() as u32 * 4,
            opdescs.len() as u32,
            0,
            0,
            0,
            0,
        ];
        dvlp.extend_from_slice(code);
        for op in opdescs {
            dvlp.push(*op);
            dvlp.push(0);
        }

        let mut dvles = Vec::new();
        for entry in entries {
            let mut header = vec![0u32; DVLE_HEADER_WORDS];
            let mut body = Vec::new();
            let at = |body: &Vec<u32>| (DVLE_HEADER_WORDS * 4 + body.len() * 4) as u32;

            header[0] = MAGIC_DVLE;
            header[1] = (entry.stage.index() as u32) << 16;
            header[2] = entry.main;
            header[3] = code.len() as u32;

            header[6] = at(&body);
            header[7] = entry.bool_constants.len() as u32;
            for (id, value) in &entry.bool_constants {
                body.extend_from_slice(&[(*id as u32) << 16, *value as u32, 0, 0, 0]);
            }

            header[10] = at(&body);
            header[11] = entry.outputs.len() as u32;
            for (kind, reg, mask) in &entry.outputs {
                body.extend_from_slice(&[(*kind as u32) | ((*reg as u32) << 16), *mask as u32]);
            }

            let mut symbols = Vec::new();
            header[12] = at(&body);
            header[13] = entry.uniforms.len() as u32;
            for (name, reg) in &entry.uniforms {
                body.extend_from_slice(&[symbols.len() as u32, (*reg as u32) | ((*reg as u32) << 16)]);
                symbols.extend_from_slice(name.as_bytes());
                symbols.push(0);
            }

            header[14] = at(&body);
            header[15] = symbols.len() as u32;
            push_bytes(&mut body, &symbols);

            header.extend(body);
            dvles.push(header);
        }

        let mut words = vec![MAGIC_DVLB, entries.len() as u32];
        let mut offset = (8 + entries.len() * 4 + dvlp.len() * 4) as u32;
        for dvle in &dvles {
            words.push(offset);
            offset += dvle.len() as u32 * 4;
        }
        words.extend(dvlp);
        for dvle in dvles {
            words.extend(dvle);
        }

        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// A vertex-only shader declaring `projection` at c0 and `tint` at c4.
    pub fn simple() -> Vec<u8> {
        build(
            &[0x1111_1111, 0x2222_2222, 0x8800_0000],
            &[0x0000_036F],
            &[EntryDesc::vertex(vec![("projection", 0x10), ("tint", 0x14)])],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_binary::*;
    use super::*;
    use crate::command_buffer::RegWrite;
    use crate::gpu::test_context;

    #[test]
    fn test_parse_simple_binary() {
        let binary = ShaderBinary::parse(&simple()).expect("parse");
        assert_eq!(binary.code, vec![0x1111_1111, 0x2222_2222, 0x8800_0000]);
        assert_eq!(binary.opdescs, vec![0x0000_036F]);
        assert_eq!(binary.entries.len(), 1);

        let entry = &binary.entries[0];
        assert_eq!(entry.stage, ShaderStage::Vertex);
        assert_eq!(entry.uniform_location("projection"), Some(0));
        assert_eq!(entry.uniform_location("tint"), Some(4));
        assert_eq!(entry.uniform_location("missing"), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ShaderBinary::parse(&[1, 2, 3]), Err(ShaderParseError::Truncated));
        assert_eq!(
            ShaderBinary::parse(&[0u8; 64]),
            Err(ShaderParseError::BadMagic("DVLB"))
        );
        let mut bytes = simple();
        bytes.truncate(bytes.len() - 8);
        assert!(ShaderBinary::parse(&bytes).is_err());

        // Table counts far past the end of the binary.
        for count_word in [7, 11, 13] {
            let mut bytes = simple();
            let base = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
            let at = base + count_word * 4;
            bytes[at..at + 4].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
            assert_eq!(ShaderBinary::parse(&bytes), Err(ShaderParseError::Truncated));
        }
    }

    #[test]
    fn test_outmap_generation() {
        let binary = ShaderBinary::parse(&simple()).expect("parse");
        let outmap = binary.entries[0].outmap();
        assert_eq!(outmap.total, 2);
        assert_eq!(outmap.registers[0], 0x0302_0100);
        assert_eq!(outmap.registers[1], 0x0B0A_0908);
        assert_eq!(outmap.registers[2], 0x1F1F_1F1F);
        assert_eq!(outmap.mask, 0b11);
    }

    #[test]
    fn test_outmap_partial_components() {
        let entry = ShaderEntry {
            stage: ShaderStage::Vertex,
            main_offset: 0,
            end_offset: 0,
            constants: Vec::new(),
            // texcoord0 in xy of o2, texcoord1 in zw of o2
            outputs: vec![
                ShaderOutput {
                    kind: OutputKind::TexCoord0,
                    register: 2,
                    mask: 0x3,
                },
                ShaderOutput {
                    kind: OutputKind::TexCoord1,
                    register: 2,
                    mask: 0xC,
                },
            ],
            uniforms: Vec::new(),
        };
        let outmap = entry.outmap();
        assert_eq!(outmap.total, 1);
        assert_eq!(outmap.registers[2], 0x1F1F_0D0C);
        assert_eq!(outmap.mask, 1 << 2);
    }

    #[test]
    fn test_uniform_round_trip_hides_reversal() {
        let mut ctx = test_context();
        let shader = ctx.create_shader();
        ctx.load_shader(shader, &simple(), 0);

        let value = [[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]];
        ctx.set_uniform(shader, ShaderStage::Vertex, "tint", &value);
        assert_eq!(
            ctx.uniform(shader, ShaderStage::Vertex, "tint"),
            Some(value.to_vec())
        );
    }

    #[test]
    fn test_uniform_emission_is_reversed() {
        let mut ctx = test_context();
        let shader = ctx.create_shader();
        ctx.load_shader(shader, &simple(), 0);
        ctx.use_shader(shader);
        ctx.set_uniform(shader, ShaderStage::Vertex, "tint", &[[1.0, 2.0, 3.0, 4.0]]);
        ctx.update_state();

        let writes = ctx.command_buffer().decode();
        let config = writes
            .iter()
            .position(|w| *w == RegWrite { reg: VSH_REGS.float_uniform_config, mask: 0xF, value: 0x8000_0004 })
            .expect("tint config write");
        let data: Vec<f32> = writes[config + 1..config + 5]
            .iter()
            .map(|w| f32::from_bits(w.value))
            .collect();
        assert_eq!(data, vec![4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_unknown_uniform_is_dropped() {
        let mut ctx = test_context();
        let shader = ctx.create_shader();
        ctx.load_shader(shader, &simple(), 0);
        ctx.use_shader(shader);
        ctx.set_uniform(shader, ShaderStage::Vertex, "nope", &[[1.0; 4]]);
        ctx.update_state();

        let writes = ctx.command_buffer().decode();
        assert!(!writes.iter().any(|w| w.reg == VSH_REGS.float_uniform_config));
    }

    #[test]
    fn test_inactive_shader_uniform_records_without_dirtying() {
        let mut ctx = test_context();
        let active = ctx.create_shader();
        let other = ctx.create_shader();
        ctx.load_shader(active, &simple(), 0);
        ctx.load_shader(other, &simple(), 0);
        ctx.use_shader(active);
        ctx.update_state();

        ctx.set_uniform(other, ShaderStage::Vertex, "tint", &[[0.5; 4]]);
        ctx.set_uniform_bool(other, ShaderStage::Vertex, 3, true);
        assert!(ctx.state().is_clean());
        assert_eq!(ctx.uniform_bool(other, ShaderStage::Vertex, 3), Some(true));

        ctx.set_uniform_bool(active, ShaderStage::Vertex, 3, true);
        assert_eq!(ctx.state().dirty, DirtyFlags::SHADER_UNIFORM_BOOLS);
    }

    #[test]
    fn test_bool_uniform_emission() {
        let mut ctx = test_context();
        let shader = ctx.create_shader();
        ctx.load_shader(shader, &simple(), 0);
        ctx.use_shader(shader);
        ctx.set_uniform_bool(shader, ShaderStage::Vertex, 0, true);
        ctx.set_uniform_bool(shader, ShaderStage::Vertex, 5, true);
        ctx.update_state();

        let writes = ctx.command_buffer().decode();
        assert!(writes.contains(&RegWrite {
            reg: VSH_REGS.bool_uniform,
            mask: 0xF,
            value: 0x7FFF_0021,
        }));
    }

    #[test]
    fn test_bool_constants_are_defaults() {
        let mut entry = EntryDesc::vertex(Vec::new());
        entry.bool_constants = vec![(2, true)];
        let bytes = build(&[0], &[0], &[entry]);

        let mut ctx = test_context();
        let shader = ctx.create_shader();
        ctx.load_shader(shader, &bytes, 0);
        assert_eq!(ctx.uniform_bool(shader, ShaderStage::Vertex, 2), Some(true));

        ctx.set_uniform_bool(shader, ShaderStage::Vertex, 2, false);
        assert_eq!(ctx.uniform_bool(shader, ShaderStage::Vertex, 2), Some(false));
    }

    #[test]
    fn test_unloaded_shader_binds_but_emits_nothing() {
        let mut ctx = test_context();
        let shader = ctx.create_shader();
        ctx.use_shader(shader);
        ctx.update_state();

        let writes = ctx.command_buffer().decode();
        assert!(!writes.iter().any(|w| w.reg == VSH_REGS.codetransfer_data));
        assert!(!ctx.errors().has_error());
    }

    #[test]
    fn test_program_upload() {
        let mut ctx = test_context();
        let shader = ctx.create_shader();
        ctx.load_shader(shader, &simple(), 0);
        ctx.use_shader(shader);
        ctx.update_state();

        let writes = ctx.command_buffer().decode();
        let code: Vec<u32> = writes
            .iter()
            .filter(|w| w.reg == VSH_REGS.codetransfer_data)
            .map(|w| w.value)
            .collect();
        assert_eq!(code, vec![0x1111_1111, 0x2222_2222, 0x8800_0000]);
        assert!(writes.iter().any(|w| w.reg == VSH_REGS.entrypoint && w.value == 0x7FFF_0000));
        assert!(writes.iter().any(|w| w.reg == REG_SH_OUTMAP_TOTAL && w.value == 2));
    }

    #[test]
    fn test_geometry_stage() {
        let bytes = build(
            &[0xAAAA_AAAA],
            &[0x1],
            &[
                EntryDesc::vertex(Vec::new()),
                EntryDesc {
                    stage: ShaderStage::Geometry,
                    main: 1,
                    uniforms: vec![("scale", 0x20)],
                    outputs: vec![(0, 0, 0xF)],
                    bool_constants: Vec::new(),
                },
            ],
        );

        let mut ctx = test_context();
        let shader = ctx.create_shader();
        ctx.load_shader(shader, &bytes, 3);
        ctx.use_shader(shader);
        ctx.set_uniform(shader, ShaderStage::Geometry, "scale", &[[2.0; 4]]);
        ctx.update_state();

        let writes = ctx.command_buffer().decode();
        assert!(writes.iter().any(|w| w.reg == GSH_REGS.input_buffer_config && w.value == 0x0800_0002));
        assert!(writes.iter().any(|w| w.reg == GSH_REGS.entrypoint && w.value == 0x7FFF_0001));
        assert!(writes
            .iter()
            .any(|w| w.reg == GSH_REGS.float_uniform_config && w.value == 0x8000_0010));
    }

    #[test]
    fn test_free_active_shader_unbinds() {
        let mut ctx = test_context();
        let shader = ctx.create_shader();
        ctx.load_shader(shader, &simple(), 0);
        ctx.use_shader(shader);
        ctx.free_shader(shader);
        assert!(ctx.active_shader().is_null());

        ctx.update_state();
        assert!(!ctx.errors().has_error());

        ctx.free_shader(shader);
        assert!(ctx.errors().has_error());
    }

    #[test]
    fn test_bad_binary_unloads_and_reports() {
        let mut ctx = test_context();
        let shader = ctx.create_shader();
        ctx.load_shader(shader, &simple(), 0);
        assert!(ctx.shader_loaded(shader));

        ctx.load_shader(shader, b"not a shader", 0);
        assert!(!ctx.shader_loaded(shader));
        assert!(ctx.errors().has_error());
    }
}
