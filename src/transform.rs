//! Transform Module
//!
//! Row-major 4x4 matrices and the projection and model-view stacks. Every
//! change to either matrix is published to the bound shader's vertex-stage
//! `projection` / `modelview` uniforms, one row per vector register.

use std::ops::Mul;

use tracing::trace;

use crate::gpu::resources::ShaderHandle;
use crate::gpu::types::ShaderStage;
use crate::gpu::GraphicsContext;
use crate::platform::Platform;

pub const PROJECTION_UNIFORM: &str = "projection";
pub const MODELVIEW_UNIFORM: &str = "modelview";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4(pub [f32; 16]);

impl Default for Mat4 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mat4 {
    pub const fn identity() -> Self {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        Self(m)
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.0[row * 4 + col]
    }

    pub fn rows(&self) -> [[f32; 4]; 4] {
        let m = &self.0;
        [
            [m[0], m[1], m[2], m[3]],
            [m[4], m[5], m[6], m[7]],
            [m[8], m[9], m[10], m[11]],
            [m[12], m[13], m[14], m[15]],
        ]
    }

    pub fn transform(&self, v: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0; 4];
        for (row, value) in out.iter_mut().enumerate() {
            *value = (0..4).map(|k| self.at(row, k) * v[k]).sum();
        }
        out
    }

    /// Orthographic projection, rotated a quarter turn for the panels'
    /// portrait mounting.
    pub fn ortho(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        let ortho = Self([
            2.0 / (right - left),
            0.0,
            0.0,
            -((right + left) / (right - left)),
            0.0,
            2.0 / (top - bottom),
            0.0,
            -((top + bottom) / (top - bottom)),
            0.0,
            0.0,
            2.0 / (far - near),
            -((far + near) / (far - near)),
            0.0,
            0.0,
            0.0,
            1.0,
        ]);
        Self::rotation_z(std::f32::consts::FRAC_PI_2) * ortho
    }

    /// Perspective projection with clip depth remapped to [-1, 0].
    pub fn perspective(fovy: f32, aspect: f32, near: f32, far: f32) -> Self {
        let top = near * (fovy / 2.0).tan();
        let right = top * aspect;

        let projection = Self([
            near / right,
            0.0,
            0.0,
            0.0,
            0.0,
            near / top,
            0.0,
            0.0,
            0.0,
            0.0,
            -(far + near) / (far - near),
            -2.0 * (far * near) / (far - near),
            0.0,
            0.0,
            -1.0,
            0.0,
        ]);

        let mut depth = Self::identity();
        depth.0[10] = 0.5;
        depth.0[11] = -0.5;
        depth * projection
    }

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::identity();
        m.0[3] = x;
        m.0[7] = y;
        m.0[11] = z;
        m
    }

    pub fn rotation_x(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        let mut m = Self::identity();
        m.0[5] = cos;
        m.0[6] = sin;
        m.0[9] = -sin;
        m.0[10] = cos;
        m
    }

    pub fn rotation_y(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        let mut m = Self::identity();
        m.0[0] = cos;
        m.0[2] = sin;
        m.0[8] = -sin;
        m.0[10] = cos;
        m
    }

    pub fn rotation_z(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        let mut m = Self::identity();
        m.0[0] = cos;
        m.0[1] = sin;
        m.0[4] = -sin;
        m.0[5] = cos;
        m
    }

    pub fn scaling(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::identity();
        m.0[0] = x;
        m.0[5] = y;
        m.0[10] = z;
        m
    }
}

impl Mul for Mat4 {
    type Output = Mat4;

    fn mul(self, rhs: Mat4) -> Mat4 {
        let mut out = [0.0; 16];
        for row in 0..4 {
            for col in 0..4 {
                out[row * 4 + col] = (0..4).map(|k| self.at(row, k) * rhs.at(k, col)).sum();
            }
        }
        Mat4(out)
    }
}

/// A current matrix plus the values saved by `push`.
#[derive(Debug, Clone, Default)]
pub struct MatrixStack {
    current: Mat4,
    saved: Vec<Mat4>,
}

impl MatrixStack {
    pub fn current(&self) -> Mat4 {
        self.current
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    pub fn set(&mut self, m: Mat4) {
        self.current = m;
    }

    pub fn push(&mut self) {
        self.saved.push(self.current);
    }

    /// Restore the last pushed matrix. Returns false on an empty stack.
    pub fn pop(&mut self) -> bool {
        match self.saved.pop() {
            Some(m) => {
                self.current = m;
                true
            }
            None => false,
        }
    }
}

/// Projection and model-view state bound to one shader.
#[derive(Debug, Clone)]
pub struct Transforms {
    shader: ShaderHandle,
    projection: MatrixStack,
    modelview: MatrixStack,
}

impl Transforms {
    /// Start both matrices at identity and publish them.
    pub fn new<P: Platform>(ctx: &mut GraphicsContext<P>, shader: ShaderHandle) -> Self {
        let transforms = Self {
            shader,
            projection: MatrixStack::default(),
            modelview: MatrixStack::default(),
        };
        transforms.publish_projection(ctx);
        transforms.publish_modelview(ctx);
        transforms
    }

    pub fn shader(&self) -> ShaderHandle {
        self.shader
    }

    pub fn projection(&self) -> Mat4 {
        self.projection.current()
    }

    pub fn modelview(&self) -> Mat4 {
        self.modelview.current()
    }

    fn publish_projection<P: Platform>(&self, ctx: &mut GraphicsContext<P>) {
        trace!("Publishing projection");
        ctx.set_uniform(
            self.shader,
            ShaderStage::Vertex,
            PROJECTION_UNIFORM,
            &self.projection.current().rows(),
        );
    }

    fn publish_modelview<P: Platform>(&self, ctx: &mut GraphicsContext<P>) {
        trace!("Publishing modelview");
        ctx.set_uniform(
            self.shader,
            ShaderStage::Vertex,
            MODELVIEW_UNIFORM,
            &self.modelview.current().rows(),
        );
    }

    // =========================================================================
    // Projection
    // =========================================================================

    pub fn set_projection<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>, m: Mat4) {
        self.projection.set(m);
        self.publish_projection(ctx);
    }

    pub fn push_projection(&mut self) {
        self.projection.push();
    }

    pub fn pop_projection<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>) {
        if self.projection.pop() {
            self.publish_projection(ctx);
        }
    }

    pub fn set_ortho<P: Platform>(
        &mut self,
        ctx: &mut GraphicsContext<P>,
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    ) {
        self.set_projection(ctx, Mat4::ortho(left, right, bottom, top, near, far));
    }

    pub fn set_perspective<P: Platform>(
        &mut self,
        ctx: &mut GraphicsContext<P>,
        fovy: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) {
        self.set_projection(ctx, Mat4::perspective(fovy, aspect, near, far));
    }

    // =========================================================================
    // Model-view
    // =========================================================================

    pub fn set_modelview<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>, m: Mat4) {
        self.modelview.set(m);
        self.publish_modelview(ctx);
    }

    pub fn push_modelview(&mut self) {
        self.modelview.push();
    }

    pub fn pop_modelview<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>) {
        if self.modelview.pop() {
            self.publish_modelview(ctx);
        }
    }

    fn apply<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>, m: Mat4) {
        let current = self.modelview.current();
        self.set_modelview(ctx, current * m);
    }

    pub fn translate<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>, x: f32, y: f32, z: f32) {
        self.apply(ctx, Mat4::translation(x, y, z));
    }

    pub fn rotate_x<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>, angle: f32) {
        self.apply(ctx, Mat4::rotation_x(angle));
    }

    pub fn rotate_y<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>, angle: f32) {
        self.apply(ctx, Mat4::rotation_y(angle));
    }

    pub fn rotate_z<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>, angle: f32) {
        self.apply(ctx, Mat4::rotation_z(angle));
    }

    /// Rotate about X, then Y, then Z.
    pub fn rotate<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>, x: f32, y: f32, z: f32) {
        self.apply(ctx, Mat4::rotation_x(x) * Mat4::rotation_y(y) * Mat4::rotation_z(z));
    }

    pub fn scale<P: Platform>(&mut self, ctx: &mut GraphicsContext<P>, x: f32, y: f32, z: f32) {
        self.apply(ctx, Mat4::scaling(x, y, z));
    }
}
