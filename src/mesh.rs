//! Mesh buffers used for baking and combining particle geometry.
//!
//! A [`Mesh`] keeps its vertex and index allocations across [`Mesh::clear`]
//! calls so that baking every frame does not churn the heap. Indices are
//! grouped into sub-meshes; each sub-mesh is drawn with the canvas material in
//! the same slot (0 for particles, 1 for trails).

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::color::gamma_to_linear_rgba;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UiVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub uv: [f32; 2],
}

impl UiVertex {
    pub const fn new(position: [f32; 3], color: [f32; 4], uv: [f32; 2]) -> Self {
        Self {
            position,
            color,
            uv,
        }
    }

    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<UiVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 12, // [f32; 3] is 12 bytes
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: 28, // + [f32; 4] is 16 bytes
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Axis-aligned bounding box for a mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    /// Compute bounding box from a set of vertices.
    pub fn from_vertices(vertices: &[UiVertex]) -> Self {
        if vertices.is_empty() {
            return Self::default();
        }

        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];

        for v in vertices {
            for i in 0..3 {
                min[i] = min[i].min(v.position[i]);
                max[i] = max[i].max(v.position[i]);
            }
        }

        Self { min, max }
    }
}

/// A dynamic triangle mesh with per-slot sub-meshes.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    vertices: Vec<UiVertex>,
    /// Index lists; only the first `submesh_count` are live.
    submeshes: Vec<Vec<u32>>,
    submesh_count: usize,
    bounds: BoundingBox,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all geometry, keeping allocations for reuse.
    pub fn clear(&mut self) {
        self.vertices.clear();
        for indices in &mut self.submeshes[..self.submesh_count] {
            indices.clear();
        }
        self.submesh_count = 0;
        self.bounds = BoundingBox::default();
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> &[UiVertex] {
        &self.vertices
    }

    /// Mutable vertex storage for bakers writing into this mesh.
    pub fn vertices_mut(&mut self) -> &mut Vec<UiVertex> {
        &mut self.vertices
    }

    pub fn submesh_count(&self) -> usize {
        self.submesh_count
    }

    /// Indices of sub-mesh `index`, or an empty slice if it does not exist.
    pub fn indices(&self, index: usize) -> &[u32] {
        if index < self.submesh_count {
            &self.submeshes[index]
        } else {
            &[]
        }
    }

    /// Mutable indices of sub-mesh `index`, creating empty sub-meshes up to it.
    pub fn indices_mut(&mut self, index: usize) -> &mut Vec<u32> {
        while self.submeshes.len() <= index {
            self.submeshes.push(Vec::new());
        }
        if self.submesh_count <= index {
            for indices in &mut self.submeshes[self.submesh_count..=index] {
                indices.clear();
            }
            self.submesh_count = index + 1;
        }
        &mut self.submeshes[index]
    }

    /// Total number of triangles across all sub-meshes.
    pub fn triangle_count(&self) -> usize {
        self.submeshes[..self.submesh_count]
            .iter()
            .map(|s| s.len() / 3)
            .sum()
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn recalculate_bounds(&mut self) {
        self.bounds = BoundingBox::from_vertices(&self.vertices);
    }

    /// Append every sub-mesh of `source` into sub-mesh `slot` of this mesh,
    /// transforming positions by `matrix`.
    pub fn append_transformed(&mut self, source: &Mesh, matrix: &Mat4, slot: usize) {
        let base = self.vertices.len() as u32;
        self.vertices.extend(source.vertices.iter().map(|v| {
            let p = matrix.transform_point3(glam::Vec3::from_array(v.position));
            UiVertex {
                position: p.to_array(),
                ..*v
            }
        }));

        let target = self.indices_mut(slot);
        for indices in &source.submeshes[..source.submesh_count] {
            target.extend(indices.iter().map(|i| base + i));
        }
    }

    /// Convert every vertex colour from gamma to linear space in place.
    pub fn convert_colors_to_linear(&mut self) {
        for v in &mut self.vertices {
            v.color = gamma_to_linear_rgba(v.color);
        }
    }
}
