// Visibility mesh produced by a field-of-view sweep, and its GPU form.
//
//   FovSensor::update() → VisibilityMesh → to_render_mesh() → RenderMesh → GPU
//
// The visibility mesh is rebuilt every tick. Its vertices are offsets from the
// sensor origin in world orientation, so a renderer only has to translate it.

use glam::{Vec2, Vec3};

// ============================================================================
// GPU VERTEX
// ============================================================================

/// GPU-ready vertex with position and normal.
///   @location(0) position: vec3<f32>
///   @location(1) normal:   vec3<f32>
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub normal:   [f32; 3],
}

impl GpuVertex {
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<GpuVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

// ============================================================================
// VISIBILITY MESH
// ============================================================================

/// Triangulated fan approximating what a sensor can see this tick.
///
/// `vertices[0]` is always the sensor origin (`Vec3::ZERO`); the sampled ray
/// endpoints follow in row-major grid order. `uvs` runs parallel to
/// `vertices` and is zeroed. `triangles` holds only emitted faces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityMesh {
    pub vertices:  Vec<Vec3>,
    pub uvs:       Vec<Vec2>,
    pub triangles: Vec<[u32; 3]>,
}

impl VisibilityMesh {
    /// Empty mesh holding only the fan centre, with room for `samples` more vertices.
    pub fn with_capacity(samples: usize) -> Self {
        let mut vertices = Vec::with_capacity(samples + 1);
        vertices.push(Vec3::ZERO);
        Self {
            vertices,
            uvs: Vec::with_capacity(samples + 1),
            triangles: Vec::with_capacity(samples * 2 + 4),
        }
    }

    /// Append a sampled vertex and return its index.
    pub fn push_vertex(&mut self, position: Vec3) -> usize {
        self.vertices.push(position);
        self.vertices.len() - 1
    }

    pub fn push_triangle(&mut self, a: usize, b: usize, c: usize) {
        self.triangles.push([a as u32, b as u32, c as u32]);
    }

    /// Pad `uvs` to match `vertices`. Texturing is not supported yet.
    pub fn fill_uvs(&mut self) {
        self.uvs.resize(self.vertices.len(), Vec2::ZERO);
    }

    pub fn triangle_count(&self) -> usize { self.triangles.len() }

    /// Flattened triangle list for an index buffer.
    pub fn index_buffer(&self) -> Vec<u32> {
        self.triangles.iter().flatten().copied().collect()
    }

    /// Unnormalized face normal (magnitude = 2 × area).
    pub fn face_normal(&self, triangle: [u32; 3]) -> Vec3 {
        let [a, b, c] = triangle.map(|i| self.vertices[i as usize]);
        (b - a).cross(c - a)
    }

    /// Convert to a GPU-ready mesh with smooth (area-weighted) normals.
    ///
    ///   1. Accumulate each face's cross product into its three vertices.
    ///      The cross product magnitude is 2×area, so this is area-weighted.
    ///   2. Normalize each accumulated normal.
    pub fn to_render_mesh(&self) -> RenderMesh {
        let mut normal_accum: Vec<Vec3> = vec![Vec3::ZERO; self.vertices.len()];

        for &tri in &self.triangles {
            let weighted_normal = self.face_normal(tri);
            for i in tri {
                normal_accum[i as usize] += weighted_normal;
            }
        }

        let vertices: Vec<GpuVertex> = self.vertices.iter()
            .zip(normal_accum.iter())
            .map(|(pos, n)| GpuVertex {
                position: pos.to_array(),
                normal:   n.normalize_or_zero().to_array(),
            })
            .collect();

        RenderMesh { vertices, indices: self.index_buffer() }
    }
}

// ============================================================================
// RENDER MESH
// ============================================================================

/// GPU-ready triangulated mesh with per-vertex normals.
/// Upload vertex_bytes() to a VERTEX buffer, index_bytes() to an INDEX buffer.
pub struct RenderMesh {
    pub vertices: Vec<GpuVertex>,
    pub indices:  Vec<u32>,
}

impl RenderMesh {
    /// Cast vertex slice to raw bytes for wgpu buffer upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Cast index slice to raw bytes for wgpu buffer upload.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn index_count(&self) -> usize  { self.indices.len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn quad() -> VisibilityMesh {
        let mut mesh = VisibilityMesh::with_capacity(4);
        mesh.push_vertex(Vec3::new(0.0, 0.0, -1.0));
        mesh.push_vertex(Vec3::new(1.0, 0.0, -1.0));
        mesh.push_vertex(Vec3::new(1.0, 1.0, -1.0));
        mesh.push_vertex(Vec3::new(0.0, 1.0, -1.0));
        mesh.push_triangle(1, 2, 3);
        mesh.push_triangle(1, 3, 4);
        mesh.fill_uvs();
        mesh
    }

    #[test]
    fn centre_vertex_is_origin() {
        let mesh = VisibilityMesh::with_capacity(8);
        assert_eq!(mesh.vertices, vec![Vec3::ZERO]);
    }

    #[test]
    fn uvs_parallel_to_vertices() {
        let mesh = quad();
        assert_eq!(mesh.uvs.len(), mesh.vertices.len());
        assert!(mesh.uvs.iter().all(|uv| *uv == Vec2::ZERO));
    }

    #[test]
    fn index_buffer_is_flattened_triangles() {
        let mesh = quad();
        assert_eq!(mesh.index_buffer(), vec![1, 2, 3, 1, 3, 4]);
    }

    #[test]
    fn render_mesh_normals_face_out_of_the_quad() {
        let render = quad().to_render_mesh();
        assert_eq!(render.vertices.len(), 5);
        assert_eq!(render.index_count(), 6);
        // The unused centre vertex gets a zero normal.
        assert_eq!(render.vertices[0].normal, [0.0; 3]);
        for v in &render.vertices[1..] {
            assert_abs_diff_eq!(v.normal[2], 1.0, epsilon = 1e-5);
        }
        assert_eq!(render.index_bytes().len(), 6 * 4);
    }
}
