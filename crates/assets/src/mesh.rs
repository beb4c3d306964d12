use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Interleaved vertex layout shared by every mesh.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Axis-aligned bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(mut self, other: Bounds) -> Self {
        if !other.is_empty() {
            self.include(other.min);
            self.include(other.max);
        }
        self
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// A contiguous index range drawn with one material.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshSubset {
    pub first_index: u32,
    pub index_count: u32,
    pub bounds: Bounds,
}

/// Errors from decoding or validating mesh data.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("unsupported mesh file version {0}")]
    UnsupportedVersion(u32),
    #[error("vertex data is {0} bytes, not a whole number of vertices")]
    RaggedVertices(usize),
    #[error("mesh has no geometry")]
    Empty,
    #[error("index {index} out of range for {vertices} vertices")]
    IndexOutOfRange { index: u32, vertices: usize },
    #[error("subset {0} reaches past the index buffer")]
    BadSubset(usize),
}

const MESH_FILE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct MeshFile {
    version: u32,
    vertex_bytes: Vec<u8>,
    indices: Vec<u32>,
    subsets: Vec<MeshSubset>,
}

/// Geometry already converted and validated by an importer.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub subsets: Vec<MeshSubset>,
}

impl MeshData {
    /// A mesh with a single subset covering every index.
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let mut mesh = Self {
            vertices,
            indices,
            subsets: Vec::new(),
        };
        let subset = MeshSubset {
            first_index: 0,
            index_count: mesh.indices.len() as u32,
            bounds: mesh.bounds_of(0..mesh.indices.len()),
        };
        mesh.subsets.push(subset);
        mesh
    }

    pub fn bounds(&self) -> Bounds {
        self.subsets
            .iter()
            .fold(Bounds::EMPTY, |acc, s| acc.union(s.bounds))
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(MeshError::Empty);
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.vertices.len())
        {
            return Err(MeshError::IndexOutOfRange {
                index,
                vertices: self.vertices.len(),
            });
        }
        for (n, subset) in self.subsets.iter().enumerate() {
            let end = subset.first_index as usize + subset.index_count as usize;
            if end > self.indices.len() {
                return Err(MeshError::BadSubset(n));
            }
        }
        Ok(())
    }

    /// Encode as a native `.mesh` file.
    pub fn encode(&self) -> Result<Vec<u8>, MeshError> {
        let file = MeshFile {
            version: MESH_FILE_VERSION,
            vertex_bytes: self.vertex_bytes().to_vec(),
            indices: self.indices.clone(),
            subsets: self.subsets.clone(),
        };
        let mut out = Vec::new();
        ciborium::into_writer(&file, &mut out).map_err(|e| MeshError::CborEncode(e.to_string()))?;
        Ok(out)
    }

    /// Decode and validate a native `.mesh` file.
    pub fn decode(bytes: &[u8]) -> Result<Self, MeshError> {
        let file: MeshFile =
            ciborium::from_reader(bytes).map_err(|e| MeshError::CborDecode(e.to_string()))?;
        if file.version != MESH_FILE_VERSION {
            return Err(MeshError::UnsupportedVersion(file.version));
        }
        if file.vertex_bytes.len() % std::mem::size_of::<Vertex>() != 0 {
            return Err(MeshError::RaggedVertices(file.vertex_bytes.len()));
        }
        let mesh = Self {
            vertices: bytemuck::pod_collect_to_vec(&file.vertex_bytes),
            indices: file.indices,
            subsets: file.subsets,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Unit cube centred on the origin, four vertices per face.
    pub fn cube() -> Self {
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]),
            ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 1.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0, 0.0]),
            ([0.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, up, right) in FACES {
            let (n, u, r) = (Vec3::from(normal), Vec3::from(up), Vec3::from(right));
            let base = vertices.len() as u32;
            for (du, dr, uv) in [
                (-1.0, -1.0, [0.0, 1.0]),
                (-1.0, 1.0, [1.0, 1.0]),
                (1.0, 1.0, [1.0, 0.0]),
                (1.0, -1.0, [0.0, 0.0]),
            ] {
                let p = (n + u * du + r * dr) * 0.5;
                vertices.push(Vertex::new(p.to_array(), normal, uv));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(vertices, indices)
    }

    /// Unit quad in the XY plane facing +Z.
    pub fn rectangle() -> Self {
        let normal = [0.0, 0.0, 1.0];
        let vertices = vec![
            Vertex::new([-0.5, -0.5, 0.0], normal, [0.0, 1.0]),
            Vertex::new([0.5, -0.5, 0.0], normal, [1.0, 1.0]),
            Vertex::new([0.5, 0.5, 0.0], normal, [1.0, 0.0]),
            Vertex::new([-0.5, 0.5, 0.0], normal, [0.0, 0.0]),
        ];
        Self::new(vertices, vec![0, 1, 2, 0, 2, 3])
    }

    fn bounds_of(&self, range: std::ops::Range<usize>) -> Bounds {
        let mut bounds = Bounds::EMPTY;
        for &index in self.indices.get(range).unwrap_or(&[]) {
            if let Some(v) = self.vertices.get(index as usize) {
                bounds.include(Vec3::from(v.position));
            }
        }
        bounds
    }
}
