// Mesh data: vertex layout and OBJ loading

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::mem::offset_of;
use std::path::Path;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { position, color, tex_coord }
    }

    pub fn binding_descriptions() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tex_coord) as u32,
            },
        ]
    }

    /// Exact bit pattern, so -0.0 and 0.0 stay distinct like NaNs do
    fn key(&self) -> [u32; 8] {
        bytemuck::cast(*self)
    }
}

const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

/// Deduplicated vertices and the u32 index list into them
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn load_obj(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open model {}", path.display()))?;

        let mesh = Self::from_obj_reader(&mut BufReader::new(file))
            .with_context(|| format!("Failed to load model {}", path.display()))?;

        log::info!(
            "Loaded model {} ({} vertices, {} indices)",
            path.display(),
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }

    /// Parse OBJ text; material libraries are ignored
    pub fn from_obj_reader(reader: &mut impl BufRead) -> Result<Self> {
        let (models, _) = tobj::load_obj_buf(
            reader,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: false,
                ..Default::default()
            },
            |_| Ok(Default::default()),
        )
        .context("Malformed OBJ data")?;

        let mut mesh = Mesh::default();
        let mut unique: HashMap<[u32; 8], u32> = HashMap::new();

        for model in &models {
            let data = &model.mesh;
            let has_tex_coords = !data.texcoords.is_empty() && !data.texcoord_indices.is_empty();

            for (corner, &position_index) in data.indices.iter().enumerate() {
                let p = 3 * position_index as usize;
                let position = data
                    .positions
                    .get(p..p + 3)
                    .context("Face refers to a missing position")?;

                let tex_coord = if has_tex_coords {
                    let t = 2 * *data
                        .texcoord_indices
                        .get(corner)
                        .context("Face corner has no texture coordinate")? as usize;
                    let uv = data
                        .texcoords
                        .get(t..t + 2)
                        .context("Face refers to a missing texture coordinate")?;
                    // OBJ puts v=0 at the bottom, Vulkan samples top-down
                    [uv[0], 1.0 - uv[1]]
                } else {
                    [0.0, 0.0]
                };

                let vertex = Vertex::new([position[0], position[1], position[2]], WHITE, tex_coord);
                mesh.push(vertex, &mut unique);
            }
        }

        if mesh.indices.is_empty() {
            anyhow::bail!("OBJ data contains no faces");
        }

        Ok(mesh)
    }

    fn push(&mut self, vertex: Vertex, unique: &mut HashMap<[u32; 8], u32>) {
        let next = self.vertices.len() as u32;
        let index = *unique.entry(vertex.key()).or_insert_with(|| {
            self.vertices.push(vertex);
            next
        });
        self.indices.push(index);
    }

    /// Two textured quads, one behind the other
    pub fn quad() -> Self {
        let corners = [
            ([-0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
            ([0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
            ([0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ([-0.5, 0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
        ];

        let vertices = [0.0, -0.5]
            .into_iter()
            .flat_map(|z| {
                corners
                    .iter()
                    .map(move |&([x, y], color, uv)| Vertex::new([x, y, z], color, uv))
            })
            .collect();

        Self {
            vertices,
            indices: vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4],
        }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(obj: &str) -> Result<Mesh> {
        Mesh::from_obj_reader(&mut Cursor::new(obj.as_bytes()))
    }

    const SQUARE: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3
f 1/1 3/3 4/4
";

    #[test]
    fn shared_corners_are_deduplicated() {
        let mesh = parse(SQUARE).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert!(mesh.vertices.iter().all(|v| v.color == WHITE));
    }

    #[test]
    fn texture_v_is_flipped() {
        let mesh = parse(SQUARE).unwrap();
        assert_eq!(mesh.vertices[0].tex_coord, [0.0, 1.0]);
        assert_eq!(mesh.vertices[2].tex_coord, [1.0, 0.0]);
    }

    #[test]
    fn quads_are_triangulated() {
        let obj = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let mesh = parse(obj).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        assert!(mesh.vertices.iter().all(|v| v.tex_coord == [0.0, 0.0]));
    }

    #[test]
    fn same_position_different_uv_stays_separate() {
        let obj = "\
v 0 0 0
v 1 0 0
v 0 1 0
vt 0 0
vt 0.5 0.5
f 1/1 2/1 3/1
f 1/2 3/1 2/1
";
        let mesh = parse(obj).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 3, 2, 1]);
    }

    #[test]
    fn empty_obj_is_rejected() {
        assert!(parse("# nothing here\n").is_err());
    }

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        let attributes = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(Vertex::binding_descriptions()[0].stride, 32);
    }

    #[test]
    fn built_in_quad_is_indexed() {
        let mesh = Mesh::quad();
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.index_count(), 12);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
        assert_eq!(mesh.vertices[4].position[2], -0.5);
    }
}
