use super::GpuError;

/// Triangles incident to each vertex, stored as compressed rows: vertex `v`
/// touches `triangles[offsets[v]..offsets[v + 1]]`, in ascending triangle
/// order. A triangle that names a vertex twice is listed twice.
///
/// Gathering face normals along a row adds the same terms in the same order
/// as a scatter over the index buffer, whatever order the triangles come in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexAdjacency {
    offsets: Vec<u32>,
    triangles: Vec<u32>,
}

impl VertexAdjacency {
    pub fn build(indices: &[u32], vertex_count: usize) -> Result<Self, GpuError> {
        if u32::try_from(indices.len()).is_err() {
            return Err(GpuError::TooManyIndices { len: indices.len() });
        }

        let mut offsets = vec![0u32; vertex_count + 1];
        for tri in indices.chunks_exact(3) {
            for &index in tri {
                if index as usize >= vertex_count {
                    return Err(GpuError::IndexOutOfRange {
                        index,
                        vertex_count,
                    });
                }
                offsets[index as usize + 1] += 1;
            }
        }

        for v in 0..vertex_count {
            offsets[v + 1] += offsets[v];
        }

        let mut cursor = offsets[..vertex_count].to_vec();
        let mut triangles = vec![0u32; offsets[vertex_count] as usize];
        for (t, tri) in indices.chunks_exact(3).enumerate() {
            for &index in tri {
                let slot = &mut cursor[index as usize];
                triangles[*slot as usize] = t as u32;
                *slot += 1;
            }
        }

        Ok(Self { offsets, triangles })
    }

    /// `vertex_count + 1` row starts.
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn triangles(&self) -> &[u32] {
        &self.triangles
    }

    pub fn incident(&self, vertex: usize) -> &[u32] {
        match (self.offsets.get(vertex), self.offsets.get(vertex + 1)) {
            (Some(&start), Some(&end)) => &self.triangles[start as usize..end as usize],
            _ => &[],
        }
    }
}
