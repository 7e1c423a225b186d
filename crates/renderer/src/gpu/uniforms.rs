use bytemuck::{Pod, Zeroable};

/// Per-pass uniform block; mirrors `FrameParams` in the shader prelude.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub pass_index: i32,
}

impl FrameUniforms {
    pub fn new(width: u32, height: u32, time: f64, pass_index: usize) -> Self {
        Self {
            resolution: [width as f32, height as f32],
            time: time as f32,
            pass_index: i32::try_from(pass_index).unwrap_or(i32::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_std140_block() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 16);
        let uniforms = FrameUniforms::new(640, 360, 1.5, 2);
        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(&bytes[8..12], &1.5f32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &2i32.to_ne_bytes());
    }
}
