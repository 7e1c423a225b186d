//! Built-in GLSL and the rules for assembling a complete stage source.
//!
//! Every stage the renderer compiles is `PRELUDE`, the stage header, an
//! optional user prolog and common block, then the pass code itself.

use livereload::Stage;

use crate::programs::PassSources;

/// Uniform interface shared by every stage.
///
/// The block layout must match [`FrameUniforms`](crate::gpu::FrameUniforms).
pub const PRELUDE: &str = r"#version 450
layout(std140, set = 0, binding = 0) uniform FrameParams {
    vec2 _resolution;
    float _time;
    int _pass;
} frame;

#define iResolution frame._resolution
#define iTime frame._time
#define iPass frame._pass
";

const VERTEX_HEADER: &str = r"layout(location = 0) out vec2 v_uv;
";

const FRAGMENT_HEADER: &str = r"layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;

layout(set = 1, binding = 0) uniform texture2D demo_previous_texture;
layout(set = 1, binding = 1) uniform sampler demo_previous_sampler;
#define iPrevious sampler2D(demo_previous_texture, demo_previous_sampler)

// v_uv is bottom-up, textures are top-down.
vec4 previousPass(vec2 uv) {
    return texture(iPrevious, vec2(uv.x, 1.0 - uv.y));
}
";

/// Full-screen triangle; used when a pass does not supply its own vertex stage.
pub const DEFAULT_VERTEX: &str = r"const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    vec2 pos = positions[uint(gl_VertexIndex)];
    v_uv = pos * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

/// Magenta checkerboard shown while a pass has no working source.
pub const FALLBACK_FRAGMENT: &str = r"void main() {
    vec2 cell = floor(v_uv * 16.0);
    float check = mod(cell.x + cell.y, 2.0);
    outColor = vec4(mix(vec3(1.0, 0.0, 1.0), vec3(0.1, 0.0, 0.1), check), 1.0);
}
";

/// Presents the final pass texture on the window surface.
pub(crate) const BLIT_VERTEX: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    vec2 pos = positions[uint(gl_VertexIndex)];
    v_uv = vec2(pos.x * 0.5 + 0.5, 0.5 - pos.y * 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

pub(crate) const BLIT_FRAGMENT: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;

layout(set = 0, binding = 0) uniform texture2D source_texture;
layout(set = 0, binding = 1) uniform sampler source_sampler;

void main() {
    outColor = texture(sampler2D(source_texture, source_sampler), v_uv);
}
";

/// User code spliced between the built-in headers and each pass body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedSource {
    pub prolog: String,
    pub common: String,
}

/// Builds the complete source for one stage.
pub fn compose_stage(stage: Stage, shared: &SharedSource, body: &str) -> String {
    let header = match stage {
        Stage::Vertex => VERTEX_HEADER,
        Stage::Fragment => FRAGMENT_HEADER,
    };
    let mut source = String::with_capacity(
        PRELUDE.len() + header.len() + shared.prolog.len() + shared.common.len() + body.len() + 32,
    );
    source.push_str(PRELUDE);
    source.push_str(header);
    for block in [&shared.prolog, &shared.common] {
        if !block.is_empty() {
            source.push_str(block);
            if !block.ends_with('\n') {
                source.push('\n');
            }
        }
    }
    source.push_str("#line 1\n");
    source.push_str(body);
    source
}

/// Complete sources for one pass; a missing vertex body uses [`DEFAULT_VERTEX`].
pub fn compose_pass(shared: &SharedSource, vertex: Option<&str>, fragment: &str) -> PassSources {
    PassSources {
        vertex: compose_stage(Stage::Vertex, shared, vertex.unwrap_or(DEFAULT_VERTEX)),
        fragment: compose_stage(Stage::Fragment, shared, fragment),
    }
}

pub fn fallback_pass() -> PassSources {
    compose_pass(&SharedSource::default(), None, FALLBACK_FRAGMENT)
}
