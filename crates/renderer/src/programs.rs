use livereload::{ShaderTarget, Stage, StageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("{stage} source is not valid UTF-8")]
    Encoding { stage: Stage },
    #[error("{stage} stage failed to compile:\n{log}")]
    Compile { stage: Stage, log: String },
    #[error("pass {pass} failed to link:\n{log}")]
    Link { pass: usize, log: String },
}

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("pass {pass} is out of range ({count} passes)")]
    UnknownPass { pass: usize, count: usize },
    #[error("at least one pass is required")]
    NoPasses,
    #[error("pass {pass} could not be built from fallback sources")]
    Fallback {
        pass: usize,
        #[source]
        source: ShaderError,
    },
}

/// Compiles stages and links them into per-pass programs.
pub trait ProgramBackend {
    type Stage;
    type Program;

    fn compile_stage(&mut self, stage: Stage, source: &str) -> Result<Self::Stage, ShaderError>;

    fn link(
        &mut self,
        pass: usize,
        vertex: &Self::Stage,
        fragment: &Self::Stage,
    ) -> Result<Self::Program, ShaderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSources {
    pub vertex: String,
    pub fragment: String,
}

impl PassSources {
    pub fn get(&self, stage: Stage) -> &str {
        match stage {
            Stage::Vertex => &self.vertex,
            Stage::Fragment => &self.fragment,
        }
    }
}

struct CompiledStage<S> {
    source: String,
    handle: S,
}

/// One rendering pass: both stages and the program linked from them.
pub struct PassProgram<B: ProgramBackend> {
    vertex: CompiledStage<B::Stage>,
    fragment: CompiledStage<B::Stage>,
    program: B::Program,
    generation: u64,
}

impl<B: ProgramBackend> PassProgram<B> {
    pub fn program(&self) -> &B::Program {
        &self.program
    }

    pub fn source(&self, stage: Stage) -> &str {
        match stage {
            Stage::Vertex => &self.vertex.source,
            Stage::Fragment => &self.fragment.source,
        }
    }

    /// Number of successful relinks since startup.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
pub enum RecompileOutcome {
    Linked,
    /// The pass kept its previous program.
    Rejected(ShaderError),
}

/// Linked programs indexed by pass, recompiled in place on reload.
pub struct ProgramTable<B: ProgramBackend> {
    backend: B,
    passes: Vec<PassProgram<B>>,
}

impl<B: ProgramBackend> ProgramTable<B> {
    /// Compiles every pass. A pass that fails is built from `fallback` so the
    /// session can still be repaired by reloading.
    pub fn build(
        mut backend: B,
        sources: Vec<PassSources>,
        fallback: &PassSources,
    ) -> Result<Self, ProgramError> {
        if sources.is_empty() {
            return Err(ProgramError::NoPasses);
        }

        let mut passes = Vec::with_capacity(sources.len());
        for (index, pass_sources) in sources.into_iter().enumerate() {
            let pass = match build_pass(&mut backend, index, pass_sources) {
                Ok(pass) => pass,
                Err(err) => {
                    tracing::error!(pass = index, "shader failed at startup, using fallback:\n{err}");
                    build_pass(&mut backend, index, fallback.clone())
                        .map_err(|source| ProgramError::Fallback { pass: index, source })?
                }
            };
            passes.push(pass);
        }
        tracing::debug!(passes = passes.len(), "program table built");

        Ok(Self { backend, passes })
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn passes(&self) -> &[PassProgram<B>] {
        &self.passes
    }

    pub fn pass(&self, index: usize) -> Option<&PassProgram<B>> {
        self.passes.get(index)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Replaces one stage of `pass` with `source` and relinks.
    ///
    /// Compile and link failures leave the previous stage and program in
    /// place and are reported as [`RecompileOutcome::Rejected`].
    pub fn recompile_stage(
        &mut self,
        pass: usize,
        stage: Stage,
        source: &[u8],
    ) -> Result<RecompileOutcome, ProgramError> {
        let count = self.passes.len();
        let entry = self
            .passes
            .get_mut(pass)
            .ok_or(ProgramError::UnknownPass { pass, count })?;

        let Ok(text) = std::str::from_utf8(source) else {
            return Ok(RecompileOutcome::Rejected(ShaderError::Encoding { stage }));
        };
        let handle = match self.backend.compile_stage(stage, text) {
            Ok(handle) => handle,
            Err(err) => return Ok(RecompileOutcome::Rejected(err)),
        };

        let linked = match stage {
            Stage::Vertex => self.backend.link(pass, &handle, &entry.fragment.handle),
            Stage::Fragment => self.backend.link(pass, &entry.vertex.handle, &handle),
        };
        let program = match linked {
            Ok(program) => program,
            Err(err) => return Ok(RecompileOutcome::Rejected(err)),
        };

        let replacement = CompiledStage {
            source: text.to_string(),
            handle,
        };
        match stage {
            Stage::Vertex => entry.vertex = replacement,
            Stage::Fragment => entry.fragment = replacement,
        }
        entry.program = program;
        entry.generation += 1;
        Ok(RecompileOutcome::Linked)
    }
}

fn build_pass<B: ProgramBackend>(
    backend: &mut B,
    pass: usize,
    sources: PassSources,
) -> Result<PassProgram<B>, ShaderError> {
    let vertex = backend.compile_stage(Stage::Vertex, &sources.vertex)?;
    let fragment = backend.compile_stage(Stage::Fragment, &sources.fragment)?;
    let program = backend.link(pass, &vertex, &fragment)?;
    Ok(PassProgram {
        vertex: CompiledStage {
            source: sources.vertex,
            handle: vertex,
        },
        fragment: CompiledStage {
            source: sources.fragment,
            handle: fragment,
        },
        program,
        generation: 0,
    })
}

impl<B: ProgramBackend> ShaderTarget for ProgramTable<B> {
    fn pass_count(&self) -> usize {
        self.len()
    }

    fn replace_stage(&mut self, pass: usize, stage: Stage, source: &[u8]) -> Result<(), StageError> {
        match self.recompile_stage(pass, stage, source) {
            Ok(RecompileOutcome::Linked) => Ok(()),
            Ok(RecompileOutcome::Rejected(err)) => Err(StageError::Rejected(err.to_string())),
            Err(ProgramError::UnknownPass { pass, .. }) => Err(StageError::UnknownPass(pass)),
            Err(err) => Err(StageError::Rejected(err.to_string())),
        }
    }
}
