use std::fmt;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Vertex, Stage::Fragment];

    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "vertex" => Some(Stage::Vertex),
            "fragment" => Some(Stage::Fragment),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("pass {0} does not exist")]
    UnknownPass(usize),
    /// The new source did not compile or link; the previous program is kept.
    #[error("{0}")]
    Rejected(String),
}

/// Live program state the server mutates when a reload request arrives.
pub trait ShaderTarget {
    fn pass_count(&self) -> usize;

    /// Replaces the full source of one stage of `pass` and relinks it.
    fn replace_stage(&mut self, pass: usize, stage: Stage, source: &[u8])
        -> Result<(), StageError>;
}
