use crate::target::Stage;

/// The single path shape the server understands: `/passes/{index}/{stage}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub pass: usize,
    pub stage: Stage,
}

impl Route {
    /// Matches `path` against `/passes/{index}/{stage}`. Any query string is
    /// ignored; every other shape yields `None`.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        let rest = path.strip_prefix("/passes/")?;
        let (index, stage) = rest.split_once('/')?;

        if index.is_empty() || !index.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        let pass = index.parse::<usize>().ok()?;
        let stage = Stage::from_segment(stage)?;

        Some(Self { pass, stage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pass_and_stage() {
        assert_eq!(
            Route::parse("/passes/1/fragment"),
            Some(Route {
                pass: 1,
                stage: Stage::Fragment
            })
        );
        assert_eq!(
            Route::parse("/passes/12/vertex?t=123"),
            Some(Route {
                pass: 12,
                stage: Stage::Vertex
            })
        );
    }

    #[test]
    fn rejects_other_shapes() {
        for path in [
            "/",
            "/passes",
            "/passes/",
            "/passes/0",
            "/passes/0/",
            "/passes/-1/vertex",
            "/passes/+1/vertex",
            "/passes/x/vertex",
            "/passes/0/geometry",
            "/passes/0/fragment/",
            "/passes/0/fragment/extra",
            "/pass/0/fragment",
            "passes/0/fragment",
            "/passes/99999999999999999999999999/vertex",
        ] {
            assert_eq!(Route::parse(path), None, "{path} should not route");
        }
    }
}
