use thiserror::Error;

/// I/O-level failures that propagate up to `main`. Numerical fatalities
/// (negative Jacobian, unsupported element type) panic at the point of
/// detection instead; the step pipeline never unwinds across stages.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("cannot open input file '{path}': {source}")]
    InputFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse input file '{path}': {source}")]
    InputParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot open restart file '{path}': {source}")]
    RestartFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot find UnstructuredGrid tag in restart file '{path}'")]
    RestartFormat { path: String },

    #[error("cannot write output file '{path}': {source}")]
    OutputFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
