//! # External Grid Tool
//!
//! Grid arithmetic, temporal aggregation and nearest-neighbour extraction are
//! delegated to an external executable (CDO). [`GridTool`] is the seam the
//! pipeline talks to; [`Cdo`] runs the real program as a blocking subprocess.

use crate::error::{ProcessingError, ProcessingResult};
use log::debug;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Operations the pipeline asks of the grid tool.
#[derive(Debug, Clone, PartialEq)]
pub enum GridOp {
    /// Divide every cell by a constant.
    DivC(f64),
    /// Multiply two grids cell by cell.
    Mul,
    /// Monthly to yearly mean, weighted by month length.
    YearMonMean,
    /// Nearest-neighbour value at a coordinate.
    RemapNn { lat: f64, lon: f64 },
}

impl GridOp {
    /// Operator argument in CDO syntax, e.g. `divc,100`.
    pub fn operator(&self) -> String {
        match self {
            GridOp::DivC(constant) => format!("divc,{}", constant),
            GridOp::Mul => "mul".to_string(),
            GridOp::YearMonMean => "yearmonmean".to_string(),
            GridOp::RemapNn { lat, lon } => format!("remapnn,lon={}_lat={}", lon, lat),
        }
    }

    /// Number of input files the operation takes.
    pub fn arity(&self) -> usize {
        match self {
            GridOp::Mul => 2,
            _ => 1,
        }
    }
}

/// A program able to apply [`GridOp`]s to array files.
///
/// Implementations write `output` and report failure through
/// [`ProcessingError::ExternalToolFailure`] or [`ProcessingError::MissingOutput`].
pub trait GridTool {
    fn run(&self, op: &GridOp, inputs: &[&Path], output: &Path) -> ProcessingResult<()>;

    /// Checks that the tool can be invoked at all.
    fn check_available(&self) -> ProcessingResult<()> {
        Ok(())
    }
}

/// The Climate Data Operators executable.
#[derive(Debug, Clone)]
pub struct Cdo {
    program: PathBuf,
    options: Vec<String>,
}

impl Cdo {
    /// `program` is a path or a name looked up on `PATH`.
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Cdo {
            program: program.into(),
            options: vec!["-O".to_string()],
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Resolves the executable: an explicit path must exist, a bare name is
    /// searched on `PATH`.
    pub fn locate(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 {
            return self.program.is_file().then(|| self.program.clone());
        }
        let search = env::var_os("PATH")?;
        env::split_paths(&search)
            .map(|dir| dir.join(&self.program))
            .find(|candidate| candidate.is_file())
    }
}

impl Default for Cdo {
    fn default() -> Self {
        Cdo::new("cdo")
    }
}

impl GridTool for Cdo {
    fn run(&self, op: &GridOp, inputs: &[&Path], output: &Path) -> ProcessingResult<()> {
        if inputs.len() != op.arity() {
            return Err(ProcessingError::ExternalToolFailure {
                operation: op.operator(),
                status: "not started".to_string(),
                stderr: format!("expected {} inputs, got {}", op.arity(), inputs.len()),
            });
        }

        debug!(
            "Running {} {} {} on {:?} -> {}",
            self.program.display(),
            self.options.join(" "),
            op.operator(),
            inputs,
            output.display()
        );

        let result = Command::new(&self.program)
            .args(&self.options)
            .arg(op.operator())
            .args(inputs)
            .arg(output)
            .output()
            .map_err(|e| ProcessingError::ExternalToolFailure {
                operation: op.operator(),
                status: "failed to start".to_string(),
                stderr: e.to_string(),
            })?;

        if !result.status.success() {
            return Err(ProcessingError::ExternalToolFailure {
                operation: op.operator(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        if !output.exists() {
            return Err(ProcessingError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }

    fn check_available(&self) -> ProcessingResult<()> {
        match self.locate() {
            Some(path) => {
                debug!("Using grid tool at {}", path.display());
                Ok(())
            }
            None => Err(ProcessingError::MissingInput(format!(
                "grid tool '{}' was not found",
                self.program.display()
            ))),
        }
    }
}
