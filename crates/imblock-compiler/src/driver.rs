/// Compiler driver: reads a saved workspace and compiles it
use std::path::PathBuf;

use tracing::{debug, info};

use crate::block::BlockProgram;
use crate::codegen::{CodeGenerator, CompiledProgram};
use crate::error::{CompileError, Result};
use crate::xml;

/// Compilation output structure
pub struct CompileOutput {
    /// Workspace file that was compiled
    pub source_file: PathBuf,
    /// The imported block program
    pub program: BlockProgram,
    /// Instrumented text and the ids it marks
    pub compiled: CompiledProgram,
}

/// Options for compilation
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Input workspace XML file
    pub input: PathBuf,
    /// Output file (optional, defaults to stdout)
    pub output: Option<PathBuf>,
}

impl CompileOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
        }
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

/// The block compiler
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a new compiler with the given options
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Run the full compilation pipeline
    pub fn compile(&self) -> Result<CompileOutput> {
        info!(input = %self.options.input.display(), "compiling workspace");

        let source = self.read_source()?;
        let program = xml::from_xml(&source)?;
        debug!(
            stacks = program.stacks.len(),
            blocks = program.block_count(),
            variables = program.variables.len(),
            "workspace imported"
        );

        let compiled = CodeGenerator::new().generate(&program)?;
        debug!(
            bytes = compiled.code.len(),
            marks = compiled.block_ids.len(),
            "code generation successful"
        );

        if let Some(output) = &self.options.output {
            std::fs::write(output, &compiled.code)?;
            info!(output = %output.display(), "wrote compiled program");
        }

        Ok(CompileOutput {
            source_file: self.options.input.clone(),
            program,
            compiled,
        })
    }

    /// Read the source file
    fn read_source(&self) -> Result<String> {
        if !self.options.input.exists() {
            return Err(CompileError::FileNotFound(self.options.input.clone()));
        }

        std::fs::read_to_string(&self.options.input).map_err(CompileError::from)
    }
}
