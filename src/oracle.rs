//! Label sources for queried examples.
//!
//! Oracles only rewrite labels of examples that are still in the unlabeled
//! pool; moving them into the labeled pool is the query strategy's job.

use crate::dataset::{validate_indices, Dataset, DatasetError, Label, LabelKind, Schema};
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// Errors raised by oracles
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Invalid selection: {0}")]
    Selection(#[from] DatasetError),

    #[error("Label input closed before every example was labeled")]
    InputClosed,

    #[error("Oracle console lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Provides labels for the selected unlabeled examples
pub trait Oracle: Send + fmt::Debug {
    /// Short identifier used in logs and reports
    fn name(&self) -> &str;

    /// Label the examples at `selected` positions of `pool` in place
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid selection or a failed label source.
    fn label(&mut self, selected: &[usize], pool: &mut Dataset) -> Result<(), OracleError>;

    /// Independent copy
    fn clone_box(&self) -> Box<dyn Oracle>;
}

impl Clone for Box<dyn Oracle> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Ground truth already sits in the pool, so labeling is a no-op
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedOracle;

impl SimulatedOracle {
    /// Create a simulated oracle
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Oracle for SimulatedOracle {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn label(&mut self, selected: &[usize], pool: &mut Dataset) -> Result<(), OracleError> {
        validate_indices(selected, pool.len())?;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Oracle> {
        Box::new(*self)
    }
}

type SharedInput = Arc<Mutex<Box<dyn BufRead + Send>>>;
type SharedOutput = Arc<Mutex<Box<dyn Write + Send>>>;

/// Asks a human (or any line-oriented source) for each label.
///
/// Single-label examples take one class index; multi-label examples take a
/// comma-separated list of label indices (an empty line means no labels).
/// Invalid answers are re-asked. Copies share the same console.
#[derive(Clone)]
pub struct InteractiveOracle {
    input: SharedInput,
    output: SharedOutput,
}

impl fmt::Debug for InteractiveOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractiveOracle").finish_non_exhaustive()
    }
}

impl InteractiveOracle {
    /// Oracle over arbitrary input and output streams
    #[must_use]
    pub fn new(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            output: Arc::new(Mutex::new(output)),
        }
    }

    /// Oracle reading stdin and prompting on stdout
    #[must_use]
    pub fn console() -> Self {
        Self::new(
            Box::new(BufReader::new(std::io::stdin())),
            Box::new(std::io::stdout()),
        )
    }

    fn ask(
        input: &mut dyn BufRead,
        output: &mut dyn Write,
        schema: &Schema,
        position: usize,
        features: &[f64],
    ) -> Result<Label, OracleError> {
        writeln!(output, "Example {position}: {features:?}")?;
        for (i, name) in schema.label_names.iter().enumerate() {
            writeln!(output, "  {i}: {name}")?;
        }

        loop {
            match schema.kind {
                LabelKind::SingleLabel => write!(output, "Class index: ")?,
                LabelKind::MultiLabel => write!(output, "Label indices (comma separated): ")?,
            }
            output.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Err(OracleError::InputClosed);
            }

            if let Some(label) = parse_answer(line.trim(), schema) {
                return Ok(label);
            }
            writeln!(output, "Invalid answer, try again")?;
        }
    }
}

/// Parse one answer line against the schema
fn parse_answer(answer: &str, schema: &Schema) -> Option<Label> {
    let n = schema.num_labels();
    match schema.kind {
        LabelKind::SingleLabel => {
            let class: usize = answer.parse().ok()?;
            (class < n).then_some(Label::Single(class))
        }
        LabelKind::MultiLabel => {
            let mut flags = vec![false; n];
            for part in answer.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let j: usize = part.parse().ok()?;
                *flags.get_mut(j)? = true;
            }
            Some(Label::Multi(flags))
        }
    }
}

impl Oracle for InteractiveOracle {
    fn name(&self) -> &'static str {
        "interactive"
    }

    fn label(&mut self, selected: &[usize], pool: &mut Dataset) -> Result<(), OracleError> {
        validate_indices(selected, pool.len())?;

        let mut input = self.input.lock().map_err(|_| OracleError::Poisoned)?;
        let mut output = self.output.lock().map_err(|_| OracleError::Poisoned)?;
        let schema = pool.schema().clone();

        for &position in selected {
            let Some(example) = pool.get_mut(position) else {
                continue;
            };
            let label = Self::ask(
                &mut **input,
                &mut **output,
                &schema,
                position,
                &example.features,
            )?;
            debug!(position, ?label, "Oracle answered");
            example.label = label;
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Oracle> {
        Box::new(self.clone())
    }
}
