//! Where simulated sequences go.
//!
//! Sequences are handed to a [`SequenceSink`] as `(name, states)` pairs.
//! Tips that finish before the alignment reaches its final length cannot be
//! emitted right away; depending on what still has to happen to them they are
//! either staged in a temporary file or kept in memory (see [`OutputMode`]).
//!
//! ## Staged record format
//!
//! One line per sequence: `<name>@<length>@<s1> <s2> … <sn> `, with every
//! state written as its integer code followed by a space.

use crate::base::{State, StateMapping};
use crate::errors::SimulationError;
use crate::evolution::events::EventCounts;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};

/// Receiver of finished sequences.
pub trait SequenceSink {
    /// # Errors
    /// Implementations report their own I/O failures.
    fn write(&mut self, name: &str, states: &[State]) -> Result<(), SimulationError>;
}

impl<S: SequenceSink + ?Sized> SequenceSink for &mut S {
    fn write(&mut self, name: &str, states: &[State]) -> Result<(), SimulationError> {
        (**self).write(name, states)
    }
}

/// Collects sequences in emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySink {
    records: Vec<(String, Vec<State>)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[(String, Vec<State>)] {
        &self.records
    }

    /// States of the first sequence called `name`.
    pub fn get(&self, name: &str) -> Option<&[State]> {
        self.records
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.as_slice())
    }

    pub fn into_records(self) -> Vec<(String, Vec<State>)> {
        self.records
    }

    /// Render every sequence as text.
    ///
    /// Rows named in `reference` copy that row's gaps (an input alignment
    /// whose gap pattern should be kept).
    pub fn render(
        &self,
        mapping: &StateMapping,
        reference: &HashMap<String, String>,
    ) -> Vec<(String, String)> {
        self.records
            .iter()
            .map(|(name, states)| {
                let text = match reference.get(name) {
                    Some(row) => mapping.render_with_gaps(states, row),
                    None => mapping.render(states),
                };
                (name.clone(), text)
            })
            .collect()
    }
}

impl SequenceSink for MemorySink {
    fn write(&mut self, name: &str, states: &[State]) -> Result<(), SimulationError> {
        self.records.push((name.to_string(), states.to_vec()));
        Ok(())
    }
}

/// How finished tips are handled during the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Final as soon as they are simulated: emit and release.
    Stream,
    /// Need reconciliation only: park them in a temporary file.
    Staged,
    /// Need whole-alignment processing: keep them in memory.
    Retained,
}

impl OutputMode {
    /// Pick the mode for a run.
    pub fn select(insertions: bool, fundi: bool, ascertainment: bool) -> Self {
        if fundi || ascertainment {
            OutputMode::Retained
        } else if insertions {
            OutputMode::Staged
        } else {
            OutputMode::Stream
        }
    }
}

/// Write one staged record.
///
/// # Errors
/// Any I/O error from `out`.
pub fn write_staged_record<W: Write>(
    out: &mut W,
    name: &str,
    states: &[State],
) -> std::io::Result<()> {
    write!(out, "{name}@{}@", states.len())?;
    for state in states {
        write!(out, "{state} ")?;
    }
    writeln!(out)
}

/// Parse one staged record; `line_number` is only used in errors.
///
/// # Errors
/// `MalformedStagedRecord` if a field is missing, a state is not an
/// integer, or the state count disagrees with the declared length.
pub fn parse_staged_record(
    line: &str,
    line_number: usize,
) -> Result<(String, Vec<State>), SimulationError> {
    let malformed = |reason: String| SimulationError::MalformedStagedRecord {
        line: line_number,
        reason,
    };
    // names may contain '@'; the last two fields never do
    let mut fields = line.rsplitn(3, '@');
    let (Some(states), Some(length), Some(name)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed("expected <name>@<length>@<states>".into()));
    };
    let length: usize = length
        .parse()
        .map_err(|_| malformed(format!("invalid length '{length}'")))?;
    let states = states
        .split_ascii_whitespace()
        .map(|s| {
            s.parse::<State>()
                .map_err(|_| malformed(format!("invalid state '{s}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if states.len() != length {
        return Err(malformed(format!(
            "declared {length} states but found {}",
            states.len()
        )));
    }
    Ok((name.to_string(), states))
}

/// Anonymous temporary file holding staged tips.
#[derive(Debug)]
pub struct StagedFile {
    writer: BufWriter<File>,
    count: usize,
}

impl StagedFile {
    /// # Errors
    /// `Io` if no temporary file can be created.
    pub fn new() -> Result<Self, SimulationError> {
        Ok(Self {
            writer: BufWriter::new(tempfile::tempfile()?),
            count: 0,
        })
    }

    /// # Errors
    /// `Io` on write failure.
    pub fn write(&mut self, name: &str, states: &[State]) -> Result<(), SimulationError> {
        write_staged_record(&mut self.writer, name, states)?;
        self.count += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Read every record back, in write order. The file is deleted when
    /// this returns.
    ///
    /// # Errors
    /// `Io` on read failure and `MalformedStagedRecord` on a bad line.
    pub fn read_back(self) -> Result<Vec<(String, Vec<State>)>, SimulationError> {
        let mut file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        let mut records = Vec::with_capacity(self.count);
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            records.push(parse_staged_record(&line, i + 1)?);
        }
        Ok(records)
    }
}

impl SequenceSink for StagedFile {
    fn write(&mut self, name: &str, states: &[State]) -> Result<(), SimulationError> {
        StagedFile::write(self, name, states)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationOutput {
    /// Seed the run was started from
    pub seed: u64,
    /// Number of states in every emitted sequence
    pub sequence_length: usize,
    /// Number of sequences handed to the sink
    pub sequences_written: usize,
    /// Branches sampled from the transition matrix
    pub transition_matrix_branches: usize,
    /// Branches simulated event by event
    pub rate_matrix_branches: usize,
    pub events: EventCounts,
}
