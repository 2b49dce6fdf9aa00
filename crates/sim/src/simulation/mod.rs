//! Simulation driver: configuration, the tree traversal and output.
//!
//! The most commonly used types are re-exported here so consumers can
//! import them from `treevo_sim::simulation`.
//!
//! - `Simulator`: validates a configuration against a tree and a model and
//!   runs the traversal.
//! - `SimulationBuilder`: fluent builder for constructing a `Simulator`.
//! - `SequenceSink`: receiver of finished sequences; `MemorySink` collects
//!   them in memory.

pub mod ascertainment;
pub mod builder;
pub mod config;
pub mod engine;
pub mod output;
pub mod reconcile;

pub use builder::SimulationBuilder;
pub use config::{
    EvolutionConfig, ExecutionConfig, FunDiConfig, IndelConfig, OutputConfig, SequenceConfig,
    SimulationConfig,
};
pub use engine::Simulator;
pub use output::{MemorySink, OutputMode, SequenceSink, SimulationOutput, StagedFile};
