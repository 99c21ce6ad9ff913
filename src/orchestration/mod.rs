pub mod assembler;
pub mod batch_orchestrator;

pub use assembler::assemble;
pub use batch_orchestrator::BatchOrchestrator;
