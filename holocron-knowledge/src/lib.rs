//! Extraction, synthesis and retrieval for the holocron knowledge graph.
//!
//! The write path reads chunked novels ([`chunks`]), asks an LLM for
//! entities and relationships ([`extract`], [`pipeline`]) and summarizes the
//! result ([`synthesize`]). The read path ([`retrieve`]) renders compact
//! context blocks from the stored graph.

pub mod budget;
pub mod chunks;
pub mod errors;
pub mod extract;
pub mod json_call;
pub mod llm;
pub mod pipeline;
pub mod retrieve;
pub mod synthesize;

pub use budget::{estimate_tokens, trim_to_budget};
pub use chunks::{
    Book, Chapter, Chunk, ChunkReader, ChunkSource, InMemoryChunkSource, SqliteChunkSource,
    WorkloadEstimate,
};
pub use errors::{KnowledgeError, KnowledgeResult};
pub use extract::{BatchOutcome, BatchUnit, Extractor};
pub use json_call::{JsonCallPolicy, JsonOutcome, call_json};
pub use llm::{LlmClient, LlmError, OpenAiCompatibleClient};
pub use pipeline::{EXTRACTION_PHASE, ExtractionRun, RunReport, run_extraction};
pub use retrieve::{ContextRequest, RuntimeRetriever};
pub use synthesize::{Contradiction, SynthesisReport, Synthesizer};
