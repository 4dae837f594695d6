pub mod types;
pub mod chunker;
pub mod parser;
pub mod model;
pub mod aggregator;
pub mod orchestrator;
pub mod session;
pub mod frames;

pub use types::*;
pub use model::{
    CallRecord, GeminiClient, GeminiVisionModel, MockVisionModel, ModelRegistry, ModelSpec,
    VisionModel, SHOT_COUNT_PROMPT,
};
pub use orchestrator::{AnalysisOutput, Orchestrator};
pub use parser::{parse_model_response, timestamp_to_seconds, ParseStrategy};
pub use session::{safe_fs_name, Session, SessionStatus};
