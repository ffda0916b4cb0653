pub mod artifact;
pub mod loaders;
pub mod request;
pub mod response;
pub mod stage;
pub mod validation;

pub use artifact::{Artifact, DerivedStructure, FormativeAssessment, SampleQuestion, SummativeAssessment};
pub use loaders::{load_all_requests, load_request};
pub use request::{
    AssessmentPrefs, DerivedPrefs, GenerationContext, GenerationRequest, Preferences, SamplePrefs,
    Unit,
};
pub use response::{
    FailedItem, FailureKind, GenerationResponse, ItemOutcome, ItemStatus, RunSummary, StageResult,
};
pub use stage::{DerivedFormat, QuestionCategory, StageKind};
pub use validation::{validate_request, ValidationRules};
