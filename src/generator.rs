pub mod client;
pub mod code;
pub mod prompt;
pub mod test_cases;

pub use client::{
    GenerationClient,
    GenerationError,
    GenerationRequest,
    TextGenerator,
};

pub use code::{synthesize_source, SynthesizedSource};
pub use prompt::{build_code_prompt, build_fix_prompt, build_test_case_prompt, example_payload};
pub use test_cases::{
    extract_test_cases,
    find_json_array,
    ExtractedCases,
    ExtractionError,
    RejectedCase,
    TestCase,
};
