// Reading the API description and turning it into endpoint records.

pub mod discovery;
pub mod swagger;

pub use discovery::{fetch_description, probe_endpoints, EndpointIssue};
pub use swagger::{
    extract_endpoints,
    load_endpoints,
    parse_description_file,
    parse_description_str,
    EndpointDescriptor,
    HttpMethod,
    ParserError,
    Result,
};
