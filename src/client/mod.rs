//! Request execution: the engine, its request/result contract and the
//! bounded response handling it relies on.

pub mod executor;
pub mod mapper;
pub mod response;
pub mod service;
pub mod types;

pub use executor::HttpExecutor;
pub use mapper::is_binary_content;
pub use response::{ResponseBody, ResponseHead, StreamingResponse};
pub use service::{HttpService, HttpServiceExt};
pub use types::{
    HeaderValues, HttpClientRequest, HttpClientResult, HttpMethod, MappedResult, RequestBody,
    ResultShape,
};
