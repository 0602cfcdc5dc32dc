//! Infrastructure behind trait seams: network transport, TLS material and
//! document storage. The execution engine only sees the traits, so tests swap
//! in doubles without touching the core.

pub mod document;
pub mod reqwest_transport;
pub mod tls;
pub mod transport;

pub use document::{DocumentReference, DocumentStore, InMemoryDocumentStore};
pub use reqwest_transport::ReqwestTransport;
pub use tls::{create_tls_config, RustlsTlsProvider, TlsProvider};
pub use transport::{BodyReader, BoxFuture, BufferedBody, HttpTransport, TransportRequest, TransportResponse};
