// Request middleware - voter identity and request ids
// Identity is verified upstream; this layer only reads what the gateway forwarded.

pub mod request_id;
pub mod voter;

pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
pub use voter::{Voter, USER_ID_HEADER};
