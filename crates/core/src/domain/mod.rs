pub mod message;
pub mod session;
pub mod tool_request;
pub mod validation;
