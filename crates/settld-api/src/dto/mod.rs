//! Request/response bodies for the HTTP surface (§6). Each DTO maps directly
//! onto the `settld-types` domain structs already used internally — most
//! responses just re-serialize the domain struct rather than introduce a
//! parallel shape.

pub mod agent;
pub mod gate;
pub mod grant;
pub mod session;
pub mod settlement;
pub mod wallet;
