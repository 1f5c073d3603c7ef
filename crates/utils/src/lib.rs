pub mod canonical;
pub mod response;
