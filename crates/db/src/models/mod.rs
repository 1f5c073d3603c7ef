pub mod delivery_attempt;
pub mod notification;
pub mod session;
pub mod step;
pub mod webhook_registration;

#[cfg(test)]
pub(crate) mod test_utils;
