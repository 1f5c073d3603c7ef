pub mod agent_end_task;
pub mod credentials;
pub mod notifications;
pub mod signing;
pub mod webhook_delivery;
